//! Versioned, immutable policy document.
//!
//! The policy lives in `.warden/policy.toml`, is loaded once at startup and is
//! shared read-only (`Arc<Policy>`) by every verification call. Its effective
//! version id is the declared `version` plus a short content hash, so any edit
//! to the file yields a new version.
//!
//! # Policy File Format
//!
//! ```toml
//! version = "1"
//!
//! [[guardrails]]
//! name = "no-private-keys"
//! pattern = "-----BEGIN [A-Z ]*PRIVATE KEY-----"
//! target = "content"
//!
//! [thresholds]
//! min_coverage = 80.0
//! max_files_changed = 25
//! max_lines_changed = 1500
//! protected_paths = [".github/**", "migrations/**"]
//!
//! [[checks]]
//! name = "style"
//! command = "cargo fmt --check"
//!
//! [[checks]]
//! name = "coverage"
//! kind = "coverage"
//! command = "cargo llvm-cov --summary-only"
//!
//! [budgets]
//! default = 5
//! roles = { fixer = 4, test-writer = 3 }
//!
//! [team]
//! aggregation = "conjunction"
//! advisory_roles = ["docs-writer"]
//! integration_pass = true
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

use crate::errors::PolicyError;

/// Default policy written by `warden init`.
pub const DEFAULT_POLICY_TOML: &str = r#"version = "1"

[[guardrails]]
name = "private-key"
pattern = "-----BEGIN [A-Z ]*PRIVATE KEY-----"
target = "content"

[[guardrails]]
name = "env-file"
pattern = "(^|/)\\.env(\\..+)?$"
target = "path"

[thresholds]
max_files_changed = 50
max_lines_changed = 2000
protected_paths = [".warden/**", ".git/**"]

[[checks]]
name = "tests"
command = "cargo test --quiet"
timeout_secs = 900

[budgets]
default = 5

[team]
aggregation = "conjunction"
integration_pass = true
"#;

/// What a guardrail pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailTarget {
    Path,
    Content,
    #[default]
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailRule {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub target: GuardrailTarget,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum coverage percentage checked by `coverage` steps.
    #[serde(default)]
    pub min_coverage: Option<f64>,
    #[serde(default)]
    pub max_files_changed: Option<usize>,
    /// Added plus removed lines across all artifacts.
    #[serde(default)]
    pub max_lines_changed: Option<usize>,
    #[serde(default)]
    pub protected_paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    /// Passes when the command exits 0.
    #[default]
    Command,
    /// Passes when the command exits 0 and reports at least `min_coverage` percent.
    Coverage,
}

/// One ordered verification step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStep {
    pub name: String,
    #[serde(default)]
    pub kind: CheckKind,
    pub command: String,
    #[serde(default = "default_check_timeout")]
    pub timeout_secs: u64,
}

fn default_check_timeout() -> u64 {
    600
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Budgets {
    #[serde(default)]
    pub default: Option<u32>,
    #[serde(default)]
    pub roles: HashMap<String, u32>,
}

/// How per-role verdicts combine into the task verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Every role must pass.
    #[default]
    Conjunction,
    /// Only non-advisory roles must pass.
    GatingRoles,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamPolicy {
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub advisory_roles: Vec<String>,
    /// Re-verify the union of all roles' changes once every role passed.
    #[serde(default = "default_integration_pass")]
    pub integration_pass: bool,
}

fn default_integration_pass() -> bool {
    true
}

impl Default for TeamPolicy {
    fn default() -> Self {
        Self {
            aggregation: Aggregation::default(),
            advisory_roles: Vec::new(),
            integration_pass: default_integration_pass(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSettings {
    /// Extra attempts for a step whose runner fails (spawn error, timeout).
    #[serde(default = "default_infra_retries")]
    pub infra_retries: u32,
    /// Bytes of each step log kept in verdict audit artifacts.
    #[serde(default = "default_log_limit")]
    pub log_limit_bytes: usize,
}

fn default_infra_retries() -> u32 {
    2
}

fn default_log_limit() -> usize {
    64 * 1024
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            infra_retries: default_infra_retries(),
            log_limit_bytes: default_log_limit(),
        }
    }
}

/// The policy document as written on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub guardrails: Vec<GuardrailRule>,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub checks: Vec<CheckStep>,
    #[serde(default)]
    pub budgets: Budgets,
    #[serde(default)]
    pub team: TeamPolicy,
    #[serde(default)]
    pub verification: VerificationSettings,
}

#[derive(Debug, Clone)]
pub struct CompiledGuardrail {
    pub name: String,
    pub target: GuardrailTarget,
    pub regex: Regex,
}

/// A loaded, compiled, versioned policy. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct Policy {
    document: PolicyDocument,
    version_id: String,
    guardrails: Vec<CompiledGuardrail>,
    protected: Vec<glob::Pattern>,
}

impl Policy {
    /// Load a policy from a TOML file.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Load `policy.toml` from the warden directory, or the built-in default.
    pub fn load_or_default(warden_dir: &Path) -> Result<Self, PolicyError> {
        let path = warden_dir.join("policy.toml");
        if path.exists() {
            Self::load(&path)
        } else {
            Self::parse(DEFAULT_POLICY_TOML)
        }
    }

    pub fn parse(content: &str) -> Result<Self, PolicyError> {
        let document: PolicyDocument = toml::from_str(content).map_err(PolicyError::Parse)?;
        if document.version.trim().is_empty() {
            return Err(PolicyError::MissingVersion);
        }

        let mut guardrails = Vec::with_capacity(document.guardrails.len());
        for rule in &document.guardrails {
            let regex = Regex::new(&rule.pattern).map_err(|source| PolicyError::InvalidPattern {
                name: rule.name.clone(),
                source,
            })?;
            guardrails.push(CompiledGuardrail {
                name: rule.name.clone(),
                target: rule.target,
                regex,
            });
        }

        let mut protected = Vec::with_capacity(document.thresholds.protected_paths.len());
        for pattern in &document.thresholds.protected_paths {
            let compiled =
                glob::Pattern::new(pattern).map_err(|source| PolicyError::InvalidGlob {
                    pattern: pattern.clone(),
                    source,
                })?;
            protected.push(compiled);
        }

        let digest = Sha256::digest(content.as_bytes());
        let hash: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        let version_id = format!("{}+{}", document.version.trim(), &hash[..12]);

        Ok(Self {
            document,
            version_id,
            guardrails,
            protected,
        })
    }

    /// Declared version plus content hash, e.g. `1+3fa9c0d1e2b4`.
    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    pub fn document(&self) -> &PolicyDocument {
        &self.document
    }

    pub fn guardrails(&self) -> &[CompiledGuardrail] {
        &self.guardrails
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.document.thresholds
    }

    pub fn checks(&self) -> &[CheckStep] {
        &self.document.checks
    }

    pub fn team(&self) -> &TeamPolicy {
        &self.document.team
    }

    pub fn verification(&self) -> &VerificationSettings {
        &self.document.verification
    }

    /// First protected-path glob matching `path`, if any.
    pub fn protected_match(&self, path: &str) -> Option<&str> {
        self.protected
            .iter()
            .find(|p| p.matches(path))
            .map(|p| p.as_str())
    }

    /// Per-role budget, falling back to the policy default.
    pub fn role_budget(&self, role: &str) -> Option<u32> {
        self.document
            .budgets
            .roles
            .get(role)
            .copied()
            .or(self.document.budgets.default)
    }

    pub fn default_budget(&self) -> Option<u32> {
        self.document.budgets.default
    }

    pub fn is_advisory(&self, role: &str) -> bool {
        self.document.team.advisory_roles.iter().any(|r| r == role)
    }

    /// Non-fatal problems worth reporting from `warden policy validate`.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let doc = &self.document;

        if doc.checks.is_empty() {
            warnings.push("No checks defined: every non-blocked change will PASS".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for check in &doc.checks {
            if !seen.insert(check.name.as_str()) {
                warnings.push(format!("Duplicate check name '{}'", check.name));
            }
            if check.command.trim().is_empty() {
                warnings.push(format!("Check '{}' has an empty command", check.name));
            }
            if check.kind == CheckKind::Coverage && doc.thresholds.min_coverage.is_none() {
                warnings.push(format!(
                    "Coverage check '{}' has no thresholds.min_coverage to compare against",
                    check.name
                ));
            }
        }

        if let Some(min) = doc.thresholds.min_coverage
            && !(0.0..=100.0).contains(&min)
        {
            warnings.push(format!("min_coverage {} is outside 0..=100", min));
        }

        if doc.budgets.default == Some(0) {
            warnings.push("budgets.default is 0: tasks will block immediately".to_string());
        }
        for (role, budget) in &doc.budgets.roles {
            if *budget == 0 {
                warnings.push(format!("Role '{}' has a zero budget", role));
            }
        }

        if doc.team.aggregation == Aggregation::GatingRoles && doc.team.advisory_roles.is_empty()
        {
            warnings.push(
                "aggregation = \"gating_roles\" without advisory_roles behaves like conjunction"
                    .to_string(),
            );
        }

        warnings
    }
}
