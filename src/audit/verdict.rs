//! Per-verdict audit artifacts.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use super::ChangedArtifact;
use crate::verify::{BlockCause, StepResult, VerdictKind};

/// Everything needed to reconstruct why a verdict was issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictAudit {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// `cycle-NNNN` or `integration`
    pub label: String,
    pub policy_version: String,
    pub verdict: VerdictKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub matched_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<BlockCause>,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_after: Option<String>,
    pub artifacts: Vec<ChangedArtifact>,
    pub steps: BTreeMap<String, StepResult>,
    /// Captured output per step, truncated to the policy's log limit.
    pub step_logs: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Write `audit` under `<warden_dir>/audit/verdicts/` and return its path
/// relative to `warden_dir`. Existing artifacts are never replaced; a repeated
/// label gets a numeric suffix.
pub fn write_verdict_audit(warden_dir: &Path, audit: &VerdictAudit) -> Result<String> {
    let scope = audit.role.as_deref().unwrap_or("_task");
    let rel_dir = Path::new("audit")
        .join("verdicts")
        .join(&audit.task_id)
        .join(scope);
    let dir = warden_dir.join(&rel_dir);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create verdict audit dir {}", dir.display()))?;

    let json = serde_json::to_string_pretty(audit).context("Failed to serialize verdict audit")?;

    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{}.json", audit.label)
        } else {
            format!("{}-{}.json", audit.label, attempt)
        };
        let path = dir.join(&name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(json.as_bytes())
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                let rel = rel_dir.join(&name);
                return Ok(rel.to_string_lossy().replace('\\', "/"));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", path.display()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(label: &str, role: Option<&str>) -> VerdictAudit {
        VerdictAudit {
            task_id: "t-1".into(),
            role: role.map(String::from),
            label: label.into(),
            policy_version: "1+abc".into(),
            verdict: VerdictKind::Pass,
            failed_step: None,
            reason: None,
            matched_patterns: Vec::new(),
            cause: None,
            fingerprint: "f".into(),
            snapshot_before: Some("aaa".into()),
            snapshot_after: None,
            artifacts: Vec::new(),
            steps: BTreeMap::new(),
            step_logs: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_writes_under_task_scope() {
        let dir = tempdir().unwrap();
        let rel = write_verdict_audit(dir.path(), &sample("cycle-0001", None)).unwrap();
        assert_eq!(rel, "audit/verdicts/t-1/_task/cycle-0001.json");
        assert!(dir.path().join(&rel).exists());
    }

    #[test]
    fn test_role_scope_and_no_overwrite() {
        let dir = tempdir().unwrap();
        let first = write_verdict_audit(dir.path(), &sample("cycle-0002", Some("fixer"))).unwrap();
        let second = write_verdict_audit(dir.path(), &sample("cycle-0002", Some("fixer"))).unwrap();
        assert_eq!(first, "audit/verdicts/t-1/fixer/cycle-0002.json");
        assert_eq!(second, "audit/verdicts/t-1/fixer/cycle-0002-1.json");
    }
}
