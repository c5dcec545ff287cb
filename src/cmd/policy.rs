//! Policy inspection, `warden policy`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use super::super::PolicyCommands;

/// The serde name of a policy enum value.
fn label<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

pub fn cmd_policy(project_dir: &Path, command: Option<PolicyCommands>) -> Result<()> {
    use warden::init::get_warden_dir;
    use warden::policy::Policy;

    let warden_dir = get_warden_dir(project_dir);
    let policy_path = warden_dir.join("policy.toml");
    let source = if policy_path.exists() {
        policy_path.display().to_string()
    } else {
        "built-in default".to_string()
    };
    let policy = Policy::load_or_default(&warden_dir)
        .with_context(|| format!("Invalid policy ({})", source))?;

    match command {
        None | Some(PolicyCommands::Show) => {
            let doc = policy.document();
            println!();
            println!("Policy {} ({})", style(policy.version_id()).bold(), source);
            println!();

            println!("Guardrails:");
            for rule in &doc.guardrails {
                println!(
                    "  {:<20} {:<8} {}",
                    rule.name,
                    label(&rule.target),
                    rule.pattern
                );
            }

            let t = policy.thresholds();
            println!();
            println!("Thresholds:");
            let show = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
            println!("  min_coverage       {}", show(t.min_coverage.map(|c| format!("{}%", c))));
            println!("  max_files_changed  {}", show(t.max_files_changed.map(|n| n.to_string())));
            println!("  max_lines_changed  {}", show(t.max_lines_changed.map(|n| n.to_string())));
            if !t.protected_paths.is_empty() {
                println!("  protected_paths    {}", t.protected_paths.join(", "));
            }

            println!();
            println!("Checks (in order):");
            for (i, check) in policy.checks().iter().enumerate() {
                println!(
                    "  {}. {:<16} [{}] {} (timeout {}s)",
                    i + 1,
                    check.name,
                    label(&check.kind),
                    check.command,
                    check.timeout_secs
                );
            }

            println!();
            println!("Budgets:");
            println!(
                "  default  {}",
                policy
                    .default_budget()
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            let mut roles: Vec<_> = doc.budgets.roles.iter().collect();
            roles.sort();
            for (role, budget) in roles {
                println!("  {:<8} {}", role, budget);
            }

            let team = policy.team();
            println!();
            println!("Team:");
            println!(
                "  aggregation       {}",
                label(&team.aggregation)
            );
            println!("  integration_pass  {}", team.integration_pass);
            if !team.advisory_roles.is_empty() {
                println!("  advisory_roles    {}", team.advisory_roles.join(", "));
            }
            println!();
        }
        Some(PolicyCommands::Validate) => {
            println!();
            println!("Policy {} is loadable.", policy.version_id());
            let warnings = policy.validate();
            if warnings.is_empty() {
                println!("Policy is valid.");
            } else {
                println!("Policy warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
