//! Configuration view and validation commands, `warden config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use warden::init::get_warden_dir;
    use warden::run_mode::{KillSwitch, RUN_MODE_ENV, RunModeSource};
    use warden::warden_config::{AGENT_CMD_ENV, WardenToml};

    let warden_dir = get_warden_dir(project_dir);
    let config_path = warden_dir.join("warden.toml");

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Warden Configuration");
            println!("====================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                WardenToml::load(&config_path)?
            } else {
                println!("No warden.toml found at {}; using defaults.", config_path.display());
                WardenToml::default()
            };
            println!();

            println!("[agent]");
            if let Some(ref cmd) = toml.agent.command {
                println!("  command = \"{}\"", cmd);
            }
            println!("  args = {:?}", toml.agent.args);
            println!("  timeout_secs = {}", toml.agent.timeout_secs);
            println!("  grace_secs = {}", toml.agent.grace_secs);
            println!("  poll_interval_ms = {}", toml.agent.poll_interval_ms);
            println!();

            println!("[team]");
            println!("  role_timeout_secs = {}", toml.team.role_timeout_secs);
            println!("  isolate_roles = {}", toml.team.isolate_roles);
            println!();

            println!("[checkpoints]");
            println!("  recent_window = {}", toml.checkpoints.recent_window);
            println!();

            println!("[router]");
            println!("  value_threshold = {}", toml.router.value_threshold);
            println!("  multi_agent_flags = {:?}", toml.router.multi_agent_flags);
            println!("  cost_per_iteration = {}", toml.router.cost_per_iteration);
            println!("  default_roles = {:?}", toml.router.default_roles);
            let mut roles: Vec<_> = toml.router.roles.iter().collect();
            roles.sort();
            for (task_type, list) in roles {
                println!("  roles.{} = {:?}", task_type, list);
            }
            println!();

            println!("Effective values (with env overrides):");
            println!("  agent command = \"{}\"", toml.agent_command());
            let mode = KillSwitch::new(Some(warden_dir.join("run_mode"))).current();
            println!("  run mode = {}", mode);
            for var in [AGENT_CMD_ENV, RUN_MODE_ENV] {
                if let Ok(value) = std::env::var(var) {
                    println!("  {} = \"{}\"", var, value);
                }
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No warden.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = WardenToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
