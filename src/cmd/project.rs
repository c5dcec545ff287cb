//! Project initialization, `warden init`.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use warden::init::init_project;

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized warden project at {}",
            result.warden_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .warden/");
        println!("  ├── warden.toml   # Agent, team and router settings");
        println!("  ├── policy.toml   # Guardrails, checks, thresholds, budgets");
        println!("  ├── queue.json    # Task queue");
        println!("  ├── checkpoints/  # Resumable execution state");
        println!("  ├── archive/      # Checkpoints of finished tasks");
        println!("  ├── audit/runs/   # Audit trail");
        println!("  └── logs/         # Diagnostics and agent transcripts");
        println!();
        println!("Next steps:");
        println!("  1. Edit .warden/policy.toml to match your project's checks");
        println!("  2. Add tasks to .warden/queue.json");
        println!("  3. Run `warden run --dry-run` to preview routing, then `warden run`");
    } else {
        println!(
            "Warden project already initialized at {}",
            result.warden_dir.display()
        );
        for path in &result.written {
            println!("  restored {}", path.display());
        }
        println!("Directory structure verified.");
    }

    Ok(())
}
