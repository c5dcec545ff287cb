use crate::router::{RoutingAnalysis, RoutingDecision};
use crate::run_mode::RunMode;
use crate::task::{BlockReason, Task};
use crate::ui::icons::{BLOCKER, CHECK, CROSS, PAUSE, RUNNING, SEARCH, SPARKLE, TEAM};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal UI for a batch run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Task bar: how many tasks have reached a final state this batch
/// - Activity spinner: what the driver is working on right now
pub struct BatchUI {
    multi: MultiProgress,
    task_bar: ProgressBar,
    activity: ProgressBar,
    verbose: bool,
}

impl BatchUI {
    /// Create the UI. `total_tasks` sizes the task bar; pass the batch limit
    /// when one is set.
    pub fn new(total_tasks: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let task_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let task_bar = multi.add(ProgressBar::new(total_tasks));
        task_bar.set_style(task_style);
        task_bar.set_prefix(" Tasks");

        let activity_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let activity = multi.add(ProgressBar::new_spinner());
        activity.set_style(activity_style);
        activity.set_prefix("   Now");

        Self {
            multi,
            task_bar,
            activity,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn start_task(&self, task: &Task, analysis: &RoutingAnalysis) {
        let icon = match analysis.decision {
            RoutingDecision::MultiAgent => TEAM,
            _ => RUNNING,
        };
        self.task_bar
            .set_message(format!("{}: {}", style(&task.id).yellow(), task.description));
        self.activity.set_message(format!(
            "{}{} {}",
            icon,
            analysis.decision,
            style(format!("({})", analysis.matched_rule)).dim()
        ));
        self.activity.enable_steady_tick(Duration::from_millis(100));

        if analysis.decision == RoutingDecision::MultiAgent {
            self.print_line(format!(
                "{} {} roles: {}",
                TEAM,
                style(&task.id).bold(),
                analysis.roles.join(", ")
            ));
        }
        if self.verbose {
            self.print_line(format!("    {}", style(&analysis.rationale).dim()));
        }
    }

    pub fn task_completed(&self, id: &str, iterations: u32) {
        self.activity.set_message("");
        self.task_bar.inc(1);
        self.print_line(format!(
            "{} {} completed after {} iteration(s)",
            CHECK,
            style(id).green().bold(),
            iterations
        ));
    }

    pub fn task_blocked(&self, id: &str, reason: &BlockReason) {
        self.activity.set_message("");
        self.task_bar.inc(1);
        self.print_line(format!(
            "{} {} blocked ({}): {}",
            BLOCKER,
            style(id).red().bold(),
            reason.kind,
            reason.message
        ));
        if let Some(audit) = &reason.audit_ref {
            self.print_line(format!("    {}", style(format!("see {}", audit)).dim()));
        }
    }

    pub fn task_deferred(&self, id: &str, why: &str) {
        self.print_line(format!(
            "{} {} deferred: {}",
            PAUSE,
            style(id).yellow(),
            why
        ));
    }

    pub fn task_failed(&self, id: &str, error: &str) {
        self.activity.set_message("");
        self.print_line(format!("{} {} errored: {}", CROSS, style(id).red(), error));
    }

    /// The run mode stopped work mid-task; the task stays resumable.
    pub fn interrupted(&self, id: &str, mode: RunMode) {
        self.activity.set_message("");
        self.print_line(format!(
            "{} {} interrupted (run mode {}); it will resume next batch",
            PAUSE,
            style(id).yellow(),
            mode
        ));
    }

    pub fn dry_run_line(&self, task: &Task, analysis: &RoutingAnalysis, budget: u32) {
        let roles = if analysis.roles.is_empty() {
            String::new()
        } else {
            format!(" [{}]", analysis.roles.join(", "))
        };
        let flag = if analysis.low_confidence {
            style(" low confidence").yellow().to_string()
        } else {
            String::new()
        };
        self.print_line(format!(
            "{} {} -> {}{} budget {} est ${:.2}{}",
            SEARCH,
            style(&task.id).bold(),
            analysis.decision,
            roles,
            budget,
            analysis.cost_estimate,
            flag
        ));
    }

    /// Clear the bars and print the batch tally.
    pub fn finish(&self, completed: usize, blocked: usize, deferred: usize, interrupted: bool) {
        self.activity.finish_and_clear();
        self.task_bar.finish_and_clear();
        let line = format!(
            "{} Batch done: {} completed, {} blocked, {} deferred",
            SPARKLE,
            style(completed).green(),
            style(blocked).red(),
            deferred
        );
        self.print_line(line);
        if interrupted {
            self.print_line(format!(
                "{} Stopped early by the run mode",
                PAUSE
            ));
        }
    }
}
