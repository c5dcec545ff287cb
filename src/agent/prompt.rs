//! Prompt assembly for the CLI agent adapter.

use crate::agent::AgentContext;
use crate::checkpoint::CycleSummary;
use crate::verify::Verdict;

/// Feedback handed to the next cycle after a FAIL verdict.
///
/// Built with `with_*` calls; `build()` returns `None` when nothing was added.
#[derive(Debug, Default)]
pub struct IterationFeedback {
    sections: Vec<String>,
}

impl IterationFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_iteration_status(mut self, iteration: u32, budget: u32) -> Self {
        self.sections.push(format!(
            "Cycle {} of {} did not pass verification.",
            iteration, budget
        ));
        self
    }

    pub fn with_verdict(mut self, verdict: &Verdict) -> Self {
        if let Some(ref step) = verdict.failed_step {
            self.sections.push(format!("Failed check: {}", step));
        }
        if let Some(ref reason) = verdict.reason {
            self.sections.push(format!("Reason: {}", reason));
        }
        if !verdict.log_tail.trim().is_empty() {
            self.sections.push(format!(
                "Output (tail):\n```\n{}\n```",
                verdict.log_tail.trim_end()
            ));
        }
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.sections.push(note.into());
        self
    }

    pub fn build(self) -> Option<String> {
        if self.sections.is_empty() {
            None
        } else {
            Some(self.sections.join("\n"))
        }
    }
}

/// The full prompt for one invocation.
pub fn build_prompt(ctx: &AgentContext) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("You are working on task {}", ctx.task_id));
    if let Some(ref task_type) = ctx.task_type {
        prompt.push_str(&format!(" ({})", task_type));
    }
    prompt.push_str(".\n\n## TASK\n");
    prompt.push_str(ctx.description.trim());
    prompt.push('\n');

    if let Some(ref role) = ctx.role {
        prompt.push_str(&format!(
            "\n## ROLE\nYou are the {} specialist on this task. Other specialists work on the \
             remaining parts; stay within your role.\n",
            role
        ));
    }

    if !ctx.target_files.is_empty() {
        prompt.push_str("\n## TARGET FILES\n");
        for file in &ctx.target_files {
            prompt.push_str(&format!("- {}\n", file));
        }
    }
    if !ctx.test_files.is_empty() {
        prompt.push_str("\n## TESTS\n");
        for file in &ctx.test_files {
            prompt.push_str(&format!("- {}\n", file));
        }
    }

    if let Some(ref feedback) = ctx.feedback {
        prompt.push_str("\n## PREVIOUS ATTEMPT\n");
        prompt.push_str(feedback);
        prompt.push('\n');
    }

    if !ctx.recent.is_empty() {
        prompt.push_str("\n## RECENT CYCLES\n");
        for entry in &ctx.recent {
            prompt.push_str(&format_cycle(entry));
        }
    }

    if !ctx.hints.is_empty() {
        prompt.push_str("\n## HINTS (advisory)\n");
        for hint in &ctx.hints {
            prompt.push_str(&format!("- {}\n", hint));
        }
    }

    prompt.push_str(&format!(
        r#"
## CRITICAL RULES
1. Check existing code before making changes
2. Run the tests yourself before claiming completion
3. Your work is verified independently after this cycle; claiming completion is not enough
4. Only output <promise>{marker}</promise> when the task is FULLY complete

This is cycle {iteration} of {budget}.
"#,
        marker = ctx.completion_marker,
        iteration = ctx.iteration,
        budget = ctx.budget,
    ));

    prompt
}

fn format_cycle(entry: &CycleSummary) -> String {
    let verdict = entry
        .verdict
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "- cycle {}: {} ({} files changed)",
        entry.iteration, verdict, entry.files_changed
    );
    if !entry.note.is_empty() {
        line.push_str(&format!(": {}", entry.note));
    }
    line.push('\n');
    line
}
