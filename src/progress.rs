//! Terminal progress for apply runs.
//!
//! [`ApplyProgress`] receives the engine's progress callbacks and drives an
//! `indicatif` bar, printing one line per finished operation above it.

use colored::Colorize;
use declarative::{ExecuteSummary, OpStatus, OperationKind, OperationResult, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};

pub struct ApplyProgress {
    pb: ProgressBar,
    quiet: bool,
    running: Vec<String>,
}

impl ApplyProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            pb: ProgressBar::hidden(),
            quiet,
            running: Vec::new(),
        }
    }

    fn refresh_message(&self) {
        let msg = match self.running.as_slice() {
            [] => String::new(),
            [one] => one.clone(),
            [first, rest @ ..] => format!("{first} (+{} more)", rest.len()),
        };
        self.pb.set_message(msg);
    }
}

/// One-line rendering of a finished operation.
pub fn result_line(result: &OperationResult) -> String {
    let symbol = match result.status {
        OpStatus::Succeeded if result.operation == OperationKind::NoOp => "○".dimmed(),
        OpStatus::Succeeded => "✓".green(),
        OpStatus::Failed => "✗".red(),
        OpStatus::Skipped | OpStatus::Pending | OpStatus::Running => "⊘".yellow(),
    };
    let detail = result
        .message
        .as_deref()
        .map(|m| format!(" ({m})"))
        .unwrap_or_default();
    format!(
        "  {} {} {}{}",
        symbol,
        result.operation.verb(),
        result.name,
        detail.dimmed()
    )
}

impl ProgressCallback for ApplyProgress {
    fn on_apply_start(&mut self, total: usize) {
        if self.quiet {
            return;
        }
        self.pb = ProgressBar::new(total as u64);
        self.pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
    }

    fn on_operation_start(&mut self, name: &str, operation: OperationKind) {
        log::info!("{operation} {name}");
        self.running.push(format!("{} {name}", operation.verb()));
        self.refresh_message();
    }

    fn on_operation_complete(&mut self, result: &OperationResult) {
        let label = format!("{} {}", result.operation.verb(), result.name);
        self.running.retain(|r| *r != label);
        self.refresh_message();

        if !self.quiet && result.operation.is_change() {
            let line = result_line(result);
            self.pb.suspend(|| println!("{line}"));
        }
        self.pb.inc(1);
    }

    fn on_apply_complete(&mut self, _summary: &ExecuteSummary) {
        self.pb.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: OpStatus, message: Option<&str>) -> OperationResult {
        OperationResult {
            name: "wp-1".into(),
            operation: OperationKind::Create,
            status,
            message: message.map(str::to_string),
        }
    }

    #[test]
    fn test_result_line_mentions_reason() {
        colored::control::set_override(false);
        assert_eq!(result_line(&result(OpStatus::Succeeded, None)), "  ✓ create wp-1");
        assert_eq!(
            result_line(&result(OpStatus::Skipped, Some("dependency 'wp-1-addr' failed"))),
            "  ⊘ create wp-1 (dependency 'wp-1-addr' failed)"
        );
    }

    #[test]
    fn test_quiet_progress_tracks_running() {
        let mut progress = ApplyProgress::new(true);
        progress.on_apply_start(2);
        progress.on_operation_start("a", OperationKind::Create);
        progress.on_operation_start("b", OperationKind::Delete);
        assert_eq!(progress.running.len(), 2);

        progress.on_operation_complete(&OperationResult {
            name: "a".into(),
            operation: OperationKind::Create,
            status: OpStatus::Succeeded,
            message: None,
        });
        assert_eq!(progress.running, vec!["delete b".to_string()]);
    }
}
