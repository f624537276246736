//! Confirmation and result reporting around the engine's executor

use anyhow::Result;
use colored::Colorize;
use declarative::{ApplyReport, ConfirmCallback, ExecuteSummary};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::ui;

/// Interactive confirmation via `dialoguer`
pub struct PromptConfirm;

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        use dialoguer::Confirm;

        let confirmed = Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()?;

        Ok(confirmed)
    }
}

/// Lines describing what a run did, one per non-zero count.
pub fn summary_lines(summary: &ExecuteSummary) -> Vec<String> {
    [
        (summary.created, "created"),
        (summary.updated, "updated"),
        (summary.replaced, "replaced"),
        (summary.deleted, "deleted"),
        (summary.no_op, "unchanged"),
        (summary.skipped, "skipped"),
        (summary.failed, "failed"),
    ]
    .into_iter()
    .filter(|(count, _)| *count > 0)
    .map(|(count, label)| {
        let noun = if count == 1 { "resource" } else { "resources" };
        format!("{count} {noun} {label}")
    })
    .collect()
}

/// Print final summary
pub fn print_summary(report: &ApplyReport) {
    println!();
    if report.aborted {
        println!("  {} Run interrupted; pending operations were skipped", "⚠".yellow().bold());
    } else if report.is_success() {
        println!("  {} Stack is up to date", "✓".green().bold());
    } else {
        println!("  {} Apply finished with errors", "⚠".yellow().bold());
    }

    for line in summary_lines(&report.summary) {
        println!("    • {line}");
    }

    let errors: Vec<_> = report.errors().collect();
    if !errors.is_empty() {
        ui::section("Errors");
        for (name, message) in errors {
            println!("  {} {}: {}", "✗".red(), name.bold(), message);
        }
    }
}

/// Print exported values
pub fn print_outputs(outputs: &BTreeMap<String, Value>) {
    if outputs.is_empty() {
        return;
    }
    ui::section("Outputs");
    for (key, value) in outputs {
        ui::kv(key, &ui::format_value(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_lines() {
        let summary = ExecuteSummary {
            created: 2,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(
            summary_lines(&summary),
            vec!["2 resources created", "1 resource failed"]
        );
        assert!(summary_lines(&ExecuteSummary::default()).is_empty());
    }
}
