//! Plan display

use crate::ui;
use colored::{ColoredString, Colorize};
use declarative::{Operation, OperationKind, Plan, Planned, group_by_type};

const VALUE_WIDTH: usize = 40;

fn symbol(kind: OperationKind) -> ColoredString {
    match kind {
        OperationKind::Create => kind.symbol().green(),
        OperationKind::Delete => kind.symbol().red(),
        OperationKind::Update => kind.symbol().yellow(),
        OperationKind::Replace => kind.symbol().magenta(),
        OperationKind::NoOp => kind.symbol().dimmed(),
    }
}

/// `gcp:compute/instance:Instance` -> `Instance`
fn type_name(resource_type: &str) -> &str {
    resource_type.rsplit(':').next().unwrap_or(resource_type)
}

/// Old and new values of every changed key.
fn change_lines(op: &Operation) -> Vec<String> {
    let Some(prior) = &op.prior else {
        return Vec::new();
    };
    op.diff
        .keys()
        .into_iter()
        .map(|key| {
            let old = prior
                .inputs
                .get(key)
                .map_or_else(|| "(unset)".to_string(), ui::format_value);
            let new = match op.inputs.get(key) {
                Some(Planned::Known(value)) => ui::format_value(value),
                Some(Planned::Unknown) => "(known after apply)".to_string(),
                None => "(unset)".to_string(),
            };
            format!(
                "{}: {} → {}",
                key,
                ui::truncate(&old, VALUE_WIDTH),
                ui::truncate(&new, VALUE_WIDTH)
            )
        })
        .collect()
}

/// Render the plan, grouped by resource type.
pub fn plan_lines(plan: &Plan) -> Vec<String> {
    let mut lines = Vec::new();
    let operations = plan.ordered().map(|step| &step.operation);

    for (resource_type, ops) in group_by_type(operations) {
        lines.push(format!("│ {}", type_name(resource_type).bold()));
        for op in ops {
            let verb = if op.kind == OperationKind::NoOp {
                String::new()
            } else {
                format!("({})", op.kind.verb())
            };
            lines.push(format!("│   {} {:<30} {}", symbol(op.kind), op.name, verb.dimmed()));
            if matches!(op.kind, OperationKind::Update | OperationKind::Replace) {
                for change in change_lines(op) {
                    lines.push(format!("│       {}", change.dimmed()));
                }
            }
        }
        lines.push("│".to_string());
    }
    lines
}

/// Print the plan and its summary.
pub fn display_plan(plan: &Plan) {
    let summary = plan.summary();
    if !summary.has_changes() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Plan".bold()
    );
    println!("│");
    for line in plan_lines(plan) {
        println!("{line}");
    }
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} to create, {} to update, {} to replace, {} to delete, {} unchanged",
        summary.creates.to_string().green(),
        summary.updates.to_string().yellow(),
        summary.replaces.to_string().magenta(),
        summary.deletes.to_string().red(),
        summary.same.to_string().dimmed()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{self, SimulatedCompute};
    use chrono::Utc;
    use declarative::{GraphBuilder, Input, Snapshot, StateRecord, inputs};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_type_name() {
        assert_eq!(type_name(providers::INSTANCE_KIND), "Instance");
        assert_eq!(type_name("plain"), "plain");
    }

    fn record(name: &str, kind: &str, inputs: &[(&str, &str)]) -> StateRecord {
        StateRecord {
            name: name.into(),
            kind: kind.into(),
            id: format!("id/{name}"),
            inputs: inputs.iter().map(|(k, v)| (k.to_string(), json!(v))).collect(),
            outputs: [("address".to_string(), json!("1.2.3.4"))].into_iter().collect(),
            dependencies: Vec::new(),
            protect: false,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_pending_reference_shown_as_known_after_apply() {
        colored::control::set_override(false);
        let dir = TempDir::new().unwrap();
        let registry = providers::registry(Arc::new(SimulatedCompute::open(dir.path().join("c.json"))));

        let mut builder = GraphBuilder::new();
        let ip = builder
            .declare(providers::ADDRESS_KIND, "ip", inputs([("description", "new")]))
            .unwrap();
        builder
            .declare(
                providers::INSTANCE_KIND,
                "wp-1",
                inputs([("natIp", Input::from(ip.output("address")))]),
            )
            .unwrap();
        let graph = builder.finalize().unwrap();

        let mut snapshot = Snapshot::new("dev");
        for r in [
            record("ip", providers::ADDRESS_KIND, &[("description", "old")]),
            record("wp-1", providers::INSTANCE_KIND, &[("natIp", "1.2.3.4")]),
        ] {
            snapshot.resources.insert(r.name.clone(), r);
        }

        let plan = declarative::plan(&graph, &snapshot, &registry).unwrap();
        let lines = plan_lines(&plan);
        assert!(lines.contains(&"│       description: old → new".to_string()), "{lines:?}");
        assert!(
            lines.contains(&"│       natIp: 1.2.3.4 → (known after apply)".to_string()),
            "{lines:?}"
        );
    }

    #[test]
    fn test_update_lines_show_values() {
        colored::control::set_override(false);
        let dir = TempDir::new().unwrap();
        let registry = providers::registry(Arc::new(SimulatedCompute::open(dir.path().join("c.json"))));

        let mut builder = GraphBuilder::new();
        builder
            .declare(
                providers::INSTANCE_KIND,
                "wp-1",
                inputs([("machineType", "e2-medium")]),
            )
            .unwrap();
        let graph = builder.finalize().unwrap();

        let mut snapshot = Snapshot::new("dev");
        snapshot.resources.insert(
            "wp-1".into(),
            StateRecord {
                name: "wp-1".into(),
                kind: providers::INSTANCE_KIND.into(),
                id: "zones/z/instances/wp-1".into(),
                inputs: [("machineType".to_string(), json!("e2-small"))].into_iter().collect(),
                outputs: Default::default(),
                dependencies: Vec::new(),
                protect: false,
                updated_at: Utc::now(),
            },
        );

        let plan = declarative::plan(&graph, &snapshot, &registry).unwrap();
        let lines = plan_lines(&plan);
        assert_eq!(lines[0], "│ Instance");
        assert!(lines[1].contains("~ wp-1") && lines[1].ends_with("(update)"));
        assert_eq!(lines[2], "│       machineType: e2-small → e2-medium");
    }
}
