//! `apply`: make the cloud match the program
//!
//! Also hosts the shared run used by `destroy`: lock, optional refresh,
//! plan, confirm, execute.

use anyhow::{Context as AnyhowContext, Result};
use declarative::{
    AutoConfirm, ConfirmCallback, ExecuteOptions, Graph, execute, refresh_snapshot,
};
use std::sync::Arc;

use super::{Outcome, Session};
use crate::Context;
use crate::cli::ApplyArgs;
use crate::engine::{self, PromptConfirm};
use crate::progress::ApplyProgress;
use crate::providers::{self, ComputeApi};
use crate::ui;

/// Knobs for one reconciliation run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub yes: bool,
    pub jobs: usize,
    pub refresh: bool,
    pub prompt: &'static str,
}

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<Outcome> {
    let session = Session::open(ctx)?;
    let api = session.compute()?;
    let graph = session.program(api.as_ref())?;

    let opts = RunOptions {
        yes: args.yes,
        jobs: args.jobs,
        refresh: args.refresh,
        prompt: "Apply these changes?",
    };
    if opts.yes {
        reconcile(ctx, &session, api, &graph, &opts, &mut AutoConfirm)
    } else {
        reconcile(ctx, &session, api, &graph, &opts, &mut PromptConfirm)
    }
}

/// Drive `graph` to completion against the stack's recorded state.
pub(crate) fn reconcile(
    ctx: &Context,
    session: &Session,
    api: Arc<dyn ComputeApi>,
    graph: &Graph,
    opts: &RunOptions,
    confirm: &mut dyn ConfirmCallback,
) -> Result<Outcome> {
    let registry = providers::registry(api);
    let mut store = session.store();
    let mut snapshot = store
        .load()
        .with_context(|| format!("Failed to load state for stack '{}'", session.stack))?;

    let mut drifted = false;
    if opts.refresh {
        let summary = refresh_snapshot(&mut snapshot, &registry)?;
        drifted = summary.has_drift();
        for name in &summary.removed {
            ui::warn(&format!("{name} no longer exists and will be recreated"));
        }
        if !summary.updated.is_empty() {
            ui::info(&format!("Refreshed {} resource(s)", summary.updated.len()));
        }
    }

    let plan = declarative::plan(graph, &snapshot, &registry)?;
    if !ctx.quiet {
        engine::display_plan(&plan);
    }

    if !plan.has_changes() && !drifted {
        if store.has_pending_journal() {
            log::info!("Writing changes recovered from an interrupted run");
            store.begin(snapshot)?.finalize()?;
        } else {
            store.abort();
        }
        return Ok(Outcome::NoChanges);
    }

    if plan.has_changes() && !confirm.confirm(opts.prompt)? {
        store.abort();
        println!();
        ui::warn("Aborted, nothing was changed");
        return Ok(Outcome::Declined);
    }

    let txn = store.begin(snapshot)?;
    let exec_opts = ExecuteOptions {
        jobs: opts.jobs,
        refresh: opts.refresh,
        abort: ctx.abort.clone(),
    };
    let mut progress = ApplyProgress::new(ctx.quiet);
    let report = execute(&plan, graph, &registry, txn, &exec_opts, &mut progress)?;

    engine::print_summary(&report);
    if !ctx.quiet {
        engine::print_outputs(&report.outputs);
    }

    Ok(if report.is_success() {
        Outcome::Done
    } else {
        Outcome::Failed
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use declarative::{AbortSignal, AutoDecline, Config, Snapshot};
    use std::path::Path;
    use tempfile::TempDir;

    pub(crate) fn context() -> Context {
        Context {
            verbose: 0,
            quiet: true,
            stack: "dev".into(),
            config_file: None,
            config_overrides: Vec::new(),
            simulate: true,
            detailed_exitcode: false,
            abort: AbortSignal::new(),
        }
    }

    pub(crate) fn session(state_dir: &Path, machine_type: &str) -> Session {
        let mut config = Config::from_toml_str(
            r#"
            [gcp]
            region = "europe-west1"
            zone = "europe-west1-b"

            [wp]
            networkName = "default"
            subnetName = "default"
            vmName = "wp-test"
            "#,
        )
        .unwrap();
        config.set("wp:machineType", machine_type);
        Session {
            stack: "dev".into(),
            config,
            state_dir: state_dir.to_path_buf(),
            simulate: true,
        }
    }

    pub(crate) fn apply(session: &Session) -> Outcome {
        let api = session.compute().unwrap();
        let graph = session.program(api.as_ref()).unwrap();
        let opts = RunOptions {
            yes: true,
            jobs: 2,
            refresh: false,
            prompt: "Apply?",
        };
        reconcile(&context(), session, api, &graph, &opts, &mut AutoConfirm).unwrap()
    }

    pub(crate) fn snapshot(session: &Session) -> Snapshot {
        session.store().read().unwrap()
    }

    #[test]
    fn test_apply_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path(), "e2-small");

        assert_eq!(apply(&session), Outcome::Done);
        let state = snapshot(&session);
        assert_eq!(state.len(), 2);
        let address = state.get("wp-test-addr").unwrap();
        assert_eq!(address.id, "regions/europe-west1/addresses/wp-test-ip");
        assert_eq!(state.outputs["vmName"], "wp-test");
        assert_eq!(state.outputs["vmIp"], address.outputs["address"]);

        assert_eq!(apply(&session), Outcome::NoChanges);
        assert_eq!(snapshot(&session), state);
    }

    #[test]
    fn test_recovered_journal_folded_in_without_changes() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path(), "e2-small");
        assert_eq!(apply(&session), Outcome::Done);

        // An interrupted run that committed without finalizing
        let mut store = session.store();
        let loaded = store.load().unwrap();
        let mut address = loaded.get("wp-test-addr").unwrap().clone();
        address.outputs.insert("note".into(), serde_json::json!("recovered"));
        let mut txn = store.begin(loaded).unwrap();
        txn.commit("wp-test-addr", address).unwrap();
        drop(txn);
        drop(store);
        assert!(session.store().has_pending_journal());

        assert_eq!(apply(&session), Outcome::NoChanges);
        assert!(!session.store().has_pending_journal());
        let state = session.store().read().unwrap();
        assert_eq!(state.get("wp-test-addr").unwrap().outputs["note"], "recovered");
    }

    #[test]
    fn test_machine_type_change_updates_in_place() {
        let dir = TempDir::new().unwrap();
        assert_eq!(apply(&session(dir.path(), "e2-small")), Outcome::Done);
        let before = snapshot(&session(dir.path(), "e2-small"));

        let resized = session(dir.path(), "e2-medium");
        assert_eq!(apply(&resized), Outcome::Done);
        let after = snapshot(&resized);

        let vm_before = before.get("wp-test").unwrap();
        let vm_after = after.get("wp-test").unwrap();
        assert_eq!(vm_after.id, vm_before.id);
        assert_eq!(vm_after.inputs["machineType"], "e2-medium");
        assert_eq!(
            vm_after.outputs["machineType"],
            "zones/europe-west1-b/machineTypes/e2-medium"
        );
        assert_eq!(after.get("wp-test-addr"), before.get("wp-test-addr"));
    }

    #[test]
    fn test_region_move_releases_address_before_deleting_it() {
        let dir = TempDir::new().unwrap();
        assert_eq!(apply(&session(dir.path(), "e2-small")), Outcome::Done);

        let mut moved = session(dir.path(), "e2-small");
        moved.config.set("gcp:region", "us-central1");
        moved.config.set("gcp:zone", "us-central1-a");
        assert_eq!(apply(&moved), Outcome::Done);

        let state = snapshot(&moved);
        let address = state.get("wp-test-addr").unwrap();
        assert_eq!(address.id, "regions/us-central1/addresses/wp-test-ip");
        assert_eq!(state.get("wp-test").unwrap().inputs["zone"], "us-central1-a");
        assert_eq!(state.outputs["vmIp"], address.outputs["address"]);
    }

    #[test]
    fn test_declined_run_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path(), "e2-small");
        let api = session.compute().unwrap();
        let graph = session.program(api.as_ref()).unwrap();
        let opts = RunOptions {
            yes: false,
            jobs: 1,
            refresh: false,
            prompt: "Apply?",
        };

        let outcome = reconcile(&context(), &session, api, &graph, &opts, &mut AutoDecline).unwrap();
        assert_eq!(outcome, Outcome::Declined);
        assert!(snapshot(&session).is_empty());
        assert!(session.store().load().is_ok());
    }

    #[test]
    fn test_refresh_recreates_missing_resources() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path(), "e2-small");
        assert_eq!(apply(&session), Outcome::Done);

        // Someone deletes the VM behind our back
        let api = session.compute().unwrap();
        api.delete(&"zones/europe-west1-b/instances/wp-test".parse().unwrap())
            .unwrap();

        let graph = session.program(api.as_ref()).unwrap();
        let opts = RunOptions {
            yes: true,
            jobs: 2,
            refresh: true,
            prompt: "Apply?",
        };
        let outcome = reconcile(&context(), &session, api, &graph, &opts, &mut AutoConfirm).unwrap();
        assert_eq!(outcome, Outcome::Done);
        assert!(snapshot(&session).get("wp-test").is_some());
    }
}
