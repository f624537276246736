//! Execution engine - applies a plan on a bounded worker pool
//!
//! The coordinator runs on the calling thread and owns the state
//! transaction. It hands ready phases to rayon workers and receives their
//! results over a channel, so every commit happens on one thread.

use crate::context::ProgressCallback;
use crate::error::{Error, ProviderError, Result};
use crate::graph::{Graph, Node};
use crate::planner::{Phase, Plan, Step};
use crate::provider::{ProviderRegistry, SharedProvider};
use crate::state::{StateRecord, Transaction};
use crate::types::{
    ApplyReport, ExecuteOptions, ExecuteSummary, OpStatus, OperationKind, OperationResult,
    PropertyDiff,
};
use crate::value::{OutputRef, OutputTable, Properties, resolve_all};
use chrono::Utc;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;

// ============================================================================
// Worker side
// ============================================================================

/// What a worker reports back to the coordinator.
struct Finished {
    index: usize,
    result: std::result::Result<Applied, String>,
}

/// A successful provider call.
enum Applied {
    Created {
        id: String,
        inputs: Properties,
        outputs: Properties,
    },
    Updated {
        inputs: Properties,
        outputs: Properties,
    },
    Deleted,
}

/// Provider call made by one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Create,
    Update,
    Delete,
}

/// Everything a worker needs, owned so it can move to the pool.
struct Task {
    index: usize,
    name: String,
    /// Operation this call belongs to, for error messages
    operation: &'static str,
    action: Action,
    provider: SharedProvider,
    prior: Option<StateRecord>,
    inputs: Properties,
}

impl Task {
    fn run(&self) -> std::result::Result<Applied, String> {
        match self.action {
            Action::Create => {
                let created = self.provider.create(&self.inputs).map_err(|e| self.failed(e))?;
                Ok(Applied::Created {
                    id: created.id,
                    inputs: self.inputs.clone(),
                    outputs: created.outputs,
                })
            }
            Action::Update => {
                let prior = self.prior()?;
                let diff = PropertyDiff::between(&prior.inputs, &self.inputs);
                self.provider
                    .update(&prior.id, &prior.inputs, &self.inputs, &diff)
                    .map(|outputs| Applied::Updated {
                        inputs: self.inputs.clone(),
                        outputs,
                    })
                    .map_err(|e| self.failed(e))
            }
            Action::Delete => {
                let prior = self.prior()?;
                match self.provider.delete(&prior.id) {
                    Err(e) if e.is_not_found() => {
                        log::warn!("{}: {} was already gone", self.name, prior.id);
                        Ok(Applied::Deleted)
                    }
                    Err(e) => Err(self.failed(e)),
                    Ok(()) => Ok(Applied::Deleted),
                }
            }
        }
    }

    fn prior(&self) -> std::result::Result<&StateRecord, String> {
        self.prior
            .as_ref()
            .ok_or_else(|| format!("no recorded resource for '{}'", self.name))
    }

    fn failed(&self, source: ProviderError) -> String {
        Error::Provider {
            resource: self.name.clone(),
            operation: self.operation,
            source,
        }
        .to_string()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

// ============================================================================
// Coordinator
// ============================================================================

enum Readiness {
    Waiting,
    Ready,
    /// A prerequisite failed or was skipped
    Blocked(usize),
}

/// Where a step is in its phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Next(Phase),
    InFlight(Phase),
    Settled,
}

struct Coordinator<'a, 't, P> {
    plan: &'a Plan,
    graph: &'a Graph,
    txn: Transaction<'t>,
    outputs: OutputTable,
    status: Vec<OpStatus>,
    stage: Vec<Stage>,
    /// Recorded resource deleted and removed from state
    removed: Vec<bool>,
    results: Vec<Option<OperationResult>>,
    progress: &'a mut P,
}

impl<'a, P: ProgressCallback> Coordinator<'a, '_, P> {
    fn steps(&self) -> &'a [Step] {
        self.plan.steps()
    }

    fn phase_done(&self, i: usize, phase: Phase) -> bool {
        match phase {
            Phase::Remove => self.removed[i],
            Phase::Apply => self.status[i] == OpStatus::Succeeded,
        }
    }

    fn readiness(&self, i: usize, phase: Phase) -> Readiness {
        let mut ready = true;
        for (d, p) in self.plan.prerequisites(i, phase) {
            if self.phase_done(d, p) {
                continue;
            }
            match self.status[d] {
                OpStatus::Failed | OpStatus::Skipped => return Readiness::Blocked(d),
                _ => ready = false,
            }
        }
        if ready {
            Readiness::Ready
        } else {
            Readiness::Waiting
        }
    }

    fn start(&mut self, i: usize, phase: Phase) {
        let op = &self.steps()[i].operation;
        if self.status[i] == OpStatus::Pending {
            log::info!("{} {}", op.kind.verb(), op.name);
            self.status[i] = OpStatus::Running;
            self.progress.on_operation_start(&op.name, op.kind);
        } else {
            log::debug!("{}: creating replacement", op.name);
        }
        self.stage[i] = Stage::InFlight(phase);
    }

    fn finish(&mut self, i: usize, status: OpStatus, message: Option<String>) {
        let op = &self.steps()[i].operation;
        match (status, &message) {
            (OpStatus::Failed, Some(m)) => log::error!("{m}"),
            (OpStatus::Skipped, Some(m)) => log::warn!("Skipped {}: {m}", op.name),
            _ => log::debug!("{}: {} done", op.name, op.kind),
        }

        let result = OperationResult {
            name: op.name.clone(),
            operation: op.kind,
            status,
            message,
        };
        self.status[i] = status;
        self.stage[i] = Stage::Settled;
        self.progress.on_operation_complete(&result);
        self.results[i] = Some(result);
    }

    /// Skip a step that will not run, noting a replacement left half done.
    fn skip(&mut self, i: usize, mut message: String) {
        if self.removed[i] {
            message.push_str("; the old resource was already deleted");
        }
        self.finish(i, OpStatus::Skipped, Some(message));
    }

    fn skip_blocked(&mut self, i: usize, dep: usize) {
        let name = &self.steps()[dep].operation.name;
        let message = if self.status[dep] == OpStatus::Failed {
            format!("dependency '{name}' failed")
        } else {
            format!("dependency '{name}' was skipped")
        };
        self.skip(i, message);
    }

    /// Publish the recorded outputs of an unchanged resource.
    fn complete_noop(&mut self, i: usize) {
        let op = &self.steps()[i].operation;
        let Some(prior) = op.prior.as_ref() else {
            let message = format!("no recorded resource for '{}'", op.name);
            self.finish(i, OpStatus::Failed, Some(message));
            return;
        };

        let protect = self.graph.node(&op.name).is_some_and(Node::is_protected);
        if protect != prior.protect {
            let mut record = prior.clone();
            record.protect = protect;
            if let Err(e) = self.txn.commit(&op.name, record) {
                self.finish(i, OpStatus::Failed, Some(e.to_string()));
                return;
            }
        }

        self.outputs.resolve(&op.name, prior.outputs.clone());
        self.finish(i, OpStatus::Succeeded, None);
    }

    /// Build the provider call for one phase of a step.
    ///
    /// Removal goes to the provider of the recorded kind, which differs from
    /// the declared one when a replacement changes kind.
    fn task(
        &self,
        i: usize,
        phase: Phase,
        providers: &ProviderRegistry,
    ) -> std::result::Result<Task, String> {
        let op = &self.steps()[i].operation;
        let (action, kind) = match (phase, op.kind) {
            (Phase::Remove, _) => {
                let prior = op
                    .prior
                    .as_ref()
                    .ok_or_else(|| format!("no recorded resource for '{}'", op.name))?;
                (Action::Delete, prior.kind.as_str())
            }
            (Phase::Apply, OperationKind::Create | OperationKind::Replace) => {
                (Action::Create, op.resource_type.as_str())
            }
            (Phase::Apply, OperationKind::Update) => (Action::Update, op.resource_type.as_str()),
            (Phase::Apply, OperationKind::NoOp | OperationKind::Delete) => {
                return Err(format!("'{}' has nothing to apply", op.name));
            }
        };
        let provider = providers
            .require(kind, &op.name)
            .map_err(|e| e.to_string())?;

        let inputs = match self.graph.node(&op.name) {
            Some(node) if action != Action::Delete => {
                resolve_all(node.inputs(), &|r: &OutputRef| self.outputs.lookup(r)).map_err(|r| {
                    format!("'{}' references output {r}, which is not available", op.name)
                })?
            }
            _ => Properties::new(),
        };

        Ok(Task {
            index: i,
            name: op.name.clone(),
            operation: op.kind.verb(),
            action,
            provider: SharedProvider::clone(provider),
            prior: op.prior.clone(),
            inputs,
        })
    }

    fn record(&self, i: usize, id: String, inputs: Properties, outputs: Properties) -> StateRecord {
        let op = &self.steps()[i].operation;
        StateRecord {
            name: op.name.clone(),
            kind: op.resource_type.clone(),
            id,
            inputs,
            outputs,
            dependencies: self
                .graph
                .dependencies(&op.name)
                .into_iter()
                .map(str::to_string)
                .collect(),
            protect: self.graph.node(&op.name).is_some_and(Node::is_protected),
            updated_at: Utc::now(),
        }
    }

    fn complete(&mut self, i: usize, result: std::result::Result<Applied, String>) {
        let applied = match result {
            Ok(applied) => applied,
            Err(message) => {
                self.finish(i, OpStatus::Failed, Some(message));
                return;
            }
        };

        let op = &self.steps()[i].operation;
        let committed = match applied {
            Applied::Deleted => match self.txn.remove(&op.name) {
                Ok(_) => {
                    self.removed[i] = true;
                    if op.kind == OperationKind::Replace {
                        log::debug!("{}: old resource removed from state", op.name);
                        self.stage[i] = Stage::Next(Phase::Apply);
                        return;
                    }
                    Ok(None)
                }
                Err(e) => Err(e),
            },
            Applied::Created {
                id,
                inputs,
                outputs,
            } => {
                let record = self.record(i, id, inputs, outputs.clone());
                self.txn.commit(&op.name, record).map(|()| Some(outputs))
            }
            Applied::Updated { inputs, outputs } => {
                let id = op.prior.as_ref().map(|p| p.id.clone()).unwrap_or_default();
                let record = self.record(i, id, inputs, outputs.clone());
                self.txn.commit(&op.name, record).map(|()| Some(outputs))
            }
        };

        match committed {
            Ok(outputs) => {
                if let Some(outputs) = outputs {
                    self.outputs.resolve(&op.name, outputs);
                }
                self.finish(i, OpStatus::Succeeded, None);
            }
            Err(e) => {
                let message = format!("{} of '{}' could not be recorded: {e}", op.kind, op.name);
                self.finish(i, OpStatus::Failed, Some(message));
            }
        }
    }
}

/// Apply a plan, committing each successful operation to `txn`.
///
/// Provider failures are reported per operation in the returned
/// [`ApplyReport`]; only a failure to start the worker pool or to finalize
/// the state is returned as an error. Operations that fail or are skipped
/// leave their dependents skipped while independent operations continue.
///
/// # Arguments
/// * `plan` - Ordered operations from [`crate::planner::plan`]
/// * `graph` - The graph the plan was built from; used to resolve inputs
/// * `providers` - Providers for every kind in the plan and in its prior records
/// * `txn` - Open state transaction; finalized before returning
/// * `opts` - Pool size, refresh flag and abort signal
/// * `progress` - Progress callback
pub fn execute<P: ProgressCallback>(
    plan: &Plan,
    graph: &Graph,
    providers: &ProviderRegistry,
    txn: Transaction<'_>,
    opts: &ExecuteOptions,
    progress: &mut P,
) -> Result<ApplyReport> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs.max(1))
        .thread_name(|i| format!("apply-{i}"))
        .build()
        .map_err(|e| Error::WorkerPool {
            message: e.to_string(),
        })?;

    let steps = plan.steps();
    let mut coord = Coordinator {
        plan,
        graph,
        txn,
        outputs: OutputTable::new(graph.nodes().iter().map(Node::name)),
        status: vec![OpStatus::Pending; steps.len()],
        stage: steps.iter().map(|s| Stage::Next(s.phases()[0])).collect(),
        removed: vec![false; steps.len()],
        results: vec![None; steps.len()],
        progress,
    };
    let (tx, rx) = mpsc::channel::<Finished>();
    let mut running = 0usize;
    let mut aborted = false;

    log::info!(
        "Executing {} operations on {} workers{}",
        steps.len(),
        opts.jobs.max(1),
        if opts.refresh { " (refreshed state)" } else { "" }
    );
    coord.progress.on_apply_start(steps.len());

    loop {
        if !aborted && opts.abort.is_aborted() {
            log::warn!("Abort requested; waiting for {running} running operation(s)");
            aborted = true;
        }

        // No-ops and skips settle immediately and may unblock more steps
        let mut settled = true;
        while settled {
            settled = false;
            for i in 0..steps.len() {
                let Stage::Next(phase) = coord.stage[i] else {
                    continue;
                };
                match coord.readiness(i, phase) {
                    Readiness::Waiting => continue,
                    Readiness::Blocked(dep) => coord.skip_blocked(i, dep),
                    Readiness::Ready if aborted => coord.skip(i, "run aborted".into()),
                    Readiness::Ready
                        if phase == Phase::Apply
                            && steps[i].operation.kind == OperationKind::NoOp =>
                    {
                        coord.complete_noop(i);
                    }
                    Readiness::Ready => match coord.task(i, phase, providers) {
                        Ok(task) => {
                            coord.start(i, phase);
                            running += 1;
                            let tx = tx.clone();
                            pool.spawn(move || {
                                let result = panic::catch_unwind(AssertUnwindSafe(|| task.run()))
                                    .unwrap_or_else(|payload| {
                                        Err(format!(
                                            "{} of '{}' panicked: {}",
                                            task.operation,
                                            task.name,
                                            panic_message(payload.as_ref())
                                        ))
                                    });
                                let finished = Finished {
                                    index: task.index,
                                    result,
                                };
                                if tx.send(finished).is_err() {
                                    log::error!(
                                        "Result for '{}' arrived after the run ended",
                                        task.name
                                    );
                                }
                            });
                        }
                        Err(message) => coord.finish(i, OpStatus::Failed, Some(message)),
                    },
                }
                settled = true;
            }
        }

        if running == 0 {
            break;
        }

        // tx is held here, so recv only returns once a worker reports
        let Ok(Finished { index, result }) = rx.recv() else {
            break;
        };
        running -= 1;
        coord.complete(index, result);
    }

    for i in 0..steps.len() {
        if !coord.status[i].is_terminal() {
            coord.skip(i, "run aborted".into());
        }
    }

    let mut exports = BTreeMap::new();
    for (key, input) in graph.exports() {
        match input.resolve(&|r: &OutputRef| coord.outputs.lookup(r)) {
            Ok(value) => {
                exports.insert(key.clone(), value);
            }
            Err(r) => log::warn!("Export '{key}' omitted: {r} is not available"),
        }
    }

    let Coordinator {
        mut txn,
        results,
        progress,
        ..
    } = coord;
    let results: Vec<OperationResult> = results.into_iter().flatten().collect();
    let mut summary = ExecuteSummary::default();
    for result in &results {
        summary.add_result(result);
    }
    progress.on_apply_complete(&summary);

    txn.set_outputs(exports.clone());
    txn.finalize()?;

    Ok(ApplyReport {
        results,
        outputs: exports,
        summary,
        aborted,
    })
}
