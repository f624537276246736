//! Execution planner - orders operations by their dependencies
//!
//! Every step has one or two phases. Deleting a recorded resource is the
//! remove phase; creating, updating or confirming a declared one is the
//! apply phase, and a replacement has both. Apply phases wait for the
//! apply phases of their graph dependencies. Remove phases run in reverse:
//! a recorded resource is only deleted after everything that depended on
//! it has been deleted or moved away.

use crate::diff::{DiffSummary, Operation, compute_operations};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::provider::ProviderRegistry;
use crate::state::Snapshot;
use crate::types::OperationKind;
use std::collections::{BTreeSet, HashMap};

/// Half of an operation's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Delete the recorded resource
    Remove,
    /// Create, update or confirm the declared resource
    Apply,
}

/// One operation and the steps it must wait for.
#[derive(Debug, Clone)]
pub struct Step {
    pub operation: Operation,
    /// Steps whose apply phase must succeed before this step applies.
    /// Indices into [`Plan::steps`].
    pub waits_for: BTreeSet<usize>,
    /// Steps that must let go of this step's recorded resource before it
    /// is removed
    pub released_by: BTreeSet<usize>,
}

impl Step {
    /// Phases in execution order.
    pub fn phases(&self) -> &'static [Phase] {
        match self.operation.kind {
            OperationKind::Delete => &[Phase::Remove],
            OperationKind::Replace => &[Phase::Remove, Phase::Apply],
            _ => &[Phase::Apply],
        }
    }

    /// The phase after which this step no longer holds its recorded resource.
    pub fn release_phase(&self) -> Phase {
        self.phases()[0]
    }
}

/// The ordered set of operations for one run.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    steps: Vec<Step>,
    /// A constraint-respecting order of phases
    sequence: Vec<(usize, Phase)>,
}

impl Plan {
    /// Attach ordering constraints to a list of operations.
    ///
    /// Fails with [`Error::PlanConflict`] if two operations target the same
    /// resource or the constraints cannot be satisfied.
    pub fn build(graph: &Graph, snapshot: &Snapshot, operations: Vec<Operation>) -> Result<Self> {
        let mut index: HashMap<String, usize> = HashMap::with_capacity(operations.len());
        for (i, op) in operations.iter().enumerate() {
            if index.insert(op.name.clone(), i).is_some() {
                return Err(Error::PlanConflict {
                    message: format!("more than one operation targets '{}'", op.name),
                });
            }
        }
        let targets: Vec<(String, OperationKind)> = operations
            .iter()
            .map(|op| (op.name.clone(), op.kind))
            .collect();

        // A dependent kept in place still references the resource and can
        // only apply after it, so it cannot release it first
        let releases = |j: usize, name: &str| {
            let (dependent, kind) = &targets[j];
            matches!(kind, OperationKind::Delete | OperationKind::Replace)
                || !graph.dependencies(dependent).contains(&name)
        };

        let steps: Vec<Step> = operations
            .into_iter()
            .map(|operation| {
                let name = operation.name.as_str();
                let waits_for = if operation.kind == OperationKind::Delete {
                    BTreeSet::new()
                } else {
                    graph
                        .dependencies(name)
                        .into_iter()
                        .filter_map(|dep| index.get(dep).copied())
                        .collect()
                };
                let released_by =
                    if matches!(operation.kind, OperationKind::Delete | OperationKind::Replace) {
                        snapshot
                            .dependents_of(name)
                            .into_iter()
                            .filter_map(|dep| index.get(dep).copied())
                            .filter(|&j| releases(j, name))
                            .collect()
                    } else {
                        BTreeSet::new()
                    };
                Step {
                    operation,
                    waits_for,
                    released_by,
                }
            })
            .collect();

        let sequence = sort(&steps)?;
        Ok(Self { steps, sequence })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.operation.name == name)
    }

    /// Phases that must finish before `phase` of step `i` may start.
    pub fn prerequisites(&self, i: usize, phase: Phase) -> Vec<(usize, Phase)> {
        prerequisites(&self.steps, i, phase)
    }

    /// Every phase in an order that respects every constraint.
    pub fn sequence(&self) -> impl Iterator<Item = (&Step, Phase)> {
        self.sequence.iter().map(|&(i, phase)| (&self.steps[i], phase))
    }

    /// Steps in the order their first phase runs.
    pub fn ordered(&self) -> impl Iterator<Item = &Step> {
        self.sequence
            .iter()
            .filter(|&&(i, phase)| self.steps[i].phases()[0] == phase)
            .map(|&(i, _)| &self.steps[i])
    }

    /// Groups of steps that may start concurrently, earliest first.
    pub fn waves(&self) -> Vec<Vec<&Step>> {
        let mut level: HashMap<(usize, Phase), usize> = HashMap::with_capacity(self.sequence.len());
        let mut waves: Vec<Vec<&Step>> = Vec::new();
        for &(i, phase) in &self.sequence {
            let l = self
                .prerequisites(i, phase)
                .iter()
                .map(|p| level.get(p).map_or(0, |l| l + 1))
                .max()
                .unwrap_or(0);
            level.insert((i, phase), l);
            if self.steps[i].phases()[0] != phase {
                continue;
            }
            if waves.len() <= l {
                waves.resize_with(l + 1, Vec::new);
            }
            waves[l].push(&self.steps[i]);
        }
        waves
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_operations(self.steps.iter().map(|s| &s.operation))
    }

    pub fn has_changes(&self) -> bool {
        self.summary().has_changes()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Diff the graph against the snapshot and order the result.
pub fn plan(graph: &Graph, snapshot: &Snapshot, providers: &ProviderRegistry) -> Result<Plan> {
    let operations = compute_operations(graph, snapshot, providers)?;
    let plan = Plan::build(graph, snapshot, operations)?;
    log::info!(
        "Planned {} operations ({} changes)",
        plan.len(),
        plan.summary().total()
    );
    Ok(plan)
}

fn prerequisites(steps: &[Step], i: usize, phase: Phase) -> Vec<(usize, Phase)> {
    let step = &steps[i];
    match phase {
        Phase::Remove => step
            .released_by
            .iter()
            .map(|&j| (j, steps[j].release_phase()))
            .collect(),
        Phase::Apply => {
            let mut prereqs: Vec<(usize, Phase)> =
                step.waits_for.iter().map(|&d| (d, Phase::Apply)).collect();
            if step.phases().contains(&Phase::Remove) {
                prereqs.push((i, Phase::Remove));
            }
            prereqs
        }
    }
}

/// Kahn's algorithm over phases; lowest step index first among ready ones.
fn sort(steps: &[Step]) -> Result<Vec<(usize, Phase)>> {
    let phases: Vec<(usize, Phase)> = steps
        .iter()
        .enumerate()
        .flat_map(|(i, s)| s.phases().iter().map(move |&p| (i, p)))
        .collect();

    let mut remaining: HashMap<(usize, Phase), usize> = HashMap::with_capacity(phases.len());
    let mut successors: HashMap<(usize, Phase), Vec<(usize, Phase)>> = HashMap::new();
    for &node in &phases {
        let prereqs = prerequisites(steps, node.0, node.1);
        remaining.insert(node, prereqs.len());
        for p in prereqs {
            successors.entry(p).or_default().push(node);
        }
    }

    let mut ready: BTreeSet<(usize, Phase)> = phases
        .iter()
        .copied()
        .filter(|node| remaining[node] == 0)
        .collect();
    let mut sequence = Vec::with_capacity(phases.len());

    while let Some(node) = ready.pop_first() {
        sequence.push(node);
        for next in successors.get(&node).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(next) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*next);
                }
            }
        }
    }

    if sequence.len() != phases.len() {
        let mut stuck: Vec<&str> = phases
            .iter()
            .filter(|node| !sequence.contains(node))
            .map(|&(i, _)| steps[i].operation.name.as_str())
            .collect();
        stuck.dedup();
        return Err(Error::PlanConflict {
            message: format!("operations wait on each other: {}", stuck.join(", ")),
        });
    }
    Ok(sequence)
}
