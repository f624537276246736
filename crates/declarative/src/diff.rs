//! Differ - decides the operation for every resource
//!
//! Each declared node is compared with its state record by logical name.
//! Records with no declared node become deletions.

use crate::error::{Error, Result};
use crate::graph::{Graph, Node};
use crate::provider::{Provider, ProviderRegistry};
use crate::state::{Snapshot, StateRecord};
use crate::types::{OperationKind, PropertyDiff};
use crate::value::{OutputRef, PlannedProperties, Properties, resolve_planned};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// The planned change for one resource.
#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    /// Logical name
    pub name: String,
    pub kind: OperationKind,
    /// Resource kind, e.g. `gcp:compute/instance:Instance`
    pub resource_type: String,
    /// Planned inputs; may contain unknowns. Empty for deletions.
    pub inputs: PlannedProperties,
    /// The state record this operation starts from
    #[serde(skip)]
    pub prior: Option<StateRecord>,
    /// Added, changed and removed input keys
    pub diff: PropertyDiff,
}

/// Compute one operation per declared node and per orphaned record.
///
/// Nodes are visited dependencies-first so that a reference to a resource
/// being created or replaced is known to be unknown at plan time. A
/// resource planned for update in place whose recorded dependencies
/// include a replaced resource is replaced as well, since the old
/// dependency is deleted before its successor exists.
pub fn compute_operations(
    graph: &Graph,
    snapshot: &Snapshot,
    providers: &ProviderRegistry,
) -> Result<Vec<Operation>> {
    let mut operations = Vec::with_capacity(graph.len() + snapshot.len());
    let mut planned: HashMap<&str, OperationKind> = HashMap::new();

    for node in graph.topological_order() {
        let provider = providers.require(node.kind(), node.name())?;

        let recorded = |r: &OutputRef| {
            snapshot
                .get(r.resource())
                .and_then(|rec| rec.outputs.get(r.property()).cloned())
        };
        let lookup = |r: &OutputRef| -> Option<Value> {
            match planned.get(r.resource()) {
                Some(OperationKind::NoOp) => recorded(r),
                Some(OperationKind::Update) => {
                    let stable = graph
                        .node(r.resource())
                        .and_then(|source| providers.get(source.kind()))
                        .is_some_and(|p| p.output_survives_update(r.property()));
                    if stable { recorded(r) } else { None }
                }
                _ => None,
            }
        };
        let inputs = resolve_planned(node.inputs(), &lookup);
        let prior = snapshot.get(node.name());
        if let Some(prior) = prior
            && prior.kind != node.kind()
        {
            providers.require(&prior.kind, node.name())?;
        }

        let (mut kind, diff) = classify(node, &inputs, prior, &**provider)?;
        if kind == OperationKind::Update
            && let Some(dep) = prior.and_then(|p| {
                p.dependencies
                    .iter()
                    .find(|d| planned.get(d.as_str()) == Some(&OperationKind::Replace))
            })
        {
            log::debug!("{}: replaced along with '{dep}'", node.name());
            kind = OperationKind::Replace;
        }

        let protected = node.is_protected() || prior.is_some_and(|p| p.protect);
        if kind == OperationKind::Replace && protected {
            return Err(Error::ProtectedResource {
                name: node.name().to_string(),
                action: "replaced",
            });
        }

        log::debug!("{}: {}", node.name(), kind);
        planned.insert(node.name(), kind);
        operations.push(Operation {
            name: node.name().to_string(),
            kind,
            resource_type: node.kind().to_string(),
            inputs,
            prior: prior.cloned(),
            diff,
        });
    }

    for record in snapshot.resources.values() {
        if graph.contains(&record.name) {
            continue;
        }
        providers.require(&record.kind, &record.name)?;
        if record.protect {
            return Err(Error::ProtectedResource {
                name: record.name.clone(),
                action: "deleted",
            });
        }

        log::debug!("{}: {}", record.name, OperationKind::Delete);
        operations.push(Operation {
            name: record.name.clone(),
            kind: OperationKind::Delete,
            resource_type: record.kind.clone(),
            inputs: PlannedProperties::new(),
            prior: Some(record.clone()),
            diff: PropertyDiff::between(&record.inputs, &Properties::new()),
        });
    }

    Ok(operations)
}

fn classify(
    node: &Node,
    inputs: &PlannedProperties,
    prior: Option<&StateRecord>,
    provider: &dyn Provider,
) -> Result<(OperationKind, PropertyDiff)> {
    let Some(prior) = prior else {
        return Ok((
            OperationKind::Create,
            PropertyDiff::planned(&Properties::new(), inputs),
        ));
    };

    let diff = PropertyDiff::planned(&prior.inputs, inputs);
    if prior.kind != node.kind() {
        return Ok((OperationKind::Replace, diff));
    }
    if diff.is_empty() {
        return Ok((OperationKind::NoOp, diff));
    }

    let verdict = provider
        .diff(&prior.inputs, inputs)
        .map_err(|source| Error::Provider {
            resource: node.name().to_string(),
            operation: "diff",
            source,
        })?;

    // A changed key the provider did not classify has unspecified semantics
    let classified: BTreeSet<&str> = verdict.changed_properties().collect();
    let unclassified = diff.keys().iter().any(|k| !classified.contains(k));
    let kind = if verdict.requires_replacement() || unclassified {
        OperationKind::Replace
    } else {
        OperationKind::Update
    };
    Ok((kind, diff))
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub creates: usize,
    pub updates: usize,
    pub replaces: usize,
    pub deletes: usize,
    pub same: usize,
}

impl DiffSummary {
    /// Create a summary from a list of operations
    pub fn from_operations<'a>(operations: impl IntoIterator<Item = &'a Operation>) -> Self {
        let mut summary = Self::default();
        for op in operations {
            match op.kind {
                OperationKind::Create => summary.creates += 1,
                OperationKind::Update => summary.updates += 1,
                OperationKind::Replace => summary.replaces += 1,
                OperationKind::Delete => summary.deletes += 1,
                OperationKind::NoOp => summary.same += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group operations by resource type
pub fn group_by_type<'a>(
    operations: impl IntoIterator<Item = &'a Operation>,
) -> BTreeMap<&'a str, Vec<&'a Operation>> {
    let mut groups: BTreeMap<&str, Vec<&Operation>> = BTreeMap::new();
    for op in operations {
        groups.entry(op.resource_type.as_str()).or_default().push(op);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::error::ProviderError;
    use crate::provider::{Created, DiffResult, PropertyChange};
    use crate::testing::MockProvider;
    use crate::value::{Input, Inputs, Planned, inputs};
    use chrono::Utc;
    use serde_json::json;

    const ADDR: &str = "test:Address";
    const VM: &str = "test:Instance";

    fn registry() -> ProviderRegistry {
        let mut r = ProviderRegistry::new();
        r.register(MockProvider::new(ADDR));
        r.register(MockProvider::new("test:OldAddress"));
        r.register(
            MockProvider::new(VM)
                .updatable(["machineType", "network"])
                .replacing(["zone"])
                .stable_outputs(["id"]),
        );
        r
    }

    fn record(name: &str, kind: &str, inputs: &[(&str, Value)], outputs: &[(&str, Value)]) -> StateRecord {
        let props = |pairs: &[(&str, Value)]| -> Properties {
            pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
        };
        StateRecord {
            name: name.into(),
            kind: kind.into(),
            id: format!("{name}-id"),
            inputs: props(inputs),
            outputs: props(outputs),
            dependencies: Vec::new(),
            protect: false,
            updated_at: Utc::now(),
        }
    }

    fn snapshot(records: Vec<StateRecord>) -> Snapshot {
        let mut s = Snapshot::new("dev");
        for r in records {
            s.resources.insert(r.name.clone(), r);
        }
        s
    }

    fn scenario(machine_type: &str) -> Graph {
        let mut b = GraphBuilder::new();
        let ip = b.declare(ADDR, "ip1", Inputs::new()).unwrap();
        b.declare(
            VM,
            "vm1",
            inputs([
                ("network", Input::from(ip.output("selfLink"))),
                ("machineType", machine_type.into()),
            ]),
        )
        .unwrap();
        b.finalize().unwrap()
    }

    fn kinds(ops: &[Operation]) -> Vec<(&str, OperationKind)> {
        ops.iter().map(|o| (o.name.as_str(), o.kind)).collect()
    }

    #[test]
    fn test_first_run_creates_everything() {
        let ops = compute_operations(&scenario("e2-small"), &Snapshot::new("dev"), &registry()).unwrap();
        assert_eq!(
            kinds(&ops),
            vec![("ip1", OperationKind::Create), ("vm1", OperationKind::Create)]
        );
        // The address does not exist yet, so the reference is unknown
        assert_eq!(ops[1].inputs["network"], Planned::Unknown);
    }

    fn applied() -> Snapshot {
        snapshot(vec![
            record("ip1", ADDR, &[], &[("selfLink", json!("https://mock/ip1"))]),
            record(
                "vm1",
                VM,
                &[
                    ("network", json!("https://mock/ip1")),
                    ("machineType", json!("e2-small")),
                ],
                &[],
            ),
        ])
    }

    #[test]
    fn test_unchanged_inputs_are_noop() {
        let ops = compute_operations(&scenario("e2-small"), &applied(), &registry()).unwrap();
        assert_eq!(
            kinds(&ops),
            vec![("ip1", OperationKind::NoOp), ("vm1", OperationKind::NoOp)]
        );
        assert!(!DiffSummary::from_operations(&ops).has_changes());
    }

    #[test]
    fn test_updatable_change_is_update() {
        let ops = compute_operations(&scenario("e2-medium"), &applied(), &registry()).unwrap();
        assert_eq!(
            kinds(&ops),
            vec![("ip1", OperationKind::NoOp), ("vm1", OperationKind::Update)]
        );
        assert_eq!(
            ops[1].diff.changed,
            BTreeSet::from(["machineType".to_string()])
        );
    }

    #[test]
    fn test_unspecified_change_defaults_to_replace() {
        let mut b = GraphBuilder::new();
        b.declare(ADDR, "ip1", inputs([("description", "new")])).unwrap();
        let graph = b.finalize().unwrap();
        let snap = snapshot(vec![record("ip1", ADDR, &[("description", json!("old"))], &[])]);

        let ops = compute_operations(&graph, &snap, &registry()).unwrap();
        assert_eq!(kinds(&ops), vec![("ip1", OperationKind::Replace)]);
    }

    #[test]
    fn test_replacing_dependency_makes_reference_unknown() {
        let mut snap = applied();
        snap.resources.get_mut("ip1").unwrap().kind = "test:OldAddress".into();

        let ops = compute_operations(&scenario("e2-small"), &snap, &registry()).unwrap();
        assert_eq!(ops[0].kind, OperationKind::Replace);
        assert_eq!(ops[1].inputs["network"], Planned::Unknown);
        assert!(ops[1].diff.changed.contains("network"));
    }

    #[test]
    fn test_attached_dependent_of_replacement_is_replaced() {
        let mut snap = applied();
        snap.resources.get_mut("ip1").unwrap().kind = "test:OldAddress".into();
        snap.resources.get_mut("vm1").unwrap().dependencies = vec!["ip1".into()];

        // network alone is updatable, but the old address goes first
        let ops = compute_operations(&scenario("e2-small"), &snap, &registry()).unwrap();
        assert_eq!(
            kinds(&ops),
            vec![("ip1", OperationKind::Replace), ("vm1", OperationKind::Replace)]
        );
    }

    #[test]
    fn test_detached_dependent_of_replacement_updates() {
        let mut snap = applied();
        snap.resources.get_mut("ip1").unwrap().kind = "test:OldAddress".into();

        let ops = compute_operations(&scenario("e2-small"), &snap, &registry()).unwrap();
        assert_eq!(ops[1].kind, OperationKind::Update);
    }

    #[test]
    fn test_kind_change_needs_old_provider() {
        let mut snap = applied();
        snap.resources.get_mut("ip1").unwrap().kind = "test:Retired".into();
        let err = compute_operations(&scenario("e2-small"), &snap, &registry()).unwrap_err();
        assert!(matches!(err, Error::UnknownKind { ref kind, .. } if kind == "test:Retired"));
    }

    #[test]
    fn test_reference_to_updated_resource() {
        let mut b = GraphBuilder::new();
        let vm = b
            .declare(VM, "vm1", inputs([("machineType", "e2-medium")]))
            .unwrap();
        b.declare(ADDR, "by-id", inputs([("target", Input::from(vm.output("id")))]))
            .unwrap();
        b.declare(ADDR, "by-status", inputs([("target", Input::from(vm.output("status")))]))
            .unwrap();
        let graph = b.finalize().unwrap();
        let snap = snapshot(vec![
            record(
                "vm1",
                VM,
                &[("machineType", json!("e2-small"))],
                &[("id", json!("vm-1")), ("status", json!("RUNNING"))],
            ),
            record("by-id", ADDR, &[("target", json!("vm-1"))], &[]),
            record("by-status", ADDR, &[("target", json!("RUNNING"))], &[]),
        ]);

        let ops = compute_operations(&graph, &snap, &registry()).unwrap();
        assert_eq!(
            kinds(&ops),
            vec![
                ("vm1", OperationKind::Update),
                ("by-id", OperationKind::NoOp),
                ("by-status", OperationKind::Replace),
            ]
        );
        assert_eq!(ops[2].inputs["target"], Planned::Unknown);
    }

    #[test]
    fn test_computed_literal_is_compared() {
        let mut b = GraphBuilder::new();
        let ip = b.declare(ADDR, "ip1", inputs([("region", "eu")])).unwrap();
        b.declare(ADDR, "ip2", inputs([("peer", Input::from(ip.output("selfLink")))]))
            .unwrap();
        let graph = b.finalize().unwrap();
        let snap = snapshot(vec![
            record("ip1", ADDR, &[("region", json!("us"))], &[]),
            record("ip2", ADDR, &[("peer", json!("<computed>"))], &[]),
        ]);

        let ops = compute_operations(&graph, &snap, &registry()).unwrap();
        assert_eq!(ops[1].kind, OperationKind::Replace);
        assert_eq!(ops[1].diff.changed, BTreeSet::from(["peer".to_string()]));
    }

    #[test]
    fn test_orphaned_record_is_deleted() {
        let mut snap = applied();
        snap.resources
            .insert("old".into(), record("old", ADDR, &[("x", json!(1))], &[]));

        let ops = compute_operations(&scenario("e2-small"), &snap, &registry()).unwrap();
        assert_eq!(ops.last().map(|o| (o.name.as_str(), o.kind)), Some(("old", OperationKind::Delete)));
        assert!(ops.last().unwrap().prior.is_some());
    }

    #[test]
    fn test_destroy_deletes_all() {
        let ops = compute_operations(&Graph::empty(), &applied(), &registry()).unwrap();
        assert!(ops.iter().all(|o| o.kind == OperationKind::Delete));
        assert_eq!(DiffSummary::from_operations(&ops).deletes, 2);
    }

    #[test]
    fn test_unknown_kind_fails() {
        let mut b = GraphBuilder::new();
        b.declare("test:Disk", "disk1", Inputs::new()).unwrap();
        let err = compute_operations(&b.finalize().unwrap(), &Snapshot::new("dev"), &registry())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownKind { .. }));
    }

    #[test]
    fn test_protected_resource_not_deleted() {
        let mut snap = applied();
        snap.resources.get_mut("ip1").unwrap().protect = true;
        let err = compute_operations(&Graph::empty(), &snap, &registry()).unwrap_err();
        assert!(matches!(err, Error::ProtectedResource { ref name, action: "deleted" } if name == "ip1"));
    }

    #[derive(Debug)]
    struct SilentDiff;

    impl Provider for SilentDiff {
        fn kind(&self) -> &str {
            ADDR
        }
        fn create(&self, _: &Properties) -> std::result::Result<Created, ProviderError> {
            unreachable!()
        }
        fn read(&self, _: &str) -> std::result::Result<Properties, ProviderError> {
            unreachable!()
        }
        fn update(
            &self,
            _: &str,
            _: &Properties,
            _: &Properties,
            _: &PropertyDiff,
        ) -> std::result::Result<Properties, ProviderError> {
            unreachable!()
        }
        fn delete(&self, _: &str) -> std::result::Result<(), ProviderError> {
            unreachable!()
        }
        fn diff(
            &self,
            _: &Properties,
            _: &PlannedProperties,
        ) -> std::result::Result<DiffResult, ProviderError> {
            Ok(DiffResult {
                changes: vec![PropertyChange {
                    property: "labels".into(),
                    requires_replacement: Some(false),
                }],
            })
        }
    }

    #[test]
    fn test_change_missing_from_provider_diff_replaces() {
        let mut providers = ProviderRegistry::new();
        providers.register(SilentDiff);
        let mut b = GraphBuilder::new();
        b.declare(ADDR, "ip1", inputs([("labels", "a"), ("region", "eu")]))
            .unwrap();
        let snap = snapshot(vec![record(
            "ip1",
            ADDR,
            &[("labels", json!("b")), ("region", json!("us"))],
            &[],
        )]);

        let ops = compute_operations(&b.finalize().unwrap(), &snap, &providers).unwrap();
        assert_eq!(ops[0].kind, OperationKind::Replace);
    }

    #[test]
    fn test_group_by_type() {
        let ops = compute_operations(&scenario("e2-small"), &Snapshot::new("dev"), &registry()).unwrap();
        let groups = group_by_type(&ops);
        assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec![ADDR, VM]);
    }
}
