//! Resource graph builder
//!
//! A program declares resources into a [`GraphBuilder`]. Output references
//! found in a resource's inputs become dependency edges automatically.
//! [`GraphBuilder::finalize`] checks that every reference points at a
//! declared resource and that the graph is acyclic.

use crate::error::{Error, Result};
use crate::value::{Input, Inputs, OutputRef};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A declared resource.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    kind: String,
    inputs: Inputs,
    depends_on: BTreeSet<String>,
    protect: bool,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    /// Whether the resource must never be deleted or replaced
    pub fn is_protected(&self) -> bool {
        self.protect
    }

    /// Names of every resource this one depends on, with the property that
    /// introduced the edge.
    fn edges(&self) -> Vec<(&str, &str)> {
        let mut edges: Vec<(&str, &str)> = self
            .inputs
            .iter()
            .flat_map(|(prop, input)| {
                input
                    .references()
                    .into_iter()
                    .map(move |r| (r.resource(), prop.as_str()))
            })
            .collect();
        edges.extend(self.depends_on.iter().map(|d| (d.as_str(), "dependsOn")));
        edges
    }
}

/// Handle to a declared (or forward-referenced) resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    name: String,
}

impl NodeHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deferred reference to one of this resource's output properties.
    pub fn output(&self, property: impl Into<String>) -> OutputRef {
        OutputRef::new(self.name.clone(), property)
    }
}

/// Extra declaration options.
#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    /// Explicit dependencies not expressed through inputs
    pub depends_on: Vec<NodeHandle>,
    /// Refuse to delete or replace this resource
    pub protect: bool,
}

/// Collects declarations during one evaluation of a program.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    exports: BTreeMap<String, Input>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource.
    pub fn declare(
        &mut self,
        kind: impl Into<String>,
        name: impl Into<String>,
        inputs: Inputs,
    ) -> Result<NodeHandle> {
        self.declare_with(kind, name, inputs, ResourceOptions::default())
    }

    /// Declare a resource with explicit options.
    pub fn declare_with(
        &mut self,
        kind: impl Into<String>,
        name: impl Into<String>,
        inputs: Inputs,
        options: ResourceOptions,
    ) -> Result<NodeHandle> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(Error::DuplicateName { name });
        }

        let node = Node {
            name: name.clone(),
            kind: kind.into(),
            inputs,
            depends_on: options.depends_on.into_iter().map(|h| h.name).collect(),
            protect: options.protect,
        };
        log::trace!("Declared {} ({})", node.name, node.kind);

        self.index.insert(name.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(NodeHandle { name })
    }

    /// Handle to a resource that may not be declared yet.
    ///
    /// The name must be declared before [`finalize`](Self::finalize).
    pub fn reference(&self, name: impl Into<String>) -> NodeHandle {
        NodeHandle { name: name.into() }
    }

    /// Record a run-level result.
    pub fn export(&mut self, key: impl Into<String>, value: impl Into<Input>) {
        self.exports.insert(key.into(), value.into());
    }

    /// Validate references and acyclicity, producing the final graph.
    pub fn finalize(self) -> Result<Graph> {
        let mut edges = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let mut deps = BTreeSet::new();
            for (target, property) in node.edges() {
                let Some(&idx) = self.index.get(target) else {
                    return Err(Error::DanglingReference {
                        resource: node.name.clone(),
                        property: property.to_string(),
                        target: target.to_string(),
                    });
                };
                deps.insert(idx);
            }
            edges.push(deps);
        }

        for (key, value) in &self.exports {
            if let Some(r) = value
                .references()
                .into_iter()
                .find(|r| !self.index.contains_key(r.resource()))
            {
                return Err(Error::DanglingReference {
                    resource: format!("export {key}"),
                    property: r.property().to_string(),
                    target: r.resource().to_string(),
                });
            }
        }

        let graph = Graph {
            nodes: self.nodes,
            index: self.index,
            edges,
            exports: self.exports,
        };

        if let Some(cycle) = graph.find_cycle() {
            return Err(Error::CyclicDependency { cycle });
        }

        log::debug!("Finalized resource graph with {} nodes", graph.len());
        Ok(graph)
    }
}

/// A validated, acyclic resource graph.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    /// `edges[i]` holds the indices node `i` depends on
    edges: Vec<BTreeSet<usize>>,
    exports: BTreeMap<String, Input>,
}

impl Graph {
    /// An empty graph, used to plan a full teardown.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn exports(&self) -> &BTreeMap<String, Input> {
        &self.exports
    }

    /// Names of the resources `name` depends on, sorted.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        let mut deps: Vec<&str> = self
            .index
            .get(name)
            .map(|&i| self.edges[i].iter().map(|&d| self.nodes[d].name()).collect())
            .unwrap_or_default();
        deps.sort_unstable();
        deps
    }

    /// Names of the resources that depend directly on `name`, sorted.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        let Some(&target) = self.index.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = self
            .edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.contains(&target))
            .map(|(i, _)| self.nodes[i].name())
            .collect();
        out.sort_unstable();
        out
    }

    /// Dependencies first; ties broken by declaration order.
    pub fn topological_order(&self) -> Vec<&Node> {
        let mut remaining: Vec<usize> = self.edges.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.nodes.len())
            .filter(|&i| remaining[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(i) = ready.pop_first() {
            order.push(&self.nodes[i]);
            for (j, deps) in self.edges.iter().enumerate() {
                if deps.contains(&i) {
                    remaining[j] -= 1;
                    if remaining[j] == 0 {
                        ready.insert(j);
                    }
                }
            }
        }
        order
    }

    /// Depth-first search for a cycle, returned as a closed path of names.
    ///
    /// Walks with an explicit stack so deep chains cannot overflow.
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        let mut marks = vec![Mark::New; self.nodes.len()];
        for root in 0..self.nodes.len() {
            if marks[root] != Mark::New {
                continue;
            }
            marks[root] = Mark::Active;
            let mut path = vec![root];
            let mut frames = vec![self.edges[root].iter()];

            while let Some(frame) = frames.last_mut() {
                let Some(&d) = frame.next() else {
                    frames.pop();
                    if let Some(done) = path.pop() {
                        marks[done] = Mark::Done;
                    }
                    continue;
                };
                match marks[d] {
                    Mark::Active => {
                        let start = path.iter().position(|&s| s == d).unwrap_or(0);
                        let mut cycle: Vec<String> = path[start..]
                            .iter()
                            .map(|&s| self.nodes[s].name.clone())
                            .collect();
                        cycle.push(self.nodes[d].name.clone());
                        return Some(cycle);
                    }
                    Mark::New => {
                        marks[d] = Mark::Active;
                        path.push(d);
                        frames.push(self.edges[d].iter());
                    }
                    Mark::Done => {}
                }
            }
        }
        None
    }
}
