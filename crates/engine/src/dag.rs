//! Graph definition and validation — run once when a pipeline is built, never
//! per run.
//!
//! Rules enforced by [`GraphBuilder::build`]:
//! 1. Step names are unique and the graph is not empty.
//! 2. Every slot has at most one writer; nobody writes `error` or a seed slot.
//! 3. Every edge references declared steps, and every slot a step reads is
//!    either seeded or written by some step.
//! 4. Explicit edges plus the producer → consumer edges implied by slot
//!    contracts form a DAG (topological sort must succeed).
//! 5. Exactly one step has no incoming edge (the entry step).
//!
//! On success the definition carries the topological order, direct
//! predecessors, and the transitive dependency/dependent sets the executor
//! and run controller use when a step fails.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use steps::{slots, Step};

use crate::models::{Edge, StepDescriptor};
use crate::EngineError;

/// A descriptor bound to the step body that implements it.
#[derive(Clone)]
pub struct StepNode {
    pub descriptor: StepDescriptor,
    pub step: Arc<dyn Step>,
}

impl std::fmt::Debug for StepNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepNode")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// GraphBuilder
// ---------------------------------------------------------------------------

/// Collects steps, explicit edges and seed slots, then validates them.
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<StepNode>,
    edges: Vec<Edge>,
    seeds: BTreeSet<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a slot the run controller populates before the first step.
    pub fn seed(mut self, slot: impl Into<String>) -> Self {
        self.seeds.insert(slot.into());
        self
    }

    pub fn step(self, descriptor: StepDescriptor, step: impl Step + 'static) -> Self {
        self.shared_step(descriptor, Arc::new(step))
    }

    pub fn shared_step(mut self, descriptor: StepDescriptor, step: Arc<dyn Step>) -> Self {
        self.nodes.push(StepNode { descriptor, step });
        self
    }

    /// Declare an ordering edge that no slot contract implies.
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    /// Validate and freeze the graph.
    ///
    /// # Errors
    /// - [`EngineError::EmptyGraph`] if no steps were declared.
    /// - [`EngineError::DuplicateStep`] if two steps share a name.
    /// - [`EngineError::ReservedSlot`] if a step writes `error` or a seed slot.
    /// - [`EngineError::MultipleWriters`] if two steps write the same slot.
    /// - [`EngineError::DanglingDependency`] for unknown edge endpoints or
    ///   slots nobody produces.
    /// - [`EngineError::CycleDetected`] if the graph is not acyclic. A graph
    ///   in which every step has an incoming edge always lands here.
    /// - [`EngineError::MultipleEntrySteps`] if more than one step has no
    ///   incoming edge.
    pub fn build(self) -> Result<GraphDefinition, EngineError> {
        let GraphBuilder { nodes, edges, seeds } = self;

        if nodes.is_empty() {
            return Err(EngineError::EmptyGraph);
        }

        // -------------------------------------------------------------------
        // 1. Unique names
        // -------------------------------------------------------------------
        let mut index: HashMap<String, usize> = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.descriptor.name.clone(), i).is_some() {
                return Err(EngineError::DuplicateStep(node.descriptor.name.clone()));
            }
        }

        // -------------------------------------------------------------------
        // 2. Single writer per slot
        // -------------------------------------------------------------------
        let mut writers: BTreeMap<&str, usize> = BTreeMap::new();
        for (i, node) in nodes.iter().enumerate() {
            for slot in &node.descriptor.outputs {
                if slot == slots::ERROR || seeds.contains(slot) {
                    return Err(EngineError::ReservedSlot {
                        step: node.descriptor.name.clone(),
                        slot: slot.clone(),
                    });
                }
                if let Some(&first) = writers.get(slot.as_str()) {
                    return Err(EngineError::MultipleWriters {
                        slot: slot.clone(),
                        first: nodes[first].descriptor.name.clone(),
                        second: node.descriptor.name.clone(),
                    });
                }
                writers.insert(slot.as_str(), i);
            }
        }

        // -------------------------------------------------------------------
        // 3. Resolve edges: explicit ones, then slot-implied ones
        // -------------------------------------------------------------------
        let n = nodes.len();
        let mut hard_preds: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        let mut soft_preds: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];

        for edge in &edges {
            let from = *index.get(&edge.from).ok_or_else(|| {
                EngineError::DanglingDependency(format!(
                    "edge '{}' -> '{}' references undeclared step '{}'",
                    edge.from, edge.to, edge.from
                ))
            })?;
            let to = *index.get(&edge.to).ok_or_else(|| {
                EngineError::DanglingDependency(format!(
                    "edge '{}' -> '{}' references undeclared step '{}'",
                    edge.from, edge.to, edge.to
                ))
            })?;
            hard_preds[to].insert(from);
        }

        for (i, node) in nodes.iter().enumerate() {
            let d = &node.descriptor;
            for (slot, optional) in d
                .inputs
                .iter()
                .map(|s| (s, false))
                .chain(d.optional_inputs.iter().map(|s| (s, true)))
            {
                match writers.get(slot.as_str()) {
                    Some(&producer) if optional => {
                        soft_preds[i].insert(producer);
                    }
                    Some(&producer) => {
                        hard_preds[i].insert(producer);
                    }
                    None if seeds.contains(slot) => {}
                    None => {
                        return Err(EngineError::DanglingDependency(format!(
                            "step '{}' reads slot '{}' that no step writes",
                            d.name, slot
                        )));
                    }
                }
            }
            // A required edge subsumes an optional one between the same pair.
            let hard = hard_preds[i].clone();
            soft_preds[i].retain(|p| !hard.contains(p));
        }

        // -------------------------------------------------------------------
        // 4. Topological sort (Kahn's algorithm) over all edges
        // -------------------------------------------------------------------
        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        let mut in_degree: Vec<usize> = vec![0; n];
        for to in 0..n {
            for &from in hard_preds[to].iter().chain(soft_preds[to].iter()) {
                successors[from].insert(to);
                in_degree[to] += 1;
            }
        }

        // Seed the queue with steps that have no incoming edges, in
        // declaration order so the resulting order is deterministic.
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let entries: Vec<usize> = queue.iter().copied().collect();

        let mut order: Vec<usize> = Vec::with_capacity(n);
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &next in &successors[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        // If we didn't visit every step the graph contains a cycle.
        if order.len() != n {
            let mut stuck: Vec<String> = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| nodes[i].descriptor.name.clone())
                .collect();
            stuck.sort();
            return Err(EngineError::CycleDetected(stuck));
        }

        // -------------------------------------------------------------------
        // 5. Exactly one entry step
        // -------------------------------------------------------------------
        // Acyclic and non-empty, so at least one entry exists.
        let entry = match entries.as_slice() {
            [single] => *single,
            many => {
                return Err(EngineError::MultipleEntrySteps(
                    many.iter()
                        .map(|&i| nodes[i].descriptor.name.clone())
                        .collect(),
                ))
            }
        };

        let terminals: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&i| successors[i].is_empty())
            .collect();

        // -------------------------------------------------------------------
        // 6. Transitive closures over "depends on" (hard) edges
        // -------------------------------------------------------------------
        let mut dependencies: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for &i in &order {
            let mut acc = BTreeSet::new();
            for &p in &hard_preds[i] {
                acc.insert(p);
                acc.extend(dependencies[p].iter().copied());
            }
            dependencies[i] = acc;
        }
        let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for (i, deps) in dependencies.iter().enumerate() {
            for &d in deps {
                dependents[d].insert(i);
            }
        }

        Ok(GraphDefinition {
            nodes,
            index,
            seeds,
            hard_preds,
            soft_preds,
            successors,
            dependencies,
            dependents,
            order,
            entry,
            terminals,
        })
    }
}

// ---------------------------------------------------------------------------
// GraphDefinition
// ---------------------------------------------------------------------------

/// A validated, immutable pipeline graph. Cheap to share between runs via
/// `Arc`; holds no per-run state.
#[derive(Debug)]
pub struct GraphDefinition {
    nodes: Vec<StepNode>,
    index: HashMap<String, usize>,
    seeds: BTreeSet<String>,
    hard_preds: Vec<BTreeSet<usize>>,
    soft_preds: Vec<BTreeSet<usize>>,
    successors: Vec<BTreeSet<usize>>,
    dependencies: Vec<BTreeSet<usize>>,
    dependents: Vec<BTreeSet<usize>>,
    order: Vec<usize>,
    entry: usize,
    terminals: Vec<usize>,
}

impl GraphDefinition {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn seeds(&self) -> &BTreeSet<String> {
        &self.seeds
    }

    pub fn descriptor(&self, name: &str) -> Option<&StepDescriptor> {
        self.index.get(name).map(|&i| &self.nodes[i].descriptor)
    }

    /// Descriptors in topological order.
    pub fn descriptors(&self) -> impl Iterator<Item = &StepDescriptor> {
        self.order.iter().map(|&i| &self.nodes[i].descriptor)
    }

    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.name(i)).collect()
    }

    pub fn entry(&self) -> &str {
        self.name(self.entry)
    }

    pub fn terminals(&self) -> Vec<&str> {
        self.terminals.iter().map(|&i| self.name(i)).collect()
    }

    /// Every edge of the graph, explicit and slot-implied, as `(from, to)`.
    pub fn edges(&self) -> Vec<Edge> {
        self.order
            .iter()
            .flat_map(|&from| {
                self.successors[from]
                    .iter()
                    .map(move |&to| Edge::new(self.name(from), self.name(to)))
            })
            .collect()
    }

    /// Steps `name` transitively depends on.
    pub fn dependencies_of(&self, name: &str) -> BTreeSet<&str> {
        self.names_of(name, &self.dependencies)
    }

    /// Steps that transitively depend on `name`.
    pub fn dependents_of(&self, name: &str) -> BTreeSet<&str> {
        self.names_of(name, &self.dependents)
    }

    fn names_of<'a>(&'a self, name: &str, sets: &'a [BTreeSet<usize>]) -> BTreeSet<&'a str> {
        self.index
            .get(name)
            .map(|&i| sets[i].iter().map(|&j| self.name(j)).collect())
            .unwrap_or_default()
    }

    // ------ crate-internal accessors used by the executor ------

    pub(crate) fn name(&self, i: usize) -> &str {
        &self.nodes[i].descriptor.name
    }

    pub(crate) fn node(&self, i: usize) -> &StepNode {
        &self.nodes[i]
    }

    pub(crate) fn order(&self) -> &[usize] {
        &self.order
    }

    pub(crate) fn hard_preds(&self, i: usize) -> &BTreeSet<usize> {
        &self.hard_preds[i]
    }

    pub(crate) fn soft_preds(&self, i: usize) -> &BTreeSet<usize> {
        &self.soft_preds[i]
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use steps::mock::MockStep;

    fn noop(name: &str) -> MockStep {
        MockStep::returning(name, steps::Patch::new())
    }

    fn writer(name: &str, slot: &str) -> MockStep {
        MockStep::writing(name, slot, json!(true))
    }

    #[test]
    fn valid_linear_graph_returns_sorted_order() {
        // a → b → c, implied by slots
        let graph = GraphBuilder::new()
            .seed("input")
            .step(StepDescriptor::required("a").reads(["input"]).writes(["x"]), writer("a", "x"))
            .step(StepDescriptor::required("b").reads(["x"]).writes(["y"]), writer("b", "y"))
            .step(StepDescriptor::required("c").reads(["y"]), noop("c"))
            .build()
            .expect("should be valid");

        assert_eq!(graph.topological_order(), vec!["a", "b", "c"]);
        assert_eq!(graph.entry(), "a");
        assert_eq!(graph.terminals(), vec!["c"]);
        assert_eq!(graph.dependencies_of("c"), BTreeSet::from(["a", "b"]));
        assert_eq!(graph.dependents_of("a"), BTreeSet::from(["b", "c"]));
    }

    #[test]
    fn fan_out_has_multiple_terminals() {
        //   a
        //  / \
        // b   c
        let graph = GraphBuilder::new()
            .step(StepDescriptor::required("a"), noop("a"))
            .step(StepDescriptor::best_effort("b"), noop("b"))
            .step(StepDescriptor::best_effort("c"), noop("c"))
            .edge("a", "b")
            .edge("a", "c")
            .build()
            .expect("should be valid");

        assert_eq!(graph.topological_order().first(), Some(&"a"));
        assert_eq!(graph.terminals(), vec!["b", "c"]);
        assert!(graph.dependents_of("b").is_empty());
    }

    #[test]
    fn diamond_graph_sorts_sink_last() {
        let graph = GraphBuilder::new()
            .step(StepDescriptor::required("a"), noop("a"))
            .step(StepDescriptor::required("b"), noop("b"))
            .step(StepDescriptor::required("c"), noop("c"))
            .step(StepDescriptor::required("d"), noop("d"))
            .edge("a", "b")
            .edge("a", "c")
            .edge("b", "d")
            .edge("c", "d")
            .build()
            .expect("should be valid");

        let order = graph.topological_order();
        assert_eq!(order.first(), Some(&"a"));
        assert_eq!(order.last(), Some(&"d"));
        assert_eq!(graph.edges().len(), 4);
    }

    #[test]
    fn empty_graph_is_rejected() {
        assert_eq!(GraphBuilder::new().build().unwrap_err(), EngineError::EmptyGraph);
    }

    #[test]
    fn duplicate_step_name_is_rejected() {
        let err = GraphBuilder::new()
            .step(StepDescriptor::required("a"), noop("a"))
            .step(StepDescriptor::required("a"), noop("a"))
            .build()
            .unwrap_err();
        assert_eq!(err, EngineError::DuplicateStep("a".into()));
    }

    #[test]
    fn edge_referencing_missing_step_is_dangling() {
        let err = GraphBuilder::new()
            .step(StepDescriptor::required("a"), noop("a"))
            .edge("a", "ghost")
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::DanglingDependency(msg) if msg.contains("ghost")));
    }

    #[test]
    fn unproduced_slot_is_dangling() {
        let err = GraphBuilder::new()
            .step(StepDescriptor::required("a").reads(["nowhere"]), noop("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::DanglingDependency(msg) if msg.contains("nowhere")));
    }

    #[test]
    fn second_writer_is_rejected() {
        let err = GraphBuilder::new()
            .step(StepDescriptor::required("a").writes(["labels"]), noop("a"))
            .step(StepDescriptor::required("b").writes(["labels"]), noop("b"))
            .edge("a", "b")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::MultipleWriters {
                slot: "labels".into(),
                first: "a".into(),
                second: "b".into(),
            }
        );
    }

    #[test]
    fn writing_error_or_seed_slot_is_rejected() {
        let err = GraphBuilder::new()
            .step(StepDescriptor::required("a").writes([slots::ERROR]), noop("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::ReservedSlot { slot, .. } if slot == slots::ERROR));

        let err = GraphBuilder::new()
            .seed("input")
            .step(StepDescriptor::required("a").writes(["input"]), noop("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::ReservedSlot { slot, .. } if slot == "input"));
    }

    #[test]
    fn cycle_through_explicit_edges_is_detected() {
        // root → a → b → c → a
        let err = GraphBuilder::new()
            .step(StepDescriptor::required("root"), noop("root"))
            .step(StepDescriptor::required("a"), noop("a"))
            .step(StepDescriptor::required("b"), noop("b"))
            .step(StepDescriptor::required("c"), noop("c"))
            .edge("root", "a")
            .edge("a", "b")
            .edge("b", "c")
            .edge("c", "a")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::CycleDetected(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn cycle_through_slots_is_detected() {
        let err = GraphBuilder::new()
            .step(StepDescriptor::required("root"), noop("root"))
            .step(StepDescriptor::required("a").reads(["y"]).writes(["x"]), noop("a"))
            .step(StepDescriptor::required("b").reads(["x"]).writes(["y"]), noop("b"))
            .edge("root", "a")
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::CycleDetected(_)));
    }

    #[test]
    fn graph_without_a_root_is_a_cycle() {
        let err = GraphBuilder::new()
            .step(StepDescriptor::required("a"), noop("a"))
            .step(StepDescriptor::required("b"), noop("b"))
            .edge("a", "b")
            .edge("b", "a")
            .build()
            .unwrap_err();
        assert_eq!(err, EngineError::CycleDetected(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let err = GraphBuilder::new()
            .step(StepDescriptor::required("a").reads(["x"]).writes(["x"]), noop("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::CycleDetected(names) if names == vec!["a"]));
    }

    #[test]
    fn two_roots_are_rejected() {
        let err = GraphBuilder::new()
            .step(StepDescriptor::required("a"), noop("a"))
            .step(StepDescriptor::required("b"), noop("b"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::MultipleEntrySteps(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn optional_inputs_order_but_do_not_make_dependents() {
        let graph = GraphBuilder::new()
            .step(StepDescriptor::required("a"), noop("a"))
            .step(StepDescriptor::best_effort("hint").writes(["hint"]), noop("hint"))
            .step(
                StepDescriptor::required("use").reads_optional(["hint"]),
                noop("use"),
            )
            .edge("a", "hint")
            .edge("a", "use")
            .build()
            .expect("should be valid");

        let order = graph.topological_order();
        let pos = |n: &str| order.iter().position(|o| *o == n).unwrap();
        assert!(pos("hint") < pos("use"));
        assert!(!graph.dependents_of("hint").contains("use"));
    }

    #[test]
    fn single_step_is_entry_and_terminal() {
        let graph = GraphBuilder::new()
            .step(StepDescriptor::required("solo"), noop("solo"))
            .build()
            .expect("single step should be valid");
        assert_eq!(graph.entry(), "solo");
        assert_eq!(graph.terminals(), vec!["solo"]);
    }
}
