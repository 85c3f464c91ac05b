//! Unit Dependency Tracking
//!
//! Builds the directed graph between declared units and derives:
//!
//! - Creation order (topological, stable with respect to declaration order)
//! - Destroy order (the reverse)
//! - Execution waves of mutually independent units
//! - Transitive dependents, used to halt work after a failure
//! - Cycle detection

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{UnitId, UnitKind, UnitSet};
use crate::error::{Error, Result};
use crate::state::UnitRecord;

/// A node in the dependency graph representing a unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyNode {
    /// Unit identifier
    pub id: UnitId,
    /// Unit kind
    pub kind: UnitKind,
    /// Declaration sequence number, used to break ordering ties
    pub sequence: u64,
}

/// Type of dependency between units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyType {
    /// Listed in `depends_on`
    Explicit,
    /// Inferred from an output reference
    Reference,
    /// Read back from recorded state
    Recorded,
}

/// An edge from a producer to the unit that depends on it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitDependency {
    /// Producer (must complete first)
    pub from_id: UnitId,
    /// Consumer
    pub to_id: UnitId,
    /// Type of dependency
    pub dependency_type: DependencyType,
    /// Attribute that carries the reference, if any
    pub field: Option<String>,
}

impl UnitDependency {
    pub fn new(from_id: impl Into<UnitId>, to_id: impl Into<UnitId>, dep_type: DependencyType) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            dependency_type: dep_type,
            field: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// The dependency graph for unit relationships
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<DependencyNode, UnitDependency>,
    node_indices: HashMap<UnitId, NodeIndex>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for a set of declared units.
    ///
    /// Fails on references to undeclared units (unless optional), on
    /// self-references and on cycles. Nothing is mutated on failure.
    pub fn build(units: &UnitSet) -> Result<Self> {
        let mut graph = Self::new();

        for unit in units.iter() {
            graph.add_node(&unit.id, unit.kind);
        }

        for unit in units.iter() {
            for dep in &unit.depends_on {
                if !units.contains(dep) {
                    return Err(Error::invalid_reference(&unit.id, "depends_on", dep));
                }
                graph.add_dependency(UnitDependency::new(dep, &unit.id, DependencyType::Explicit))?;
            }

            for (field, reference) in unit.references() {
                if !units.contains(&reference.unit) {
                    if reference.optional {
                        debug!(
                            "Unit '{}' field '{}': optional producer '{}' not declared, resolving to null",
                            unit.id, field, reference.unit
                        );
                        continue;
                    }
                    return Err(Error::invalid_reference(&unit.id, field, &reference.unit));
                }
                graph.add_dependency(
                    UnitDependency::new(&reference.unit, &unit.id, DependencyType::Reference)
                        .with_field(field),
                )?;
            }
        }

        graph.ensure_acyclic()?;
        debug!(
            "Built dependency graph: {} units, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Rebuild the graph from recorded state, for destroy ordering.
    ///
    /// Dependencies on units no longer recorded are ignored.
    pub fn from_records<'a, I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a UnitRecord>,
    {
        let records: Vec<&UnitRecord> = records.into_iter().collect();
        let mut graph = Self::new();

        for record in &records {
            graph.add_node(&record.id, record.kind);
        }
        for record in &records {
            for dep in &record.dependencies {
                if graph.contains(dep) {
                    graph.add_dependency(UnitDependency::new(dep, &record.id, DependencyType::Recorded))?;
                }
            }
        }

        graph.ensure_acyclic()?;
        Ok(graph)
    }

    /// Add a node to the graph
    pub fn add_node(&mut self, id: &str, kind: UnitKind) -> NodeIndex {
        if let Some(&idx) = self.node_indices.get(id) {
            return idx;
        }
        let node = DependencyNode {
            id: id.to_string(),
            kind,
            sequence: self.graph.node_count() as u64,
        };
        let idx = self.graph.add_node(node);
        self.node_indices.insert(id.to_string(), idx);
        idx
    }

    /// Add a dependency between units. Repeated edges are collapsed.
    pub fn add_dependency(&mut self, dependency: UnitDependency) -> Result<()> {
        let from_idx = *self
            .node_indices
            .get(&dependency.from_id)
            .ok_or_else(|| Error::invalid_reference(&dependency.to_id, dependency.field.as_deref().unwrap_or("depends_on"), &dependency.from_id))?;
        let to_idx = *self
            .node_indices
            .get(&dependency.to_id)
            .ok_or_else(|| Error::Internal(format!("unit '{}' not in graph", dependency.to_id)))?;

        if from_idx == to_idx {
            return Err(Error::DependencyCycle {
                units: vec![dependency.to_id],
            });
        }

        if self.graph.find_edge(from_idx, to_idx).is_none() {
            self.graph.add_edge(from_idx, to_idx, dependency);
        }
        Ok(())
    }

    fn ensure_acyclic(&self) -> Result<()> {
        if let Some(cycle) = self.get_cycles().into_iter().next() {
            return Err(Error::DependencyCycle { units: cycle });
        }
        Ok(())
    }

    /// Check for dependency cycles
    pub fn has_cycles(&self) -> bool {
        tarjan_scc(&self.graph).iter().any(|scc| scc.len() > 1)
    }

    /// Get all cycles in the graph, each sorted by declaration order
    pub fn get_cycles(&self) -> Vec<Vec<UnitId>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|mut scc| {
                scc.sort_by_key(|idx| self.graph[*idx].sequence);
                scc.into_iter()
                    .map(|idx| self.graph[idx].id.clone())
                    .collect()
            })
            .collect()
    }

    /// Topological creation order. Among ready units the one declared first
    /// goes first, so the order is stable across runs.
    pub fn creation_order(&self) -> Result<Vec<UnitId>> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                (
                    idx,
                    self.graph.neighbors_directed(idx, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<(u64, NodeIndex)>> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&idx, _)| Reverse((self.graph[idx].sequence, idx)))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((_, idx))) = ready.pop() {
            order.push(self.graph[idx].id.clone());
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(deg) = in_degree.get_mut(&next) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(Reverse((self.graph[next].sequence, next)));
                    }
                }
            }
        }

        if order.len() != self.graph.node_count() {
            let units = self.get_cycles().into_iter().next().unwrap_or_default();
            return Err(Error::DependencyCycle { units });
        }
        Ok(order)
    }

    /// Reverse of the creation order: dependents are destroyed first
    pub fn destroy_order(&self) -> Result<Vec<UnitId>> {
        let mut order = self.creation_order()?;
        order.reverse();
        Ok(order)
    }

    /// Group units into waves. Every unit's dependencies lie in earlier
    /// waves, so units within a wave are independent of each other.
    pub fn waves(&self) -> Result<Vec<Vec<UnitId>>> {
        let order = self.creation_order()?;
        let mut level: HashMap<&str, usize> = HashMap::new();
        let mut waves: Vec<Vec<UnitId>> = Vec::new();

        for id in &order {
            let idx = self.node_indices[id.as_str()];
            let depth = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|dep| level[self.graph[dep].id.as_str()] + 1)
                .max()
                .unwrap_or(0);
            level.insert(id.as_str(), depth);
            if waves.len() <= depth {
                waves.resize_with(depth + 1, Vec::new);
            }
            waves[depth].push(id.clone());
        }

        Ok(waves)
    }

    /// Get all units that depend on a given unit (direct and transitive)
    pub fn get_dependents(&self, unit_id: &str) -> Vec<UnitId> {
        self.walk(unit_id, Direction::Outgoing)
    }

    /// Get all units that a given unit depends on (direct and transitive)
    pub fn get_dependencies(&self, unit_id: &str) -> Vec<UnitId> {
        self.walk(unit_id, Direction::Incoming)
    }

    fn walk(&self, unit_id: &str, direction: Direction) -> Vec<UnitId> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let mut queue = VecDeque::new();

        if let Some(&start_idx) = self.node_indices.get(unit_id) {
            queue.push_back(start_idx);

            while let Some(current) = queue.pop_front() {
                for neighbor in self.graph.neighbors_directed(current, direction) {
                    if seen.insert(neighbor) {
                        found.push(self.graph[neighbor].id.clone());
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        found
    }

    /// Direct dependencies of a unit, in declaration order
    pub fn direct_dependencies(&self, unit_id: &str) -> Vec<UnitId> {
        let Some(&idx) = self.node_indices.get(unit_id) else {
            return Vec::new();
        };
        let mut deps: Vec<&DependencyNode> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| &self.graph[n])
            .collect();
        deps.sort_by_key(|n| n.sequence);
        deps.into_iter().map(|n| n.id.clone()).collect()
    }

    /// Incoming edges of a unit
    pub fn edges_into(&self, unit_id: &str) -> Vec<UnitDependency> {
        self.node_indices
            .get(unit_id)
            .map(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .map(|e| e.weight().clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, unit_id: &str) -> bool {
        self.node_indices.contains_key(unit_id)
    }

    /// Get a node by ID
    pub fn get_node(&self, unit_id: &str) -> Option<&DependencyNode> {
        self.node_indices
            .get(unit_id)
            .and_then(|idx| self.graph.node_weight(*idx))
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Generate a DOT format representation for visualization
    pub fn to_dot(&self) -> String {
        let mut output = String::new();
        output.push_str("digraph units {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [shape=box];\n\n");

        let mut nodes: Vec<&DependencyNode> = self.graph.node_weights().collect();
        nodes.sort_by_key(|n| n.sequence);
        for node in nodes {
            let shape = if node.kind.is_destructible() { "box" } else { "ellipse" };
            output.push_str(&format!(
                "  \"{}\" [label=\"{}\\n({})\", shape={}];\n",
                node.id, node.id, node.kind, shape
            ));
        }

        output.push('\n');

        for edge in self.graph.edge_references() {
            let source = &self.graph[edge.source()].id;
            let target = &self.graph[edge.target()].id;
            let style = match edge.weight().dependency_type {
                DependencyType::Explicit => "dashed",
                DependencyType::Reference => "solid",
                DependencyType::Recorded => "dotted",
            };
            output.push_str(&format!(
                "  \"{}\" -> \"{}\" [style={}];\n",
                source, target, style
            ));
        }

        output.push_str("}\n");
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{OutputRef, Unit};
    use crate::sources::{names, ModuleCatalog};

    fn unit(id: &str) -> Unit {
        let pin = ModuleCatalog::defaults().get(names::VPC).unwrap().clone();
        Unit::new(id, UnitKind::Vpc, pin)
    }

    fn set(units: Vec<Unit>) -> UnitSet {
        let mut set = UnitSet::new();
        for u in units {
            set.insert(u).unwrap();
        }
        set
    }

    #[test]
    fn test_dependency_graph_creation() {
        let graph = DependencyGraph::new();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_implicit_and_explicit_edges() {
        let units = set(vec![
            unit("vpc"),
            unit("subnets").attr("vpc_id", OutputRef::required("vpc", "vpc_id")),
            unit("cluster")
                .depends_on("subnets")
                .attr("vpc_id", OutputRef::required("vpc", "vpc_id")),
        ]);
        let graph = DependencyGraph::build(&units).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.direct_dependencies("cluster"), vec!["vpc", "subnets"]);
    }

    #[test]
    fn test_repeated_references_collapse() {
        let units = set(vec![
            unit("vpc"),
            unit("subnets")
                .depends_on("vpc")
                .attr("vpc_id", OutputRef::required("vpc", "vpc_id"))
                .attr("cidr", OutputRef::required("vpc", "cidr_block")),
        ]);
        let graph = DependencyGraph::build(&units).unwrap();
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_missing_required_reference() {
        let units = set(vec![unit("addon").attr("role", OutputRef::required("iam", "role_arn"))]);
        let err = DependencyGraph::build(&units).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidReference { ref unit, ref field, ref target }
                if unit == "addon" && field == "role" && target == "iam"
        ));
    }

    #[test]
    fn test_missing_optional_reference_is_skipped() {
        let units = set(vec![unit("addon").attr("role", OutputRef::optional("iam", "role_arn"))]);
        let graph = DependencyGraph::build(&units).unwrap();
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_missing_explicit_dependency() {
        let units = set(vec![unit("addon").depends_on("node_group")]);
        assert!(matches!(
            DependencyGraph::build(&units),
            Err(Error::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_cycle_detection() {
        let units = set(vec![
            unit("a").depends_on("c"),
            unit("b").depends_on("a"),
            unit("c").depends_on("b"),
        ]);
        let err = DependencyGraph::build(&units).unwrap_err();
        match err {
            Error::DependencyCycle { units } => assert_eq!(units, vec!["a", "b", "c"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let units = set(vec![unit("a").attr("x", OutputRef::required("a", "id"))]);
        assert!(matches!(
            DependencyGraph::build(&units),
            Err(Error::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_creation_order_is_stable() {
        let units = set(vec![
            unit("context"),
            unit("zeta").depends_on("context"),
            unit("alpha").depends_on("context"),
            unit("final").depends_on("zeta").depends_on("alpha"),
        ]);
        let graph = DependencyGraph::build(&units).unwrap();
        assert_eq!(
            graph.creation_order().unwrap(),
            vec!["context", "zeta", "alpha", "final"]
        );
        assert_eq!(
            graph.destroy_order().unwrap(),
            vec!["final", "alpha", "zeta", "context"]
        );
    }

    #[test]
    fn test_waves() {
        let units = set(vec![
            unit("vpc"),
            unit("a").depends_on("vpc"),
            unit("b").depends_on("vpc"),
            unit("c").depends_on("a").depends_on("b"),
            unit("d").depends_on("vpc"),
        ]);
        let graph = DependencyGraph::build(&units).unwrap();
        let waves = graph.waves().unwrap();
        assert_eq!(waves, vec![vec!["vpc"], vec!["a", "b", "d"], vec!["c"]]);
    }

    #[test]
    fn test_get_dependents_and_dependencies() {
        let units = set(vec![
            unit("a"),
            unit("b").depends_on("a"),
            unit("c").depends_on("b"),
        ]);
        let graph = DependencyGraph::build(&units).unwrap();

        let dependents = graph.get_dependents("a");
        assert!(dependents.contains(&"b".to_string()));
        assert!(dependents.contains(&"c".to_string()));

        let dependencies = graph.get_dependencies("c");
        assert_eq!(dependencies.len(), 2);
    }

    #[test]
    fn test_to_dot() {
        let units = set(vec![unit("vpc"), unit("subnets").depends_on("vpc")]);
        let graph = DependencyGraph::build(&units).unwrap();
        let dot = graph.to_dot();
        assert!(dot.contains("digraph units"));
        assert!(dot.contains("\"vpc\" -> \"subnets\" [style=dashed]"));
    }
}
