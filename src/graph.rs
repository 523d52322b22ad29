//! Dependency graph and layered execution planning
//!
//! Nodes are step names; edges are typed (data, explicit, resource,
//! temporal) and unique per `(from, to, kind)`. Planning groups nodes
//! into layers where every predecessor sits in an earlier layer, sorted
//! lexicographically inside each layer for determinism, and computes the
//! longest path for reporting.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::Serialize;

use crate::error::GraphError;

/// Why an edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DepKind {
    /// Derived from a cross-step output reference.
    Data,
    /// Declared via `depends_on`.
    Explicit,
    /// Shared-resource constraint.
    Resource,
    /// Time-window constraint.
    Temporal,
}

/// Directed dependency: `to` depends on `from`.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub kind: DepKind,
    pub metadata: BTreeMap<String, String>,
}

impl DependencyEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: DepKind) -> DependencyEdge {
        DependencyEdge {
            from: from.into(),
            to: to.into(),
            kind,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One group of steps with no mutual dependency.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionLayer {
    pub index: usize,
    pub nodes: Vec<String>,
}

impl ExecutionLayer {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Layered plan plus reporting metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub layers: Vec<ExecutionLayer>,
    pub total_nodes: usize,
    pub critical_path: Vec<String>,
}

impl ExecutionPlan {
    /// Number of layers.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Widest layer.
    pub fn max_parallelism(&self) -> usize {
        self.layers.iter().map(ExecutionLayer::len).max().unwrap_or(0)
    }

    /// Sequential flattening of the plan.
    pub fn flatten(&self) -> Vec<String> {
        self.layers
            .iter()
            .flat_map(|l| l.nodes.iter().cloned())
            .collect()
    }
}

/// Adjacency-map dependency graph.
#[derive(Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    successors: HashMap<String, BTreeSet<String>>,
    predecessors: HashMap<String, BTreeSet<String>>,
    edges: HashMap<(String, String, DepKind), DependencyEdge>,
}

impl DependencyGraph {
    pub fn new() -> DependencyGraph {
        DependencyGraph::default()
    }

    pub fn add_node(&mut self, name: impl Into<String>) {
        self.nodes.insert(name.into());
    }

    /// Insert an edge; both endpoints become nodes. Duplicate
    /// `(from, to, kind)` edges collapse to the latest metadata.
    pub fn add_edge(&mut self, edge: DependencyEdge) {
        self.nodes.insert(edge.from.clone());
        self.nodes.insert(edge.to.clone());
        self.successors
            .entry(edge.from.clone())
            .or_default()
            .insert(edge.to.clone());
        self.predecessors
            .entry(edge.to.clone())
            .or_default()
            .insert(edge.from.clone());
        self.edges
            .insert((edge.from.clone(), edge.to.clone(), edge.kind), edge);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains(node)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn predecessors(&self, node: &str) -> BTreeSet<String> {
        self.predecessors.get(node).cloned().unwrap_or_default()
    }

    pub fn successors(&self, node: &str) -> BTreeSet<String> {
        self.successors.get(node).cloned().unwrap_or_default()
    }

    pub fn edges(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.edges.values()
    }

    /// Check that every predecessor is a known node. Strict mode fails;
    /// lax mode returns warnings.
    pub fn validate(&self, strict: bool) -> Result<Vec<String>, GraphError> {
        let mut warnings = Vec::new();
        for node in &self.nodes {
            let missing: Vec<String> = self
                .predecessors(node)
                .into_iter()
                .filter(|pred| !self.nodes.contains(pred))
                .collect();
            if !missing.is_empty() {
                if strict {
                    return Err(GraphError::MissingDependency {
                        node: node.clone(),
                        missing,
                    });
                }
                warnings.push(format!(
                    "step '{node}' depends on missing step(s): {}",
                    missing.join(", ")
                ));
            }
        }
        Ok(warnings)
    }

    pub fn has_cycle(&self) -> bool {
        self.topological_sort().is_err()
    }

    /// Find one cycle path by DFS, if any.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = BTreeSet::new();
        let mut stack = BTreeSet::new();
        let mut path = Vec::new();

        for node in &self.nodes {
            if !visited.contains(node) {
                if let Some(cycle) = self.dfs_cycle(node, &mut visited, &mut stack, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut BTreeSet<String>,
        stack: &mut BTreeSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        stack.insert(node.to_string());
        path.push(node.to_string());

        for succ in self.successors(node) {
            if !visited.contains(&succ) {
                if let Some(cycle) = self.dfs_cycle(&succ, visited, stack, path) {
                    return Some(cycle);
                }
            } else if stack.contains(&succ) {
                let start = path.iter().position(|n| n == &succ).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].to_vec();
                cycle.push(succ);
                return Some(cycle);
            }
        }

        path.pop();
        stack.remove(node);
        None
    }

    /// Kahn's algorithm; on failure the reported error carries one cycle.
    pub fn topological_sort(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: BTreeMap<&String, usize> = self
            .nodes
            .iter()
            .map(|n| (n, self.predecessors.get(n).map(BTreeSet::len).unwrap_or(0)))
            .collect();

        let mut queue: VecDeque<&String> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut order = Vec::new();

        while let Some(node) = queue.pop_front() {
            order.push(node.clone());
            if let Some(succs) = self.successors.get(node) {
                for succ in succs {
                    if let Some(degree) = in_degree.get_mut(succ) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(succ);
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let cycle = self.find_cycle().unwrap_or_else(|| {
                self.nodes
                    .iter()
                    .filter(|n| !order.contains(n))
                    .cloned()
                    .collect()
            });
            return Err(GraphError::Cycle { path: cycle });
        }
        Ok(order)
    }

    /// Group nodes into parallel layers and compute the critical path.
    pub fn build_plan(&self) -> Result<ExecutionPlan, GraphError> {
        if self.nodes.is_empty() {
            return Ok(ExecutionPlan {
                layers: Vec::new(),
                total_nodes: 0,
                critical_path: Vec::new(),
            });
        }

        let mut layers = Vec::new();
        let mut remaining: BTreeSet<String> = self.nodes.clone();
        let mut completed: BTreeSet<String> = BTreeSet::new();

        while !remaining.is_empty() {
            // Nodes whose predecessors are all completed; BTreeSet keeps
            // each layer lexicographically sorted.
            let ready: Vec<String> = remaining
                .iter()
                .filter(|n| self.predecessors(n).iter().all(|p| completed.contains(p)))
                .cloned()
                .collect();

            if ready.is_empty() {
                let cycle = self
                    .find_cycle()
                    .unwrap_or_else(|| remaining.iter().cloned().collect());
                return Err(GraphError::Cycle { path: cycle });
            }

            for node in &ready {
                remaining.remove(node);
                completed.insert(node.clone());
            }
            layers.push(ExecutionLayer {
                index: layers.len(),
                nodes: ready,
            });
        }

        Ok(ExecutionPlan {
            layers,
            total_nodes: self.nodes.len(),
            critical_path: self.critical_path(),
        })
    }

    /// Longest path through the DAG (empty if cyclic).
    fn critical_path(&self) -> Vec<String> {
        let Ok(order) = self.topological_sort() else {
            return Vec::new();
        };
        if order.is_empty() {
            return Vec::new();
        }

        let mut dist: HashMap<String, usize> = order.iter().map(|n| (n.clone(), 0)).collect();
        let mut prev: HashMap<String, Option<String>> =
            order.iter().map(|n| (n.clone(), None)).collect();

        for node in &order {
            if let Some(succs) = self.successors.get(node) {
                for succ in succs {
                    let candidate = dist[node] + 1;
                    if candidate > dist.get(succ).copied().unwrap_or(0) {
                        dist.insert(succ.clone(), candidate);
                        prev.insert(succ.clone(), Some(node.clone()));
                    }
                }
            }
        }

        let end = order
            .iter()
            .max_by_key(|n| dist[*n])
            .cloned()
            .expect("non-empty order");
        let mut path = vec![end.clone()];
        let mut current = end;
        while let Some(Some(p)) = prev.get(&current).cloned() {
            path.push(p.clone());
            current = p;
        }
        path.reverse();
        path
    }
}
