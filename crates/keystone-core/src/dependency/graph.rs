use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Display;
use std::hash::Hash;

use crate::dependency::error::DependencyError;

/// Directed graph of "depends on" edges.
///
/// Nodes remember the order in which they were first added; every ordering
/// this graph produces breaks ties by that insertion order, so the same
/// input always yields the same sequence.
#[derive(Debug, Clone)]
pub struct DependencyGraph<K> {
    /// Nodes in insertion order
    nodes: Vec<K>,
    index: HashMap<K, usize>,
    /// node -> the nodes it depends on
    edges: BTreeMap<usize, BTreeSet<usize>>,
}

impl<K> DependencyGraph<K>
where
    K: Clone + Eq + Hash + Display,
{
    /// Create a new dependency graph
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: BTreeMap::new(),
        }
    }

    /// Add a node to the graph. Adding a node twice is a no-op.
    pub fn add_node(&mut self, node: K) -> usize {
        if let Some(&idx) = self.index.get(&node) {
            return idx;
        }
        let idx = self.nodes.len();
        self.index.insert(node.clone(), idx);
        self.nodes.push(node);
        idx
    }

    /// Add an edge to the graph (`node` depends on `dependency`)
    pub fn add_edge(&mut self, node: K, dependency: K) {
        let from = self.add_node(node);
        let to = self.add_node(dependency);
        self.edges.entry(from).or_default().insert(to);
    }

    /// Check if the graph contains a node
    pub fn contains(&self, node: &K) -> bool {
        self.index.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> &[K] {
        &self.nodes
    }

    /// Direct dependencies of a node, in insertion order.
    pub fn dependencies_of(&self, node: &K) -> Vec<K> {
        self.index
            .get(node)
            .and_then(|idx| self.edges.get(idx))
            .map(|deps| deps.iter().map(|&d| self.nodes[d].clone()).collect())
            .unwrap_or_default()
    }

    /// Nodes that depend directly on `node`, in insertion order.
    pub fn dependents_of(&self, node: &K) -> Vec<K> {
        let Some(&target) = self.index.get(node) else {
            return Vec::new();
        };
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(&target))
            .map(|(&from, _)| self.nodes[from].clone())
            .collect()
    }

    /// Transitive dependencies of `node`, parents before children.
    pub fn ancestors(&self, node: &K) -> Vec<K> {
        let Some(&start) = self.index.get(node) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        self.visit_ancestors(start, &mut seen, &mut out);
        out.retain(|&i| i != start);
        out.into_iter().map(|i| self.nodes[i].clone()).collect()
    }

    fn visit_ancestors(&self, node: usize, seen: &mut BTreeSet<usize>, out: &mut Vec<usize>) {
        if !seen.insert(node) {
            return;
        }
        if let Some(deps) = self.edges.get(&node) {
            for &dep in deps {
                self.visit_ancestors(dep, seen, out);
            }
        }
        out.push(node);
    }

    /// Transitive dependents of `node`, the furthest dependents first.
    ///
    /// This is the order in which they have to be stopped before `node`.
    pub fn descendants(&self, node: &K) -> Vec<K> {
        let Some(&start) = self.index.get(node) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        self.visit_descendants(start, &mut seen, &mut out);
        out.retain(|&i| i != start);
        out.into_iter().map(|i| self.nodes[i].clone()).collect()
    }

    fn visit_descendants(&self, node: usize, seen: &mut BTreeSet<usize>, out: &mut Vec<usize>) {
        if !seen.insert(node) {
            return;
        }
        for (&from, deps) in &self.edges {
            if deps.contains(&node) {
                self.visit_descendants(from, seen, out);
            }
        }
        out.push(node);
    }

    /// Returns one cycle as a closed path (`a -> b -> a`), if the graph has any.
    pub fn find_cycle(&self) -> Option<Vec<K>> {
        let mut visited = BTreeSet::new();
        let mut stack = Vec::new();

        for node in 0..self.nodes.len() {
            if !visited.contains(&node) {
                if let Some(cycle) = self.cycle_dfs(node, &mut visited, &mut stack) {
                    return Some(cycle.into_iter().map(|i| self.nodes[i].clone()).collect());
                }
            }
        }
        None
    }

    /// DFS to check for cycles
    fn cycle_dfs(&self, node: usize, visited: &mut BTreeSet<usize>, stack: &mut Vec<usize>) -> Option<Vec<usize>> {
        visited.insert(node);
        stack.push(node);

        if let Some(deps) = self.edges.get(&node) {
            for &dep in deps {
                if let Some(pos) = stack.iter().position(|&s| s == dep) {
                    let mut cycle = stack[pos..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
                if !visited.contains(&dep) {
                    if let Some(cycle) = self.cycle_dfs(dep, visited, stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        None
    }

    /// Topological order, dependencies before the nodes that depend on them.
    ///
    /// Kahn's algorithm; among the nodes that are ready at any step the one
    /// added first goes first.
    pub fn topological_order(&self) -> Result<Vec<K>, DependencyError> {
        let count = self.nodes.len();
        let mut remaining: Vec<usize> = (0..count)
            .map(|i| self.edges.get(&i).map_or(0, BTreeSet::len))
            .collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (&from, deps) in &self.edges {
            for &dep in deps {
                dependents[dep].push(from);
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &dependent in &dependents[node] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != count {
            let cycle = self
                .find_cycle()
                .map(|path| path.iter().map(ToString::to_string).collect())
                .unwrap_or_default();
            return Err(DependencyError::CyclicDependency(cycle));
        }

        Ok(order.into_iter().map(|i| self.nodes[i].clone()).collect())
    }

    /// Nodes rejected by `is_known`, in insertion order.
    pub fn missing(&self, is_known: impl Fn(&K) -> bool) -> Vec<K> {
        self.nodes.iter().filter(|node| !is_known(node)).cloned().collect()
    }
}

impl<K> Default for DependencyGraph<K>
where
    K: Clone + Eq + Hash + Display,
{
    fn default() -> Self {
        Self::new()
    }
}
