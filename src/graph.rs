//! Dependency graph module.
//!
//! Provides `RuleGraph`, the attribute dependency graph built from the
//! registered rules. The evaluator walks it component by component; a
//! strongly-connected component with more than one member (or a self-loop)
//! is a cycle, which is broken deterministically rather than rejected.

use crate::attr_key::AttrKey;
use crate::error::format_cycle_path;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// A group of attributes evaluated together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Members in key order.
    pub members: Vec<AttrKey>,
    /// True if the members depend on each other (or one on itself).
    pub cyclic: bool,
}

/// A directed graph of attribute dependencies.
///
/// Nodes are `AttrKey`s. If attribute A depends on attribute B, the graph
/// holds an edge B → A, so B is evaluated first.
///
/// # Examples
///
/// ```rust
/// use rulegraph::graph::RuleGraph;
/// use rulegraph::AttrKey;
///
/// let mut graph = RuleGraph::new();
/// let level = AttrKey::new("level");
/// let tough = AttrKey::new("combatNotes.tough");
///
/// // combatNotes.tough depends on level
/// graph.add_edge(tough.clone(), level.clone());
///
/// let order = graph.evaluation_order();
/// let pos = |k: &AttrKey| order.iter().position(|c| c.members.contains(k)).unwrap();
/// assert!(pos(&level) < pos(&tough));
/// ```
pub struct RuleGraph {
    graph: DiGraph<AttrKey, ()>,
    node_map: HashMap<AttrKey, NodeIndex>,
}

impl RuleGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
        }
    }

    /// Add a node to the graph if it doesn't exist.
    ///
    /// Returns the node index for this key.
    pub fn add_node(&mut self, key: AttrKey) -> NodeIndex {
        if let Some(&idx) = self.node_map.get(&key) {
            return idx;
        }
        let idx = self.graph.add_node(key.clone());
        self.node_map.insert(key, idx);
        idx
    }

    /// Record that `dependent` reads `dependency`.
    pub fn add_edge(&mut self, dependent: AttrKey, dependency: AttrKey) {
        let from_idx = self.add_node(dependent);
        let to_idx = self.add_node(dependency);
        if !self.graph.contains_edge(to_idx, from_idx) {
            self.graph.add_edge(to_idx, from_idx, ());
        }
    }

    /// Components in dependency order: every component comes after each
    /// component it reads from.
    pub fn evaluation_order(&self) -> Vec<Component> {
        // tarjan_scc yields components in reverse topological order.
        let mut sccs = tarjan_scc(&self.graph);
        sccs.reverse();
        sccs.into_iter()
            .map(|indices| {
                let cyclic = indices.len() > 1
                    || indices
                        .first()
                        .is_some_and(|&i| self.graph.contains_edge(i, i));
                let mut members: Vec<AttrKey> =
                    indices.into_iter().map(|i| self.graph[i].clone()).collect();
                members.sort();
                Component { members, cyclic }
            })
            .collect()
    }

    /// Every cycle, each as a closed path (`a -> b -> a`).
    pub fn cycles(&self) -> Vec<Vec<AttrKey>> {
        self.evaluation_order()
            .into_iter()
            .filter(|c| c.cyclic)
            .map(|c| {
                let mut path = c.members;
                if let Some(first) = path.first().cloned() {
                    path.push(first);
                }
                path
            })
            .collect()
    }

    /// Human-readable descriptions of every cycle.
    pub fn describe_cycles(&self) -> Vec<String> {
        self.cycles()
            .iter()
            .map(|path| format_cycle_path(path))
            .collect()
    }

    /// All keys in the graph.
    pub fn nodes(&self) -> Vec<AttrKey> {
        self.graph
            .node_indices()
            .map(|idx| self.graph[idx].clone())
            .collect()
    }

    pub fn contains_node(&self, key: &AttrKey) -> bool {
        self.node_map.contains_key(key)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}

impl Default for RuleGraph {
    fn default() -> Self {
        Self::new()
    }
}
