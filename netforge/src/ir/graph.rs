//! Component Connectivity Graph
//!
//! Undirected petgraph view of a circuit: one node per component, one edge
//! per connected component pair. Edge weights count how many times the pair
//! shares a net, so several shared nets or pins compound the weight. The
//! placement engine reads its spring weights from here.

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

use super::{parse_node, Component, Net};

#[derive(Debug, Clone)]
pub struct ConnectivityGraph {
    graph: UnGraph<String, u32>,

    /// Index mapping: component id -> node index
    component_indices: HashMap<String, NodeIndex>,
}

impl ConnectivityGraph {
    /// Build the graph. Node `i` is the `i`-th distinct component id in input
    /// order; net nodes naming unknown components are ignored.
    pub fn build(components: &[Component], nets: &[Net]) -> Self {
        let mut graph = UnGraph::new_undirected();
        let mut component_indices = HashMap::new();

        for component in components {
            if !component_indices.contains_key(&component.id) {
                let idx = graph.add_node(component.id.clone());
                component_indices.insert(component.id.clone(), idx);
            }
        }

        let mut built = Self {
            graph,
            component_indices,
        };

        for net in nets {
            let members: Vec<NodeIndex> = net
                .nodes
                .iter()
                .filter_map(|node| parse_node(node))
                .filter_map(|(id, _)| built.component_indices.get(id).copied())
                .collect();

            for (i, &a) in members.iter().enumerate() {
                for &b in &members[i + 1..] {
                    if a != b {
                        built.bump(a, b);
                    }
                }
            }
        }

        built
    }

    fn bump(&mut self, a: NodeIndex, b: NodeIndex) {
        match self.graph.find_edge(a, b) {
            Some(edge) => {
                if let Some(weight) = self.graph.edge_weight_mut(edge) {
                    *weight += 1;
                }
            }
            None => {
                self.graph.add_edge(a, b, 1);
            }
        }
    }

    pub fn component_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Component id of node `index`.
    pub fn component_id(&self, index: usize) -> Option<&str> {
        self.graph
            .node_weight(NodeIndex::new(index))
            .map(String::as_str)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.component_indices.get(id).map(|idx| idx.index())
    }

    /// Accumulated connection weight between two components (0 if unconnected).
    pub fn weight(&self, a: &str, b: &str) -> u32 {
        let (Some(&ia), Some(&ib)) = (self.component_indices.get(a), self.component_indices.get(b))
        else {
            return 0;
        };
        self.graph
            .find_edge(ia, ib)
            .and_then(|edge| self.graph.edge_weight(edge))
            .copied()
            .unwrap_or(0)
    }

    /// Every connected pair as `(node_a, node_b, weight)`.
    pub fn weighted_pairs(&self) -> Vec<(usize, usize, u32)> {
        self.graph
            .edge_references()
            .map(|edge| (edge.source().index(), edge.target().index(), *edge.weight()))
            .collect()
    }

    /// Components directly sharing at least one net with `id`, sorted.
    pub fn neighbors(&self, id: &str) -> Vec<&str> {
        let Some(&idx) = self.component_indices.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = self
            .graph
            .neighbors(idx)
            .filter_map(|n| self.graph.node_weight(n))
            .map(String::as_str)
            .collect();
        out.sort_unstable();
        out
    }
}
