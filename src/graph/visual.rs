//! Node-link projection for frontends.
//!
//! The in-memory graph never crosses a process boundary; this projection is
//! the only serialized form. Colors come from a fixed palette keyed by
//! community id so repeated builds of the same graph render identically.

use petgraph::visit::EdgeRef;
use petgraph::Direction;

use serde::{Deserialize, Serialize};

use super::analytics::{self, GraphStats};
use super::KnowledgeGraph;

/// Fixed color palette; community ids wrap around it.
const PALETTE: &[&str] = &[
    "#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f", "#edc948", "#b07aa1",
    "#ff9da7", "#9c755f", "#bab0ac",
];

/// A node as rendered by a frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub description: String,
    pub community: usize,
    pub color: String,
    pub degree: usize,
    /// Flattened extra attributes.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub attrs: std::collections::BTreeMap<String, String>,
}

/// An edge as rendered by a frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub relation: String,
    pub weight: u64,
}

/// Serializable node-link form of the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualGraph {
    pub nodes: Vec<VisualNode>,
    pub edges: Vec<VisualEdge>,
}

/// Project the graph into its node-link form.
///
/// Stats are taken as input so the projection and the reported metrics come
/// from the same build pass.
pub fn project(kg: &KnowledgeGraph, _stats: &GraphStats) -> VisualGraph {
    let graph = kg.inner();
    let communities = analytics::community_labels(kg);

    let nodes = graph
        .node_indices()
        .map(|idx| {
            let node = &graph[idx];
            let community = communities.get(idx.index()).copied().unwrap_or(0);
            VisualNode {
                id: node.name.clone(),
                label: node.name.clone(),
                entity_type: node.entity_type.clone(),
                description: node.description.clone(),
                community,
                color: PALETTE[community % PALETTE.len()].to_string(),
                degree: graph.edges_directed(idx, Direction::Incoming).count()
                    + graph.edges_directed(idx, Direction::Outgoing).count(),
                attrs: node.attrs.clone(),
            }
        })
        .collect();

    let edges = graph
        .edge_references()
        .enumerate()
        .map(|(i, edge)| VisualEdge {
            id: format!("edge_{i}"),
            source: graph[edge.source()].name.clone(),
            target: graph[edge.target()].name.clone(),
            relation: edge.weight().relation.clone(),
            weight: edge.weight().weight,
        })
        .collect();

    VisualGraph { nodes, edges }
}
