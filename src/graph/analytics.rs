//! Graph analytics: structural, quality, and semantic metrics.
//!
//! All metrics derive from the finished [`KnowledgeGraph`]; nothing here
//! mutates the graph. Betweenness uses Brandes' algorithm; communities use
//! bounded label propagation over the undirected closure and degrade to a
//! single community when propagation does not settle.

use std::collections::{BTreeMap, HashMap, VecDeque};

use petgraph::algo::connected_components;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use serde::{Deserialize, Serialize};

use crate::triple::UNKNOWN_TYPE;

use super::KnowledgeGraph;

/// Sweep cap for label propagation before declaring non-convergence.
const MAX_PROPAGATION_SWEEPS: usize = 50;

/// Derived metrics over the built graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    /// Entity-type histogram over nodes.
    pub entity_types: BTreeMap<String, usize>,
    /// Relation histogram over edges.
    pub relation_types: BTreeMap<String, usize>,
    /// Directed density `E / (N * (N - 1))`; 0 when N <= 1.
    pub density: f64,
    /// Whether the undirected closure is a single component.
    pub is_connected: bool,
    /// `2E / N`; 0 for the empty graph.
    pub avg_degree: f64,
    /// Mean normalized betweenness centrality; 0 when infeasible (N < 3).
    pub avg_betweenness: f64,
    /// Per-attribute coverage: nodes carrying the attribute / N, as a percentage.
    pub property_sparsity: BTreeMap<String, f64>,
    /// Mean of `property_sparsity` across observed attribute keys.
    pub avg_property_sparsity: f64,
    /// Fraction of nodes with a known (non-default) type.
    pub type_consistency: f64,
    /// `E / N`; 0 for the empty graph.
    pub triples_entities_ratio: f64,
    /// Mean out-degree.
    pub avg_fan_out: f64,
    /// Blended centrality per node: `(degree/(N-1) + betweenness) / 2`.
    pub node_importance: BTreeMap<String, f64>,
    /// Number of distinct communities found.
    pub community_count: usize,
}

/// Compute the full metric set for a graph.
pub fn analyze(kg: &KnowledgeGraph) -> GraphStats {
    let graph = kg.inner();
    let n = graph.node_count();
    let e = graph.edge_count();

    let mut entity_types: BTreeMap<String, usize> = BTreeMap::new();
    let mut attr_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut known_typed = 0usize;

    for idx in graph.node_indices() {
        let node = &graph[idx];
        *entity_types.entry(node.entity_type.clone()).or_insert(0) += 1;
        if node.entity_type != UNKNOWN_TYPE {
            known_typed += 1;
        }
        for key in node.attrs.keys() {
            *attr_counts.entry(key.clone()).or_insert(0) += 1;
        }
    }

    let mut relation_types: BTreeMap<String, usize> = BTreeMap::new();
    for edge in graph.edge_references() {
        *relation_types
            .entry(edge.weight().relation.clone())
            .or_insert(0) += 1;
    }

    let density = if n > 1 {
        e as f64 / (n as f64 * (n as f64 - 1.0))
    } else {
        0.0
    };

    let betweenness = betweenness_centrality(kg);
    let avg_betweenness = if betweenness.is_empty() {
        0.0
    } else {
        betweenness.iter().sum::<f64>() / betweenness.len() as f64
    };

    let property_sparsity: BTreeMap<String, f64> = attr_counts
        .into_iter()
        .map(|(key, count)| (key, count as f64 / n as f64 * 100.0))
        .collect();
    let avg_property_sparsity = if property_sparsity.is_empty() {
        0.0
    } else {
        property_sparsity.values().sum::<f64>() / property_sparsity.len() as f64
    };

    let mut node_importance = BTreeMap::new();
    for idx in graph.node_indices() {
        let degree = graph.edges_directed(idx, Direction::Incoming).count()
            + graph.edges_directed(idx, Direction::Outgoing).count();
        let normalized_degree = if n > 1 {
            degree as f64 / (n as f64 - 1.0)
        } else {
            0.0
        };
        let btw = betweenness.get(idx.index()).copied().unwrap_or(0.0);
        node_importance.insert(graph[idx].name.clone(), (normalized_degree + btw) / 2.0);
    }

    let communities = community_labels(kg);
    let community_count = communities
        .iter()
        .collect::<std::collections::HashSet<_>>()
        .len();

    GraphStats {
        node_count: n,
        edge_count: e,
        entity_types,
        relation_types,
        density,
        is_connected: n > 0 && connected_components(graph) == 1,
        avg_degree: if n > 0 { 2.0 * e as f64 / n as f64 } else { 0.0 },
        avg_betweenness,
        property_sparsity,
        avg_property_sparsity,
        type_consistency: if n > 0 { known_typed as f64 / n as f64 } else { 0.0 },
        triples_entities_ratio: if n > 0 { e as f64 / n as f64 } else { 0.0 },
        avg_fan_out: if n > 0 { e as f64 / n as f64 } else { 0.0 },
        node_importance,
        community_count,
    }
}

/// Normalized betweenness centrality per node index (Brandes, unweighted,
/// directed). Returns all zeros for graphs with fewer than 3 nodes.
pub fn betweenness_centrality(kg: &KnowledgeGraph) -> Vec<f64> {
    let graph = kg.inner();
    let n = graph.node_count();
    let mut centrality = vec![0.0f64; n];
    if n < 3 {
        return centrality;
    }

    for s in graph.node_indices() {
        // Single-source shortest paths (BFS, unit weights).
        let mut stack: Vec<NodeIndex> = Vec::new();
        let mut predecessors: Vec<Vec<NodeIndex>> = vec![Vec::new(); n];
        let mut sigma = vec![0.0f64; n];
        let mut dist = vec![-1i64; n];
        sigma[s.index()] = 1.0;
        dist[s.index()] = 0;

        let mut queue = VecDeque::new();
        queue.push_back(s);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            for edge in graph.edges_directed(v, Direction::Outgoing) {
                let w = edge.target();
                if dist[w.index()] < 0 {
                    dist[w.index()] = dist[v.index()] + 1;
                    queue.push_back(w);
                }
                if dist[w.index()] == dist[v.index()] + 1 {
                    sigma[w.index()] += sigma[v.index()];
                    predecessors[w.index()].push(v);
                }
            }
        }

        // Back-propagate dependencies.
        let mut delta = vec![0.0f64; n];
        while let Some(w) = stack.pop() {
            for &v in &predecessors[w.index()] {
                delta[v.index()] +=
                    sigma[v.index()] / sigma[w.index()] * (1.0 + delta[w.index()]);
            }
            if w != s {
                centrality[w.index()] += delta[w.index()];
            }
        }
    }

    // Directed normalization: (N-1)(N-2) source/target pairs per middle node.
    let scale = 1.0 / ((n as f64 - 1.0) * (n as f64 - 2.0));
    for c in &mut centrality {
        *c *= scale;
    }
    centrality
}

/// Community id per node index via label propagation on the undirected
/// closure. Deterministic: nodes sweep in index order and ties pick the
/// smallest label. If propagation does not settle within the sweep cap,
/// every node reports community 0.
pub fn community_labels(kg: &KnowledgeGraph) -> Vec<usize> {
    let graph = kg.inner();
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }

    let mut labels: Vec<usize> = (0..n).collect();
    let mut converged = false;

    for _ in 0..MAX_PROPAGATION_SWEEPS {
        let mut changed = false;
        for v in graph.node_indices() {
            let mut counts: HashMap<usize, usize> = HashMap::new();
            for edge in graph.edges_directed(v, Direction::Outgoing) {
                *counts.entry(labels[edge.target().index()]).or_insert(0) += 1;
            }
            for edge in graph.edges_directed(v, Direction::Incoming) {
                *counts.entry(labels[edge.source().index()]).or_insert(0) += 1;
            }
            if counts.is_empty() {
                continue;
            }
            // Highest count, ties to the smallest label.
            let best = counts
                .into_iter()
                .min_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)))
                .map(|(label, _)| label)
                .unwrap_or(labels[v.index()]);
            if best != labels[v.index()] {
                labels[v.index()] = best;
                changed = true;
            }
        }
        if !changed {
            converged = true;
            break;
        }
    }

    if !converged {
        tracing::warn!("community propagation did not settle; using a single community");
        return vec![0; n];
    }

    // Compress labels to dense ids ordered by first appearance.
    let mut dense: HashMap<usize, usize> = HashMap::new();
    labels
        .iter()
        .map(|&label| {
            let next = dense.len();
            *dense.entry(label).or_insert(next)
        })
        .collect()
}
