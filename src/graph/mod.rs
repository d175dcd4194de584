//! Knowledge-graph model: petgraph-backed node/edge store with merge semantics.
//!
//! Nodes are identified by canonical entity name. Repeated references merge:
//! the longest description wins, attributes are first-write-wins, and the
//! declared type is pinned by the first non-unknown sighting. Edges are keyed
//! by the `(source, target)` pair; see [`KnowledgeGraph::upsert_edge`] for the
//! weight/overwrite policy.

pub mod analytics;
pub mod visual;

use std::collections::{BTreeMap, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::triple::{Triple, UNKNOWN_TYPE};

use analytics::GraphStats;
use visual::VisualGraph;

/// Data carried by a graph node.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// Canonical entity name (node identity).
    pub name: String,
    /// Declared entity type; `UNKNOWN` until a typed triple mentions the node.
    pub entity_type: String,
    /// Longest description seen across merges.
    pub description: String,
    /// Extra attributes: first write wins, blanks never overwrite.
    pub attrs: BTreeMap<String, String>,
}

/// Data carried by a graph edge.
#[derive(Debug, Clone)]
pub struct EdgeData {
    /// Relation label (lower_snake_case).
    pub relation: String,
    /// Times the same `(source, target, relation)` was asserted.
    pub weight: u64,
}

/// Directed knowledge graph keyed by canonical entity name.
#[derive(Debug, Default)]
pub struct KnowledgeGraph {
    graph: DiGraph<NodeData, EdgeData>,
    /// Entity name -> node index, for O(1) upserts.
    index: HashMap<String, NodeIndex>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// The underlying petgraph structure (analytics, projections).
    pub fn inner(&self) -> &DiGraph<NodeData, EdgeData> {
        &self.graph
    }

    /// Look up a node by canonical name.
    pub fn node(&self, name: &str) -> Option<&NodeData> {
        self.index.get(name).map(|&idx| &self.graph[idx])
    }

    /// Total degree (in + out) of a node; 0 for unknown names.
    pub fn degree(&self, name: &str) -> usize {
        match self.index.get(name) {
            Some(&idx) => {
                self.graph.edges_directed(idx, Direction::Incoming).count()
                    + self.graph.edges_directed(idx, Direction::Outgoing).count()
            }
            None => 0,
        }
    }

    /// Create or merge a node.
    ///
    /// Merge rules: the type is pinned by the first non-unknown value; the
    /// longest description wins (length never decreases); attributes are
    /// first-write-wins and a blank value never lands.
    pub fn upsert_node(
        &mut self,
        name: &str,
        entity_type: &str,
        description: &str,
        attrs: &BTreeMap<String, String>,
    ) -> NodeIndex {
        let idx = match self.index.get(name) {
            Some(&idx) => idx,
            None => {
                let idx = self.graph.add_node(NodeData {
                    name: name.to_string(),
                    entity_type: UNKNOWN_TYPE.to_string(),
                    description: String::new(),
                    attrs: BTreeMap::new(),
                });
                self.index.insert(name.to_string(), idx);
                idx
            }
        };

        let node = &mut self.graph[idx];
        if node.entity_type == UNKNOWN_TYPE && !entity_type.trim().is_empty() {
            node.entity_type = entity_type.to_string();
        }
        if description.len() > node.description.len() {
            node.description = description.to_string();
        }
        for (key, value) in attrs {
            if value.trim().is_empty() {
                continue;
            }
            node.attrs.entry(key.clone()).or_insert_with(|| value.clone());
        }
        idx
    }

    /// Create or merge the single edge for `(source, target)`.
    ///
    /// Same relation: increment weight. Different relation: the new relation
    /// replaces the stored one and weight resets to 1. The overwrite is a
    /// deliberate, non-retroactive policy, not an accident of ordering.
    pub fn upsert_edge(&mut self, source: NodeIndex, target: NodeIndex, relation: &str) {
        if let Some(edge) = self.graph.find_edge(source, target) {
            let data = &mut self.graph[edge];
            if data.relation == relation {
                data.weight += 1;
            } else {
                tracing::debug!(
                    old = %data.relation,
                    new = %relation,
                    "edge relation overwritten"
                );
                data.relation = relation.to_string();
                data.weight = 1;
            }
        } else {
            self.graph.add_edge(
                source,
                target,
                EdgeData {
                    relation: relation.to_string(),
                    weight: 1,
                },
            );
        }
    }

    /// All outgoing `(target, relation, weight)` facts for a node.
    pub fn edges_from(&self, name: &str) -> Vec<(String, String, u64)> {
        match self.index.get(name) {
            Some(&idx) => self
                .graph
                .edges_directed(idx, Direction::Outgoing)
                .map(|e| {
                    (
                        self.graph[e.target()].name.clone(),
                        e.weight().relation.clone(),
                        e.weight().weight,
                    )
                })
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Everything the graph-build stage produces.
#[derive(Debug)]
pub struct BuildResult {
    /// The in-memory graph. Never serialized; in-process consumers only.
    pub graph: KnowledgeGraph,
    /// Derived metrics.
    pub stats: GraphStats,
    /// Serializable node-link projection, the only cross-boundary form.
    pub visual: VisualGraph,
}

/// Builds a [`KnowledgeGraph`] from canonicalized triples.
///
/// Stateless and side-effect free: the result depends only on the input
/// triple order (deterministic for a fixed order, not order-independent).
#[derive(Debug, Default)]
pub struct GraphBuilder;

impl GraphBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build the graph, its stats, and its visual projection.
    pub fn build(&self, triples: &[Triple]) -> BuildResult {
        let mut graph = KnowledgeGraph::new();

        tracing::info!(count = triples.len(), "building graph");

        for t in triples {
            if t.source.is_empty() || t.target.is_empty() || t.relation.is_empty() {
                continue;
            }

            let empty = BTreeMap::new();
            let src = graph.upsert_node(&t.source, &t.source_type, &t.source_desc, &empty);
            let tgt = graph.upsert_node(&t.target, &t.target_type, &t.target_desc, &empty);
            graph.upsert_edge(src, tgt, &t.relation);
        }

        tracing::info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "graph built"
        );

        let stats = analytics::analyze(&graph);
        let visual = visual::project(&graph, &stats);

        BuildResult {
            graph,
            stats,
            visual,
        }
    }
}
