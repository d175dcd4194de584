//! # grafo
//!
//! A document-to-knowledge-graph pipeline engine. Documents go in; a typed,
//! weighted entity graph with analytics comes out.
//!
//! ## Architecture
//!
//! - **Pipeline** (`pipeline`): extraction → chunking → ontology inference →
//!   triple extraction → entity resolution → graph build, run by a
//!   background worker pool with polled job status
//! - **Entity resolution** (`resolve`): fuzzy/acronym/containment clustering
//!   with type compatibility gating
//! - **Graph** (`graph`): petgraph-backed store with merge semantics,
//!   analytics (density, betweenness, communities), and a visual projection
//! - **Storage** (`store`): memory registry → JSON records on disk → redb
//!   TTL cache, queried in that order
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use grafo::config::Settings;
//! use grafo::pipeline::{ChunkingEngine, HttpOracle, Orchestrator, StageSet, TextExtractor};
//! use grafo::resolve::EntityResolver;
//! use grafo::graph::GraphBuilder;
//!
//! let settings = Settings::from_env().unwrap();
//! let oracle = Arc::new(HttpOracle::new(&settings));
//! let stages = StageSet {
//!     extractor: Arc::new(TextExtractor),
//!     chunker: ChunkingEngine::new(settings.chunk_size, settings.chunk_overlap),
//!     ontology_oracle: oracle.clone(),
//!     triple_oracle: oracle,
//!     resolver: EntityResolver::with_threshold(settings.resolve_threshold),
//!     builder: GraphBuilder::new(),
//! };
//! let orchestrator = Orchestrator::new(settings, stages, None).unwrap();
//! let job_id = orchestrator.start_job(vec!["report.txt".into()]).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod paths;
pub mod pipeline;
pub mod resolve;
pub mod store;
pub mod triple;

pub use error::{GrafoError, GrafoResult};
pub use triple::Triple;
