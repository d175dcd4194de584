//! The document-to-graph pipeline: extraction, chunking, oracle calls,
//! entity resolution, graph build, and the orchestrator that runs it all.

pub mod extract;
pub mod job;
pub mod oracle;
pub mod orchestrator;

pub use extract::{Chunk, ChunkingEngine, DocumentExtractor, ExtractedDocument, TextExtractor};
pub use job::{Job, JobStatus, JobView, Stage, Usage};
pub use oracle::{
    HttpOracle, Ontology, OntologyOracle, OntologyOutcome, OracleUsage, TripleOracle,
    TripleOutcome,
};
pub use orchestrator::{Orchestrator, StageSet};
