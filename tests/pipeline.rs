//! End-to-end pipeline tests with scripted oracles.
//!
//! The oracle collaborators are replaced with deterministic scripts so the
//! whole extraction → resolution → graph-build path runs without a network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use grafo::config::Settings;
use grafo::error::OracleError;
use grafo::graph::GraphBuilder;
use grafo::paths::GrafoPaths;
use grafo::pipeline::{
    ChunkingEngine, JobStatus, Ontology, OntologyOracle, OntologyOutcome, OracleUsage,
    Orchestrator, StageSet, TextExtractor, TripleOracle, TripleOutcome,
};
use grafo::resolve::EntityResolver;
use grafo::Triple;

const WAIT: Duration = Duration::from_secs(10);

/// Oracle that replays a fixed script instead of calling a model. Queued
/// per-call scripts are consumed first; after that every call returns the
/// fallback list.
struct ScriptedOracle {
    queued: Mutex<VecDeque<Vec<Triple>>>,
    fallback: Vec<Triple>,
    fail_extraction: bool,
}

impl ScriptedOracle {
    fn returning(triples: Vec<Triple>) -> Arc<Self> {
        Arc::new(Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: triples,
            fail_extraction: false,
        })
    }

    fn per_call(scripts: Vec<Vec<Triple>>) -> Arc<Self> {
        Arc::new(Self {
            queued: Mutex::new(scripts.into()),
            fallback: Vec::new(),
            fail_extraction: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: Vec::new(),
            fail_extraction: true,
        })
    }
}

impl OntologyOracle for ScriptedOracle {
    fn infer_ontology(&self, _sample: &str) -> Result<OntologyOutcome, OracleError> {
        Ok(OntologyOutcome {
            ontology: Ontology::default(),
            usage: OracleUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
            },
        })
    }
}

impl TripleOracle for ScriptedOracle {
    fn extract_triples(
        &self,
        _chunk: &str,
        _ontology: &Ontology,
    ) -> Result<TripleOutcome, OracleError> {
        if self.fail_extraction {
            return Err(OracleError::RequestFailed {
                message: "connection refused".into(),
            });
        }
        let triples = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(TripleOutcome {
            triples,
            usage: OracleUsage {
                prompt_tokens: 200,
                completion_tokens: 80,
            },
        })
    }
}

fn stage_set(oracle: Arc<ScriptedOracle>) -> StageSet {
    StageSet {
        extractor: Arc::new(TextExtractor),
        chunker: ChunkingEngine::new(4_000, 400),
        ontology_oracle: oracle.clone(),
        triple_oracle: oracle,
        resolver: EntityResolver::with_threshold(85),
        builder: GraphBuilder::new(),
    }
}

fn write_doc(dir: &TempDir, name: &str, text: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, text).unwrap();
    path.display().to_string()
}

#[test]
fn full_run_merges_entities_and_reports_graph() {
    let docs = TempDir::new().unwrap();
    let doc_a = write_doc(&docs, "energia.txt", "A Petrobras investe em energia renovável.");
    let doc_b = write_doc(&docs, "pesquisa.txt", "A USP colabora com a Petrobras.");

    // Two documents, five raw triples. "Petrobras"/"PETROBRAS" is a casing
    // duplicate and "USP"/"Universidade de São Paulo" an acronym pair, so the
    // final graph has four nodes.
    let org = "ORGANIZACAO";
    let oracle = ScriptedOracle::per_call(vec![
        vec![
            Triple::new("Petrobras", "investe_em", "Energia Renovável")
                .with_types(org, "CONCEITO"),
            Triple::new("PETROBRAS", "sediada_em", "Rio de Janeiro")
                .with_types(org, "LOCALIDADE"),
            Triple::new("Universidade de São Paulo", "pesquisa", "Energia Renovável")
                .with_types(org, "CONCEITO"),
        ],
        vec![
            Triple::new("USP", "colabora_com", "Petrobras").with_types(org, org),
            Triple::new("Rio de Janeiro", "abriga", "USP").with_types("LOCALIDADE", org),
        ],
    ]);

    let orchestrator = Orchestrator::new(Settings::default(), stage_set(oracle), None).unwrap();
    let id = orchestrator.start_job(vec![doc_a, doc_b]).unwrap();
    let view = orchestrator.wait(&id, WAIT).unwrap();

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.progress, 1.0);
    assert!(view.error.is_none());
    assert!(view.finished_at.is_some());

    let stats = &view.results["stats"];
    assert_eq!(stats["node_count"], 4);
    assert!(stats["edge_count"].as_u64().unwrap() <= 5);

    assert_eq!(view.results["triples_extracted"], 5);
    assert_eq!(view.results["triples_resolved"], 5);

    // The visual projection carries the merged nodes only.
    let nodes = view.results["graph"]["nodes"].as_array().unwrap();
    assert!(nodes.iter().any(|n| n["id"] == "USP"));
    assert!(nodes.iter().any(|n| n["id"] == "PETROBRAS"));
    assert!(!nodes.iter().any(|n| n["id"] == "Universidade de São Paulo"));
    assert!(!nodes.iter().any(|n| n["id"] == "Petrobras"));

    // Internal bookkeeping never leaks into the public view.
    assert!(view.results.keys().all(|k| !k.starts_with('_')));

    // One ontology call plus two chunk calls, priced as gpt-4o-mini.
    assert_eq!(view.usage.total_tokens, 710);
    assert!((view.usage.cost_usd - 0.000201).abs() < 1e-9);

    // The in-memory graph is queryable while the job is resident.
    let graph = orchestrator.graph(&id).unwrap();
    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.degree("USP"), 3);
}

#[test]
fn progress_is_monotonic_through_the_run() {
    let docs = TempDir::new().unwrap();
    let doc = write_doc(&docs, "texto.txt", &"Um parágrafo qualquer. ".repeat(50));

    let oracle = ScriptedOracle::returning(vec![Triple::new("A", "conhece", "B")]);
    let orchestrator = Orchestrator::new(Settings::default(), stage_set(oracle), None).unwrap();
    let id = orchestrator.start_job(vec![doc]).unwrap();

    let mut samples = Vec::new();
    let deadline = std::time::Instant::now() + WAIT;
    loop {
        let view = orchestrator.get_status(&id).unwrap();
        samples.push(view.progress);
        if matches!(view.status, JobStatus::Completed | JobStatus::Failed) {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "job never finished");
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(
        samples.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {samples:?}"
    );
    assert_eq!(*samples.last().unwrap(), 1.0);
}

#[test]
fn finished_jobs_survive_registry_eviction() {
    let docs = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let doc = write_doc(&docs, "relatorio.txt", "A Petrobras investe em energia.");

    let oracle = ScriptedOracle::returning(vec![
        Triple::new("Petrobras", "investe_em", "Energia").with_types("ORGANIZACAO", "CONCEITO"),
    ]);
    let paths = GrafoPaths::at(data.path());
    paths.ensure_dirs().unwrap();

    let orchestrator =
        Orchestrator::new(Settings::default(), stage_set(oracle), Some(&paths)).unwrap();
    let id = orchestrator.start_job(vec![doc]).unwrap();
    let live = orchestrator.wait(&id, WAIT).unwrap();
    assert_eq!(live.status, JobStatus::Completed);

    orchestrator.evict(&id);
    assert!(orchestrator.graph(&id).is_none());

    // Status still answers from the durable tiers.
    let persisted = orchestrator.get_status(&id).unwrap();
    assert_eq!(persisted.status, JobStatus::Completed);
    assert_eq!(persisted.progress, 1.0);
    assert_eq!(persisted.results["stats"], live.results["stats"]);
    assert_eq!(persisted.usage, live.usage);
    // The ETA is ephemeral and never persisted.
    assert!(persisted.estimated_remaining_secs.is_none());

    // The disk record is named after the document.
    let names: Vec<String> = std::fs::read_dir(paths.jobs_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("relatorio"));
    assert!(names[0].ends_with(&format!("_{id}.json")));
}

#[test]
fn oracle_outage_fails_the_job_with_a_message() {
    let docs = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let doc = write_doc(&docs, "doc.txt", "Conteúdo de teste.");

    let paths = GrafoPaths::at(data.path());
    paths.ensure_dirs().unwrap();
    let orchestrator = Orchestrator::new(
        Settings::default(),
        stage_set(ScriptedOracle::failing()),
        Some(&paths),
    )
    .unwrap();

    let id = orchestrator.start_job(vec![doc]).unwrap();
    let view = orchestrator.wait(&id, WAIT).unwrap();

    assert_eq!(view.status, JobStatus::Failed);
    let error = view.error.unwrap();
    assert!(error.contains("connection refused"), "got: {error}");
    assert!(view.progress < 1.0);

    // Failures persist too.
    orchestrator.evict(&id);
    let persisted = orchestrator.get_status(&id).unwrap();
    assert_eq!(persisted.status, JobStatus::Failed);
}

#[test]
fn unsupported_document_fails_before_the_oracle_runs() {
    let docs = TempDir::new().unwrap();
    let path = docs.path().join("report.pdf");
    std::fs::write(&path, "binary").unwrap();

    let oracle = ScriptedOracle::returning(vec![Triple::new("A", "conhece", "B")]);
    let orchestrator = Orchestrator::new(Settings::default(), stage_set(oracle), None).unwrap();
    let id = orchestrator
        .start_job(vec![path.display().to_string()])
        .unwrap();
    let view = orchestrator.wait(&id, WAIT).unwrap();

    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.error.unwrap().contains("unsupported"));
    assert_eq!(view.usage.total_tokens, 0);
}
