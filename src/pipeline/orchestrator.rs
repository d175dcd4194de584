//! Job orchestrator: worker pool, staged pipeline execution, and tiered
//! status lookup.
//!
//! Jobs queue through an mpsc channel consumed by a fixed pool of worker
//! threads. Live state sits in an in-memory registry; finished jobs are also
//! written to disk and to the TTL cache, best effort. Status queries fall
//! through the tiers in order: registry, disk, cache.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::Settings;
use crate::error::{GrafoResult, PipelineError};
use crate::graph::{GraphBuilder, KnowledgeGraph};
use crate::paths::GrafoPaths;
use crate::pipeline::extract::{Chunk, ChunkingEngine, DocumentExtractor, ExtractedDocument};
use crate::pipeline::job::{eta_secs, Job, JobStatus, JobView, Stage};
use crate::pipeline::oracle::{Ontology, OntologyOracle, TripleOracle};
use crate::resolve::EntityResolver;
use crate::store::cache::CacheStore;
use crate::store::JobDiskStore;
use crate::triple::Triple;

/// Internal result key holding the ETA heuristic. Underscore-prefixed keys
/// never reach the public view.
const INITIAL_ESTIMATE_KEY: &str = "_initial_estimate_secs";
/// Internal result key holding pre-resolution triples.
const RAW_TRIPLES_KEY: &str = "_raw_triples";

/// Seconds assumed per document before any pace is observed.
const ESTIMATE_SECS_PER_DOC: f64 = 30.0;
/// Refined per-chunk estimate once the chunk count is known.
const ESTIMATE_SECS_PER_CHUNK: f64 = 5.0;

/// The pluggable stage implementations a pipeline runs with.
pub struct StageSet {
    pub extractor: Arc<dyn DocumentExtractor>,
    pub chunker: ChunkingEngine,
    pub ontology_oracle: Arc<dyn OntologyOracle>,
    pub triple_oracle: Arc<dyn TripleOracle>,
    pub resolver: EntityResolver,
    pub builder: GraphBuilder,
}

struct Shared {
    settings: Settings,
    stages: StageSet,
    /// Tier 1: live jobs.
    jobs: DashMap<String, Arc<Mutex<Job>>>,
    /// In-memory graphs for completed jobs; never serialized.
    graphs: DashMap<String, Arc<KnowledgeGraph>>,
    /// Tier 2: JSON records on disk.
    disk: Option<JobDiskStore>,
    /// Tier 3: TTL cache.
    cache: CacheStore,
}

/// Owns the worker pool and the job registry.
pub struct Orchestrator {
    shared: Arc<Shared>,
    sender: Option<mpsc::Sender<String>>,
    workers: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Build an orchestrator. With `paths`, finished jobs persist to the
    /// jobs directory and the cache database; without, the disk tier is off
    /// and the cache is in-process only.
    pub fn new(
        settings: Settings,
        stages: StageSet,
        paths: Option<&GrafoPaths>,
    ) -> GrafoResult<Self> {
        let (disk, cache) = match paths {
            Some(p) => (
                Some(JobDiskStore::open(&p.jobs_dir())?),
                CacheStore::open(&p.cache_dir(), settings.cache_ttl_secs),
            ),
            None => (None, CacheStore::in_memory(settings.cache_ttl_secs)),
        };

        let shared = Arc::new(Shared {
            settings,
            stages,
            jobs: DashMap::new(),
            graphs: DashMap::new(),
            disk,
            cache,
        });

        let (sender, receiver) = mpsc::channel::<String>();
        let receiver = Arc::new(Mutex::new(receiver));

        let worker_count = shared.settings.max_workers;
        let mut workers = Vec::with_capacity(worker_count);
        for n in 0..worker_count {
            let shared = Arc::clone(&shared);
            let receiver = Arc::clone(&receiver);
            let handle = std::thread::Builder::new()
                .name(format!("grafo-worker-{n}"))
                .spawn(move || worker_loop(shared, receiver))
                .map_err(|e| PipelineError::StageFailed {
                    stage: "startup".into(),
                    message: format!("failed to spawn worker thread: {e}"),
                })?;
            workers.push(handle);
        }

        tracing::info!(workers = worker_count, "orchestrator started");
        Ok(Self {
            shared,
            sender: Some(sender),
            workers,
        })
    }

    /// Validate and enqueue a job. Returns its id immediately; processing
    /// happens on a worker thread.
    pub fn start_job(&self, documents: Vec<String>) -> GrafoResult<String> {
        if documents.is_empty() {
            return Err(PipelineError::NoDocuments.into());
        }

        let mut job = Job::new(documents);
        job.results.insert(
            INITIAL_ESTIMATE_KEY.into(),
            serde_json::json!(ESTIMATE_SECS_PER_DOC * job.documents.len() as f64),
        );
        let id = job.id.clone();
        tracing::info!(job_id = %id, documents = job.documents.len(), "job queued");

        self.shared
            .jobs
            .insert(id.clone(), Arc::new(Mutex::new(job)));

        let send_failed = match &self.sender {
            Some(sender) => sender.send(id.clone()).is_err(),
            None => true,
        };
        if send_failed {
            // Worker pool is gone; fail the job in place rather than leaving
            // it queued forever.
            if let Some(entry) = self.shared.jobs.get(&id) {
                lock_job(&entry).fail("worker pool unavailable");
            }
            return Err(PipelineError::StageFailed {
                stage: "queue".into(),
                message: "worker pool unavailable".into(),
            }
            .into());
        }
        Ok(id)
    }

    /// Look a job up across the tiers: registry, then disk, then cache.
    /// Processing jobs get a fresh ETA; `None` means the id is unknown
    /// everywhere.
    pub fn get_status(&self, job_id: &str) -> Option<JobView> {
        if let Some(entry) = self.shared.jobs.get(job_id) {
            let mut job = lock_job(&entry);
            if job.status == JobStatus::Processing {
                let initial = job
                    .results
                    .get(INITIAL_ESTIMATE_KEY)
                    .and_then(|v| v.as_f64())
                    .unwrap_or(ESTIMATE_SECS_PER_DOC);
                job.estimated_remaining_secs =
                    Some(eta_secs(initial, job.elapsed_secs() as f64, job.progress));
            }
            return Some(job.view());
        }

        if let Some(disk) = &self.shared.disk {
            match disk.load::<Job>(job_id) {
                Ok(Some(job)) => return Some(job.view()),
                Ok(None) => {}
                Err(e) => tracing::warn!(job_id, error = %e, "disk lookup failed"),
            }
        }

        self.shared
            .cache
            .get_json::<Job>(&cache_key(job_id))
            .map(|job| job.view())
    }

    /// The in-memory graph for a completed job, if still resident.
    pub fn graph(&self, job_id: &str) -> Option<Arc<KnowledgeGraph>> {
        self.shared.graphs.get(job_id).map(|g| Arc::clone(&g))
    }

    /// Drop a job from the in-memory tiers. Disk and cache records survive,
    /// so `get_status` still answers for evicted jobs.
    pub fn evict(&self, job_id: &str) {
        self.shared.jobs.remove(job_id);
        self.shared.graphs.remove(job_id);
    }

    /// Poll until the job reaches a terminal status or the timeout passes.
    pub fn wait(&self, job_id: &str, timeout: Duration) -> Option<JobView> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let view = self.get_status(job_id)?;
            if matches!(view.status, JobStatus::Completed | JobStatus::Failed) {
                return Some(view);
            }
            if std::time::Instant::now() >= deadline {
                return Some(view);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        // Closing the channel lets each worker drain and exit.
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("worker thread panicked during shutdown");
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workers", &self.workers.len())
            .field("jobs", &self.shared.jobs.len())
            .finish()
    }
}

fn cache_key(job_id: &str) -> String {
    format!("grafo:job:{job_id}")
}

/// Lock a job, recovering the guard if a worker panicked mid-update.
fn lock_job(job: &Arc<Mutex<Job>>) -> std::sync::MutexGuard<'_, Job> {
    match job.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// Worker side
// ---------------------------------------------------------------------------

fn worker_loop(shared: Arc<Shared>, receiver: Arc<Mutex<mpsc::Receiver<String>>>) {
    loop {
        let job_id = {
            let Ok(guard) = receiver.lock() else { break };
            match guard.recv() {
                Ok(id) => id,
                Err(_) => break,
            }
        };
        run_job(&shared, &job_id);
    }
    tracing::debug!("worker exiting");
}

/// Run one job end to end. Any stage error marks the job failed; the error
/// string lands on the job record, never as a panic.
fn run_job(shared: &Shared, job_id: &str) {
    let Some(entry) = shared.jobs.get(job_id).map(|e| Arc::clone(&e)) else {
        tracing::warn!(job_id, "queued job vanished from registry");
        return;
    };

    lock_job(&entry).mark_processing();

    match run_pipeline(shared, job_id, &entry) {
        Ok(()) => {
            lock_job(&entry).complete();
            tracing::info!(job_id, "job completed");
        }
        Err(e) => {
            lock_job(&entry).fail(e.to_string());
            tracing::error!(job_id, error = %e, "job failed");
        }
    }

    persist(shared, &lock_job(&entry));
}

fn run_pipeline(shared: &Shared, job_id: &str, entry: &Arc<Mutex<Job>>) -> GrafoResult<()> {
    let documents: Vec<String> = lock_job(entry).documents.clone();
    let stages = &shared.stages;

    // Extraction.
    lock_job(entry).enter_stage(Stage::Extraction);
    let mut extracted: Vec<ExtractedDocument> = Vec::with_capacity(documents.len());
    for (i, path) in documents.iter().enumerate() {
        let doc = stages.extractor.extract(std::path::Path::new(path))?;
        extracted.push(doc);
        lock_job(entry).set_progress(
            Stage::Extraction.progress_at((i + 1) as f64 / documents.len() as f64),
        );
    }

    // Chunking.
    lock_job(entry).enter_stage(Stage::Chunking);
    let mut chunks: Vec<Chunk> = Vec::new();
    for doc in &extracted {
        chunks.extend(stages.chunker.chunk(doc));
    }
    if chunks.is_empty() {
        return Err(PipelineError::StageFailed {
            stage: Stage::Chunking.name().into(),
            message: "documents produced no text chunks".into(),
        }
        .into());
    }
    {
        let mut job = lock_job(entry);
        // Refine the ETA heuristic now that the workload size is known.
        job.results.insert(
            INITIAL_ESTIMATE_KEY.into(),
            serde_json::json!(10.0 + ESTIMATE_SECS_PER_CHUNK * chunks.len() as f64),
        );
        job.set_progress(Stage::Chunking.window().1);
    }

    let price = shared.settings.price_for(&shared.settings.oracle_model);

    // Ontology inference over a leading sample. A malformed oracle response
    // degrades to an empty ontology; transport failures fail the job.
    lock_job(entry).enter_stage(Stage::Ontology);
    let sample: String = chunks
        .iter()
        .take(2)
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let ontology = match stages.ontology_oracle.infer_ontology(&sample) {
        Ok(outcome) => {
            lock_job(entry).usage.record(
                outcome.usage.prompt_tokens,
                outcome.usage.completion_tokens,
                price,
            );
            outcome.ontology
        }
        Err(crate::error::OracleError::ParseError { message }) => {
            tracing::warn!(job_id, %message, "ontology unusable, extracting without one");
            Ontology::default()
        }
        Err(e) => return Err(e.into()),
    };
    lock_job(entry).set_progress(Stage::Ontology.window().1);

    // Triple extraction, chunk by chunk.
    lock_job(entry).enter_stage(Stage::TripleExtraction);
    let mut raw_triples: Vec<Triple> = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let outcome = stages.triple_oracle.extract_triples(&chunk.text, &ontology)?;
        let mut job = lock_job(entry);
        job.usage.record(
            outcome.usage.prompt_tokens,
            outcome.usage.completion_tokens,
            price,
        );
        job.set_progress(
            Stage::TripleExtraction.progress_at((i + 1) as f64 / chunks.len() as f64),
        );
        drop(job);
        raw_triples.extend(outcome.triples);
    }
    tracing::info!(job_id, triples = raw_triples.len(), "extraction finished");

    // Entity resolution.
    lock_job(entry).enter_stage(Stage::Normalization);
    let resolved = stages.resolver.resolve(&raw_triples);
    lock_job(entry).set_progress(Stage::Normalization.window().1);

    // Graph build and result assembly.
    lock_job(entry).enter_stage(Stage::GraphBuild);
    let result = stages.builder.build(&resolved);

    let stats = serde_json::to_value(&result.stats).map_err(|e| PipelineError::StageFailed {
        stage: Stage::GraphBuild.name().into(),
        message: format!("stats not serializable: {e}"),
    })?;
    let visual = serde_json::to_value(&result.visual).map_err(|e| PipelineError::StageFailed {
        stage: Stage::GraphBuild.name().into(),
        message: format!("graph projection not serializable: {e}"),
    })?;
    let raw = serde_json::to_value(&raw_triples).map_err(|e| PipelineError::StageFailed {
        stage: Stage::GraphBuild.name().into(),
        message: format!("triples not serializable: {e}"),
    })?;

    shared
        .graphs
        .insert(job_id.to_string(), Arc::new(result.graph));

    let mut job = lock_job(entry);
    job.results.insert("stats".into(), stats);
    job.results.insert("graph".into(), visual);
    job.results.insert(
        "triples_extracted".into(),
        serde_json::json!(raw_triples.len()),
    );
    job.results
        .insert("triples_resolved".into(), serde_json::json!(resolved.len()));
    job.results.insert(RAW_TRIPLES_KEY.into(), raw);

    Ok(())
}

/// Write a finished job to the durable tiers. Both writes are best effort:
/// a tier failure is logged and the job record stays authoritative in memory.
fn persist(shared: &Shared, job: &Job) {
    if let Some(disk) = &shared.disk {
        let stem = job
            .documents
            .first()
            .and_then(|p| {
                std::path::Path::new(p)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "job".to_string());
        if let Err(e) = disk.save(&stem, &job.id, job) {
            tracing::warn!(job_id = %job.id, error = %e, "disk persist failed");
        }
    }
    shared.cache.set_json(&cache_key(&job.id), job);
}
