//! Job lifecycle: status machine, staged progress, usage accounting, and the
//! public status view.
//!
//! A job moves `queued -> processing -> {completed | failed}` and its progress
//! is monotonic: writes that would lower it are ignored. Each pipeline stage
//! owns a fixed progress window so observers see steady movement regardless
//! of how long individual stages run.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::ModelPrice;

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Pipeline stages in execution order, each owning a progress window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extraction,
    Chunking,
    Ontology,
    TripleExtraction,
    Normalization,
    GraphBuild,
}

impl Stage {
    /// The `[start, end)` slice of overall progress this stage owns.
    pub fn window(self) -> (f64, f64) {
        match self {
            Stage::Extraction => (0.0, 0.15),
            Stage::Chunking => (0.15, 0.25),
            Stage::Ontology => (0.25, 0.40),
            Stage::TripleExtraction => (0.40, 0.85),
            Stage::Normalization => (0.85, 0.95),
            Stage::GraphBuild => (0.95, 1.0),
        }
    }

    /// Overall progress at `fraction` (0..=1) of the way through this stage.
    pub fn progress_at(self, fraction: f64) -> f64 {
        let (start, end) = self.window();
        start + fraction.clamp(0.0, 1.0) * (end - start)
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::Chunking => "chunking",
            Stage::Ontology => "ontology",
            Stage::TripleExtraction => "triple_extraction",
            Stage::Normalization => "normalization",
            Stage::GraphBuild => "graph_build",
        }
    }
}

/// Accumulated oracle usage and its cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// USD, rounded to 6 decimal places.
    pub cost_usd: f64,
}

impl Usage {
    /// Add token counts and recompute totals and cost against a price in
    /// USD per 1M tokens.
    pub fn record(&mut self, prompt_tokens: u64, completion_tokens: u64, price: ModelPrice) {
        self.prompt_tokens += prompt_tokens;
        self.completion_tokens += completion_tokens;
        self.total_tokens = self.prompt_tokens + self.completion_tokens;
        let (input_price, output_price) = price;
        let cost = self.prompt_tokens as f64 / 1_000_000.0 * input_price
            + self.completion_tokens as f64 / 1_000_000.0 * output_price;
        self.cost_usd = (cost * 1_000_000.0).round() / 1_000_000.0;
    }
}

/// One pipeline job and everything known about it.
///
/// The `results` map may hold internal entries whose keys start with `_`;
/// those never appear in the public view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub documents: Vec<String>,
    pub status: JobStatus,
    /// Monotonic, 0.0 to 1.0.
    pub progress: f64,
    /// Name of the stage currently running, if any.
    pub stage: Option<String>,
    /// Failure message; set exactly when status is `Failed`.
    pub error: Option<String>,
    /// Unix seconds.
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    pub usage: Usage,
    pub results: BTreeMap<String, Value>,
    /// Ephemeral ETA; recomputed on read, never persisted.
    #[serde(skip)]
    pub estimated_remaining_secs: Option<u64>,
}

impl Job {
    pub fn new(documents: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            documents,
            status: JobStatus::Queued,
            progress: 0.0,
            stage: None,
            error: None,
            created_at: now_secs(),
            started_at: None,
            finished_at: None,
            usage: Usage::default(),
            results: BTreeMap::new(),
            estimated_remaining_secs: None,
        }
    }

    /// Raise progress; writes below the current value are ignored.
    pub fn set_progress(&mut self, progress: f64) {
        let clamped = progress.clamp(0.0, 1.0);
        if clamped > self.progress {
            self.progress = clamped;
        }
    }

    pub fn enter_stage(&mut self, stage: Stage) {
        self.stage = Some(stage.name().to_string());
        self.set_progress(stage.window().0);
        tracing::info!(job_id = %self.id, stage = stage.name(), "stage started");
    }

    pub fn mark_processing(&mut self) {
        self.status = JobStatus::Processing;
        self.started_at = Some(now_secs());
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.set_progress(1.0);
        self.stage = None;
        self.finished_at = Some(now_secs());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(message.into());
        self.stage = None;
        self.finished_at = Some(now_secs());
    }

    /// Seconds elapsed since processing started; 0 before that.
    pub fn elapsed_secs(&self) -> u64 {
        match self.started_at {
            Some(start) => now_secs().saturating_sub(start),
            None => 0,
        }
    }

    /// Public projection: internal `_`-prefixed result keys are dropped.
    pub fn view(&self) -> JobView {
        JobView {
            id: self.id.clone(),
            documents: self.documents.clone(),
            status: self.status,
            progress: self.progress,
            stage: self.stage.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            estimated_remaining_secs: self.estimated_remaining_secs,
            usage: self.usage,
            results: self
                .results
                .iter()
                .filter(|(key, _)| !key.starts_with('_'))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }
}

/// What status queries return: the job minus internal result entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: String,
    pub documents: Vec<String>,
    pub status: JobStatus,
    pub progress: f64,
    pub stage: Option<String>,
    pub error: Option<String>,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_secs: Option<u64>,
    pub usage: Usage,
    pub results: BTreeMap<String, Value>,
}

/// Blend the initial time estimate with the pace observed so far.
///
/// Early on the initial heuristic dominates; as progress accumulates the
/// projection from observed elapsed time takes over.
pub fn eta_secs(initial_estimate_secs: f64, elapsed_secs: f64, progress: f64) -> u64 {
    if progress <= 0.0 {
        return initial_estimate_secs.max(0.0).round() as u64;
    }
    if progress >= 1.0 {
        return 0;
    }
    let observed_remaining = elapsed_secs * (1.0 - progress) / progress;
    let heuristic_remaining = initial_estimate_secs * (1.0 - progress);
    let blended = heuristic_remaining * (1.0 - progress) + observed_remaining * progress;
    blended.max(0.0).round() as u64
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_windows_tile_the_unit_interval() {
        let stages = [
            Stage::Extraction,
            Stage::Chunking,
            Stage::Ontology,
            Stage::TripleExtraction,
            Stage::Normalization,
            Stage::GraphBuild,
        ];
        assert_eq!(stages[0].window().0, 0.0);
        assert_eq!(stages.last().unwrap().window().1, 1.0);
        for pair in stages.windows(2) {
            assert_eq!(pair[0].window().1, pair[1].window().0);
        }
    }

    #[test]
    fn progress_never_decreases() {
        let mut job = Job::new(vec!["a.txt".into()]);
        job.set_progress(0.4);
        job.set_progress(0.2);
        assert_eq!(job.progress, 0.4);
        job.set_progress(2.0);
        assert_eq!(job.progress, 1.0);
    }

    #[test]
    fn lifecycle_transitions_set_timestamps() {
        let mut job = Job::new(vec!["a.txt".into()]);
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.started_at.is_none());

        job.mark_processing();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());

        job.complete();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 1.0);
        assert!(job.finished_at.is_some());
        assert!(job.error.is_none());
    }

    #[test]
    fn failure_records_message_and_clears_stage() {
        let mut job = Job::new(vec!["a.txt".into()]);
        job.mark_processing();
        job.enter_stage(Stage::Ontology);
        job.fail("oracle unreachable");

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("oracle unreachable"));
        assert!(job.stage.is_none());
    }

    #[test]
    fn usage_cost_rounds_to_six_places() {
        let mut usage = Usage::default();
        // gpt-4o-mini pricing: 0.15 / 0.60 USD per 1M tokens.
        usage.record(1_000, 500, (0.15, 0.60));
        assert_eq!(usage.total_tokens, 1_500);
        assert!((usage.cost_usd - 0.00045).abs() < 1e-12);

        usage.record(333, 111, (0.15, 0.60));
        let raw: f64 = 1_333.0 / 1_000_000.0 * 0.15 + 611.0 / 1_000_000.0 * 0.60;
        assert_eq!(usage.cost_usd, (raw * 1e6).round() / 1e6);
    }

    #[test]
    fn unknown_model_costs_nothing() {
        let mut usage = Usage::default();
        usage.record(10_000, 10_000, (0.0, 0.0));
        assert_eq!(usage.cost_usd, 0.0);
    }

    #[test]
    fn view_hides_internal_result_keys() {
        let mut job = Job::new(vec!["a.txt".into()]);
        job.results
            .insert("stats".into(), serde_json::json!({"nodes": 3}));
        job.results
            .insert("_raw_triples".into(), serde_json::json!([]));

        let view = job.view();
        assert!(view.results.contains_key("stats"));
        assert!(!view.results.contains_key("_raw_triples"));

        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("_raw_triples"));
    }

    #[test]
    fn eta_starts_at_heuristic_and_ends_at_zero() {
        assert_eq!(eta_secs(120.0, 0.0, 0.0), 120);
        assert_eq!(eta_secs(120.0, 300.0, 1.0), 0);
    }

    #[test]
    fn eta_leans_on_observation_as_progress_grows() {
        // Slow job: at 90% after 900s the observed pace projects 100s left,
        // far above the decayed heuristic.
        let late = eta_secs(120.0, 900.0, 0.9);
        assert!(late >= 90, "late ETA should track observed pace, got {late}");

        // Early on, the heuristic dominates even with odd elapsed readings.
        let early = eta_secs(120.0, 1.0, 0.05);
        assert!(early >= 100, "early ETA should track heuristic, got {early}");
    }

    #[test]
    fn job_ids_are_hex_and_unique() {
        let a = Job::new(vec![]);
        let b = Job::new(vec![]);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 32);
        assert!(a.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn serialization_skips_ephemeral_eta() {
        let mut job = Job::new(vec!["a.txt".into()]);
        job.estimated_remaining_secs = Some(42);
        let json = serde_json::to_string(&job).unwrap();
        assert!(!json.contains("estimated_remaining_secs"));

        let back: Job = serde_json::from_str(&json).unwrap();
        assert!(back.estimated_remaining_secs.is_none());
    }
}
