//! Oracle access: ontology inference and triple extraction over an
//! OpenAI-compatible chat endpoint.
//!
//! The model is treated as an untrusted JSON producer. Responses go through
//! a recovery ladder (direct parse, fenced block, bracket slice) and payloads
//! are decoded leniently: a chunk whose triples cannot be interpreted yields
//! an empty list with a warning, never a failed job.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Settings;
use crate::error::OracleError;
use crate::triple::Triple;

// ---------------------------------------------------------------------------
// Ontology
// ---------------------------------------------------------------------------

/// An entity type the oracle should tag entities with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologyType {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A relation the oracle should prefer when linking entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologyRelation {
    #[serde(alias = "label")]
    pub name: String,
    /// Entity-type names this relation connects; empty means unconstrained.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub description: String,
}

/// Document-specific vocabulary inferred from a text sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ontology {
    #[serde(default, alias = "entities")]
    pub types: Vec<OntologyType>,
    #[serde(default)]
    pub relations: Vec<OntologyRelation>,
}

impl Ontology {
    /// Clean the inferred vocabulary: blank names are dropped, type names are
    /// deduplicated (first occurrence wins), and relations referencing a type
    /// the ontology never declared are removed.
    pub fn normalize(&mut self) {
        self.types.retain(|t| !t.name.trim().is_empty());
        for t in &mut self.types {
            t.name = t.name.trim().to_uppercase();
        }
        let mut seen = std::collections::BTreeSet::new();
        self.types.retain(|t| seen.insert(t.name.clone()));

        self.relations.retain(|r| !r.name.trim().is_empty());
        for r in &mut self.relations {
            r.name = r.name.trim().to_lowercase();
            r.source = r.source.trim().to_uppercase();
            r.target = r.target.trim().to_uppercase();
        }
        let declared: std::collections::BTreeSet<&str> =
            self.types.iter().map(|t| t.name.as_str()).collect();
        self.relations.retain(|r| {
            (r.source.is_empty() || declared.contains(r.source.as_str()))
                && (r.target.is_empty() || declared.contains(r.target.as_str()))
        });
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.relations.is_empty()
    }

    /// Comma-separated type names for prompt interpolation.
    fn type_names(&self) -> String {
        self.types
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn relation_names(&self) -> String {
        self.relations
            .iter()
            .map(|r| r.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ---------------------------------------------------------------------------
// Usage accounting
// ---------------------------------------------------------------------------

/// Token counts reported by the oracle for one or more calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl OracleUsage {
    pub fn add(&mut self, other: OracleUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Ontology inference result plus the tokens it cost.
#[derive(Debug, Clone)]
pub struct OntologyOutcome {
    pub ontology: Ontology,
    pub usage: OracleUsage,
}

/// Triple extraction result plus the tokens it cost.
#[derive(Debug, Clone)]
pub struct TripleOutcome {
    pub triples: Vec<Triple>,
    pub usage: OracleUsage,
}

// ---------------------------------------------------------------------------
// Oracle traits
// ---------------------------------------------------------------------------

/// Infers a document-specific ontology from a text sample.
pub trait OntologyOracle: Send + Sync {
    fn infer_ontology(&self, sample: &str) -> Result<OntologyOutcome, OracleError>;
}

/// Extracts triples from a chunk, guided by an ontology.
pub trait TripleOracle: Send + Sync {
    fn extract_triples(&self, chunk: &str, ontology: &Ontology)
        -> Result<TripleOutcome, OracleError>;
}

// ---------------------------------------------------------------------------
// HTTP oracle
// ---------------------------------------------------------------------------

const ONTOLOGY_SYSTEM_PROMPT: &str = "\
You design compact ontologies for knowledge-graph extraction. Given a text \
sample, respond with JSON only: {\"types\": [{\"name\", \"description\"}], \
\"relations\": [{\"name\", \"source\", \"target\", \"description\"}]}, where \
source and target are declared type names. Type names are UPPERCASE \
singular nouns; relation names are lower_snake_case verbs. Return at most \
10 types and 15 relations.";

const TRIPLE_SYSTEM_PROMPT: &str = "\
You extract factual triples from text for a knowledge graph. Respond with \
JSON only: a list of objects with keys source, source_type, source_desc, \
target, target_type, target_desc, relation. Use the provided type and \
relation vocabularies where they fit; otherwise choose sensible values. \
Never invent facts absent from the text.";

/// Oracle backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpOracle {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl HttpOracle {
    pub fn new(settings: &Settings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(settings.oracle_timeout_secs))
            .build();
        Self {
            agent,
            base_url: settings.oracle_base_url.trim_end_matches('/').to_string(),
            api_key: settings.oracle_api_key.clone(),
            model: settings.oracle_model.clone(),
            timeout_secs: settings.oracle_timeout_secs,
        }
    }

    /// One chat call: returns the assistant text and reported token usage.
    fn chat(&self, system: &str, user: &str) -> Result<(String, OracleUsage), OracleError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.0,
        });

        let mut request = self.agent.post(&url);
        if !self.api_key.is_empty() {
            request = request.set("Authorization", &format!("Bearer {}", self.api_key));
        }

        let response = request.send_json(body).map_err(|e| match e {
            ureq::Error::Status(code, resp) => OracleError::RequestFailed {
                message: format!(
                    "HTTP {code}: {}",
                    resp.into_string().unwrap_or_default().trim()
                ),
            },
            ureq::Error::Transport(t) => {
                let message = t.to_string();
                if message.contains("timed out") || message.contains("timeout") {
                    OracleError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    OracleError::RequestFailed { message }
                }
            }
        })?;

        let payload: Value = response
            .into_json()
            .map_err(|e| OracleError::ParseError {
                message: format!("response body is not JSON: {e}"),
            })?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| OracleError::ParseError {
                message: "response has no choices[0].message.content".to_string(),
            })?
            .to_string();

        let usage = OracleUsage {
            prompt_tokens: payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: payload["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        };

        Ok((content, usage))
    }
}

impl OntologyOracle for HttpOracle {
    fn infer_ontology(&self, sample: &str) -> Result<OntologyOutcome, OracleError> {
        let (content, usage) = self.chat(ONTOLOGY_SYSTEM_PROMPT, sample)?;
        let value = recover_json(&content).ok_or_else(|| OracleError::ParseError {
            message: "ontology response contained no recoverable JSON".to_string(),
        })?;
        let mut ontology: Ontology =
            serde_json::from_value(value).map_err(|e| OracleError::ParseError {
                message: format!("ontology JSON has unexpected shape: {e}"),
            })?;
        ontology.normalize();
        tracing::debug!(
            types = ontology.types.len(),
            relations = ontology.relations.len(),
            "ontology inferred"
        );
        Ok(OntologyOutcome { ontology, usage })
    }
}

impl TripleOracle for HttpOracle {
    fn extract_triples(
        &self,
        chunk: &str,
        ontology: &Ontology,
    ) -> Result<TripleOutcome, OracleError> {
        let user = if ontology.is_empty() {
            chunk.to_string()
        } else {
            format!(
                "Entity types: {}\nRelations: {}\n\nText:\n{}",
                ontology.type_names(),
                ontology.relation_names(),
                chunk
            )
        };
        let (content, usage) = self.chat(TRIPLE_SYSTEM_PROMPT, &user)?;
        let triples = parse_triples(&content);
        Ok(TripleOutcome { triples, usage })
    }
}

impl std::fmt::Debug for HttpOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpOracle")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// JSON recovery
// ---------------------------------------------------------------------------

/// Best-effort JSON recovery from model output.
///
/// Ladder: direct parse, then the contents of a fenced code block, then the
/// slice from the first opening bracket to the last closing one.
pub fn recover_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    // ```json ... ``` or plain ``` ... ```
    let fence = Regex::new(r"(?s)```(?:json)?\s*(.*?)```").ok()?;
    if let Some(captures) = fence.captures(trimmed) {
        if let Ok(value) = serde_json::from_str(captures[1].trim()) {
            return Some(value);
        }
    }

    // Widest bracket slice. The pair whose opening bracket appears first
    // goes first: an array wrapping objects must recover as the array, not
    // as its first element.
    let mut pairs = [('{', '}'), ('[', ']')];
    if let (Some(obj), Some(arr)) = (trimmed.find('{'), trimmed.find('[')) {
        if arr < obj {
            pairs.reverse();
        }
    } else if trimmed.contains('[') {
        pairs.reverse();
    }
    for (open, close) in pairs {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Decode a triple list from raw model output. Tolerates a bare list, a
/// `{"triples": [...]}` or `{"result": [...]}` wrapper, or any object whose
/// first list value looks like the payload. Undecodable elements are skipped;
/// a fully unusable response yields an empty list with a warning.
pub fn parse_triples(raw: &str) -> Vec<Triple> {
    let Some(value) = recover_json(raw) else {
        tracing::warn!("triple response contained no recoverable JSON, skipping chunk");
        return Vec::new();
    };

    let items: Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(map) => {
            let nested = map
                .get("triples")
                .or_else(|| map.get("result"))
                .and_then(|v| v.as_array())
                .cloned()
                .or_else(|| {
                    map.values()
                        .find_map(|v| v.as_array().cloned())
                });
            match nested {
                Some(items) => items,
                None => {
                    tracing::warn!("triple response object holds no list, skipping chunk");
                    return Vec::new();
                }
            }
        }
        _ => {
            tracing::warn!("triple response is neither list nor object, skipping chunk");
            return Vec::new();
        }
    };

    let mut triples = Vec::new();
    for item in items {
        match serde_json::from_value::<Triple>(item) {
            Ok(mut t) => {
                t.normalize();
                if !t.source.is_empty() && !t.target.is_empty() && !t.relation.is_empty() {
                    triples.push(t);
                }
            }
            Err(e) => tracing::debug!(error = %e, "skipping undecodable triple"),
        }
    }
    triples
}
