//! Diagnostic error types for the grafo pipeline.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so operators know exactly what went wrong
//! and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the grafo engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source chains) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum GrafoError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Pipeline(#[from] PipelineError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(grafo::config::invalid),
        help("Check the settings fields. {message}")
    )]
    Invalid { message: String },

    #[error("failed to read config file: {path}")]
    #[diagnostic(
        code(grafo::config::read),
        help("Verify the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {message}")]
    #[diagnostic(
        code(grafo::config::parse),
        help("The config file must be valid TOML. Check for syntax errors near the reported location.")
    )]
    Parse { message: String },
}

// ---------------------------------------------------------------------------
// Document extraction errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ExtractError {
    #[error("unsupported document format: {extension}")]
    #[diagnostic(
        code(grafo::extract::unsupported),
        help("Supported formats are plain text (.txt) and markdown (.md). \
              Convert the document or register a custom DocumentExtractor.")
    )]
    UnsupportedFormat { extension: String },

    #[error("failed to read document: {path}")]
    #[diagnostic(
        code(grafo::extract::io),
        help("Check that the file exists and has read permissions.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("document is empty: {path}")]
    #[diagnostic(
        code(grafo::extract::empty),
        help("The document produced no extractable text. Nothing to process.")
    )]
    EmptyDocument { path: String },
}

// ---------------------------------------------------------------------------
// Oracle errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum OracleError {
    #[error("oracle request failed: {message}")]
    #[diagnostic(
        code(grafo::oracle::request_failed),
        help("Check that the oracle endpoint is reachable and the API key is valid.")
    )]
    RequestFailed { message: String },

    #[error("oracle request timed out after {timeout_secs}s")]
    #[diagnostic(
        code(grafo::oracle::timeout),
        help("Increase `timeout_secs` in the oracle configuration or use a faster model.")
    )]
    Timeout { timeout_secs: u64 },

    #[error("failed to parse oracle response: {message}")]
    #[diagnostic(
        code(grafo::oracle::parse_error),
        help("The model returned a response that could not be interpreted even \
              after best-effort JSON recovery.")
    )]
    ParseError { message: String },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(grafo::store::io),
        help("A filesystem operation failed. Check that the data directory exists, \
              has correct permissions, and that the disk is not full.")
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(grafo::store::redb),
        help("The embedded cache database encountered a transaction error. \
              This may indicate corruption; try a fresh cache directory.")
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(grafo::store::serde),
        help("Failed to serialize or deserialize a stored record. \
              The on-disk format may have changed between versions.")
    )]
    Serialization { message: String },
}

// ---------------------------------------------------------------------------
// Pipeline errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("no documents provided")]
    #[diagnostic(
        code(grafo::pipeline::no_documents),
        help("Submit at least one document path to start a pipeline job.")
    )]
    NoDocuments,

    #[error("job not found: {job_id}")]
    #[diagnostic(
        code(grafo::pipeline::job_not_found),
        help("The job id is unknown to the registry, disk records, and cache. \
              Verify the id or submit a new job.")
    )]
    JobNotFound { job_id: String },

    #[error("stage \"{stage}\" failed: {message}")]
    #[diagnostic(
        code(grafo::pipeline::stage_failed),
        help("The job was marked failed; poll its status for the error string.")
    )]
    StageFailed { stage: String, message: String },
}

/// Convenience alias for functions returning grafo results.
pub type GrafoResult<T> = std::result::Result<T, GrafoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_error_converts_to_grafo_error() {
        let err = ExtractError::UnsupportedFormat {
            extension: ".xyz".into(),
        };
        let top: GrafoError = err.into();
        assert!(matches!(
            top,
            GrafoError::Extract(ExtractError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn pipeline_error_converts_to_grafo_error() {
        let err = PipelineError::NoDocuments;
        let top: GrafoError = err.into();
        assert!(matches!(top, GrafoError::Pipeline(PipelineError::NoDocuments)));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = OracleError::Timeout { timeout_secs: 120 };
        let msg = format!("{err}");
        assert!(msg.contains("120"));

        let err = PipelineError::JobNotFound {
            job_id: "abc123".into(),
        };
        assert!(format!("{err}").contains("abc123"));
    }
}
