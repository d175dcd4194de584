//! XDG-compliant path resolution for grafo data directories.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(grafo::paths::no_home),
        help("Set the HOME environment variable or pass --data-dir explicitly.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(grafo::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Directory layout for grafo's persistent state.
#[derive(Debug, Clone)]
pub struct GrafoPaths {
    /// Root data directory.
    pub data_dir: PathBuf,
}

impl GrafoPaths {
    /// Resolve the data directory: `GRAFO_DATA_DIR`, then
    /// `$XDG_DATA_HOME/grafo`, then `~/.local/share/grafo`.
    pub fn resolve() -> PathResult<Self> {
        if let Ok(dir) = std::env::var("GRAFO_DATA_DIR") {
            return Ok(Self {
                data_dir: PathBuf::from(dir),
            });
        }

        let data_dir = match std::env::var("XDG_DATA_HOME") {
            Ok(d) => PathBuf::from(d),
            Err(_) => std::env::var("HOME")
                .map(PathBuf::from)
                .map_err(|_| PathError::NoHome)?
                .join(".local/share"),
        }
        .join("grafo");

        Ok(Self { data_dir })
    }

    /// Build paths rooted at an explicit directory (tests, --data-dir).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: root.into(),
        }
    }

    /// Directory for on-disk job records.
    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    /// Directory for the cache collaborator's durable backend.
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    /// Create all directories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [&self.data_dir, &self.jobs_dir(), &self.cache_dir()] {
            std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }
}

impl AsRef<Path> for GrafoPaths {
    fn as_ref(&self) -> &Path {
        &self.data_dir
    }
}
