//! Staging of query and input files.
//!
//! Tools read sequences from file paths, so submitted sequence text is
//! written to the staging directory before the task is created and removed
//! once the task has run.

use std::path::{Path, PathBuf};

use crate::commands::validate_name;
use crate::error::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error(transparent)]
    InvalidName(#[from] CoreError),

    #[error("Failed to stage {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Writes and removes staged files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStager;

impl FileStager {
    /// Write `content` to `<dir>/<name>`, creating `dir` if needed.
    pub async fn write(
        &self,
        dir: &Path,
        content: &str,
        name: &str,
    ) -> Result<PathBuf, StagingError> {
        validate_name("file name", name)?;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| StagingError::Io { path, source }
        };

        tokio::fs::create_dir_all(dir).await.map_err(io_err(dir))?;
        let path = dir.join(name);
        tokio::fs::write(&path, content)
            .await
            .map_err(io_err(&path))?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "Staged file");
        Ok(path)
    }

    /// Remove a staged file. A file that is already gone is not an error.
    pub async fn remove(&self, path: &Path) -> Result<(), StagingError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StagingError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}
