//! Application source fetching
//!
//! Sources are cloned into a staging directory next to their final location
//! and swapped in only once the clone succeeded, so a failed fetch never
//! disturbs the checkout a running service was built from.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

use tn_core::fsutil::random_suffix;
use tn_core::AppSource;

/// Errors from fetching a source
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Fetches a repository branch into a fresh directory
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Populate `dest`, which must not exist yet
    async fn fetch(&self, source: &AppSource, dest: &Path) -> Result<(), FetchError>;
}

/// Fetcher backed by the `git` CLI
#[derive(Debug, Clone)]
pub struct GitFetcher {
    git_binary: String,
}

impl GitFetcher {
    pub fn new(git_binary: impl Into<String>) -> Self {
        Self {
            git_binary: git_binary.into(),
        }
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(&self, source: &AppSource, dest: &Path) -> Result<(), FetchError> {
        tracing::info!("Cloning {} (branch {})", source.repo_url, source.branch);
        let output = Command::new(&self.git_binary)
            .args(["clone", "--depth", "1", "--branch"])
            .arg(&source.branch)
            .args(["--recurse-submodules", "--shallow-submodules", "--"])
            .arg(&source.repo_url)
            .arg(dest)
            // Never block on a credential prompt
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FetchError::Spawn {
                program: self.git_binary.clone(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("git clone failed");
            return Err(FetchError::Failed(last.trim().to_string()));
        }
        Ok(())
    }
}

const STAGING_PREFIX: &str = ".fetch-";
const RETIRED_PREFIX: &str = ".old-";

/// Staging directory for a fetch into `dest`
pub fn staging_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string());
    dest.with_file_name(format!("{}{}-{}", STAGING_PREFIX, name, random_suffix()))
}

/// Move a completed checkout from `staging` to `dest`, replacing any
/// previous checkout
pub fn install_checkout(staging: &Path, dest: &Path) -> io::Result<()> {
    if dest.exists() {
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());
        let old = dest.with_file_name(format!("{}{}-{}", RETIRED_PREFIX, name, random_suffix()));
        std::fs::rename(dest, &old)?;
        if let Err(e) = std::fs::rename(staging, dest) {
            // Put the previous checkout back
            let _ = std::fs::rename(&old, dest);
            return Err(e);
        }
        if let Err(e) = std::fs::remove_dir_all(&old) {
            tracing::warn!("Failed to remove previous checkout {:?}: {}", old, e);
        }
    } else {
        std::fs::rename(staging, dest)?;
    }
    Ok(())
}

/// Remove staging and retired checkouts an interrupted deploy left in `dir`
///
/// Callers hold the tenant lock, so no fetch into `dir` is in progress.
pub fn sweep_stale_checkouts(dir: &Path) -> io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with(STAGING_PREFIX) || name.starts_with(RETIRED_PREFIX)) {
            continue;
        }
        tracing::debug!("Removing leftover checkout {:?}", entry.path());
        std::fs::remove_dir_all(entry.path())?;
        removed += 1;
    }
    Ok(removed)
}
