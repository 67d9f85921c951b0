//! Results store: where run bundles are persisted and read back.
//!
//! A store is a plain directory of write-once JSON files, one per batch.
//! Several processes may write into the same directory over time; every
//! write gets a unique name and is renamed into place only once complete, so
//! readers never observe a half-written `.json` file.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::schema::validate_bundle_schema;
use crate::types::RunBundle;

/// Default results directory, relative to the working directory.
pub const DEFAULT_RESULTS_DIR: &str = "results";

/// Extension of persisted bundle files.
const BUNDLE_EXTENSION: &str = "json";

lazy_static! {
    /// Characters allowed in the task/version part of a file name.
    static ref UNSAFE_FILENAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9._-]+").unwrap();
}

/// Errors from the results store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No result files found in {}", dir.display())]
    NoResults { dir: PathBuf },

    #[error("Results store I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to (de)serialize run bundle: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{} does not match the run bundle schema: {}", path.display(), errors.join("; "))]
    Schema { path: PathBuf, errors: Vec<String> },

    #[error("Refusing to save a run bundle that does not match the schema: {}", errors.join("; "))]
    InvalidBundle { errors: Vec<String> },
}

/// A directory of persisted run bundles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsStore {
    dir: PathBuf,
}

impl Default for ResultsStore {
    fn default() -> Self {
        Self::new(DEFAULT_RESULTS_DIR)
    }
}

impl ResultsStore {
    /// Create a store rooted at `dir`. Nothing is touched on disk until the
    /// first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory this store reads and writes.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a bundle and return the path written.
    ///
    /// Creates the directory if needed. The file name encodes task, version,
    /// run count and a microsecond UTC timestamp; a numeric suffix is added
    /// if that name is already taken. A bundle that would not load back
    /// (for example a non-finite temperature, which JSON writes as `null`)
    /// is rejected before anything touches the directory.
    pub fn save(&self, bundle: &RunBundle) -> Result<PathBuf, StoreError> {
        let value = serde_json::to_value(bundle)?;
        validate_bundle_schema(&value).map_err(|errors| StoreError::InvalidBundle { errors })?;

        fs::create_dir_all(&self.dir)?;

        let body = serde_json::to_string_pretty(&value)?;
        let path = self.unique_path(&bundle_file_stem(bundle, Utc::now()));
        let staging = staging_path(&path);

        if let Err(e) = fs::write(&staging, body.as_bytes()) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&staging, &path) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }

        tracing::info!(
            path = %path.display(),
            task = %bundle.task,
            version = %bundle.version,
            runs = bundle.runs,
            "Run bundle saved"
        );
        Ok(path)
    }

    /// Path of the most recently modified bundle file.
    ///
    /// Files sharing a modification time are ordered by file name, and the
    /// greatest name wins. A missing or empty directory is
    /// [`StoreError::NoResults`].
    pub fn latest(&self) -> Result<PathBuf, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NoResults {
                    dir: self.dir.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut newest: Option<(SystemTime, OsString, PathBuf)> = None;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !is_bundle_file(&path) {
                continue;
            }

            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }

            let candidate = (metadata.modified()?, entry.file_name(), path);
            let is_newer = match &newest {
                Some((modified, name, _)) => (&candidate.0, &candidate.1) > (modified, name),
                None => true,
            };
            if is_newer {
                newest = Some(candidate);
            }
        }

        newest
            .map(|(_, _, path)| path)
            .ok_or_else(|| StoreError::NoResults {
                dir: self.dir.clone(),
            })
    }

    /// Load and schema-check a bundle file.
    ///
    /// A bundle whose records break the `1..=runs` ordering is still
    /// returned (reports are computed from `records` alone), but the
    /// violation is logged.
    pub fn load(path: impl AsRef<Path>) -> Result<RunBundle, StoreError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&contents)?;

        validate_bundle_schema(&value).map_err(|errors| StoreError::Schema {
            path: path.to_path_buf(),
            errors,
        })?;

        let bundle: RunBundle = serde_json::from_value(value)?;
        if let Err(violation) = bundle.check_invariants() {
            tracing::warn!(path = %path.display(), error = %violation, "Loaded bundle breaks run ordering");
        }

        tracing::debug!(path = %path.display(), records = bundle.records.len(), "Run bundle loaded");
        Ok(bundle)
    }

    /// Select the latest bundle file and load it.
    pub fn load_latest(&self) -> Result<(PathBuf, RunBundle), StoreError> {
        let path = self.latest()?;
        let bundle = Self::load(&path)?;
        Ok((path, bundle))
    }

    fn unique_path(&self, stem: &str) -> PathBuf {
        let mut path = self.dir.join(format!("{}.{}", stem, BUNDLE_EXTENSION));
        let mut suffix = 1u32;
        while path.exists() {
            path = self
                .dir
                .join(format!("{}-{}.{}", stem, suffix, BUNDLE_EXTENSION));
            suffix += 1;
        }
        path
    }
}

/// `{task}_{version}_{runs}runs_{YYYYmmdd_HHMMSS_ffffff}`
fn bundle_file_stem(bundle: &RunBundle, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}runs_{}",
        sanitize(&bundle.task),
        sanitize(&bundle.version),
        bundle.runs,
        now.format("%Y%m%d_%H%M%S_%6f")
    )
}

fn sanitize(part: &str) -> String {
    UNSAFE_FILENAME_CHARS.replace_all(part.trim(), "-").into_owned()
}

/// Hidden sibling used while the bundle is being written.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

fn is_bundle_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));

    !hidden
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == BUNDLE_EXTENSION)
}
