use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::DateTime;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::Record;

static ARTIFACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_id_([^./\\]+)\.json$").unwrap());

/// Completion index over harvested artifacts.
///
/// An item is complete exactly when its artifact exists; there is no other
/// status store.
pub trait CheckpointStore: Send + Sync {
    /// Identity tokens of every completed artifact.
    fn completed_ids(&self) -> io::Result<HashSet<String>>;

    /// Persist one finished record; returns the artifact path.
    fn write_artifact(&self, record: &Record) -> io::Result<PathBuf>;
}

/// One folder of `{timestamp}_id_{id}.json` files.
#[derive(Debug, Clone)]
pub struct DirCheckpoint {
    dir: PathBuf,
}

impl DirCheckpoint {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CheckpointStore for DirCheckpoint {
    fn completed_ids(&self) -> io::Result<HashSet<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(e),
        };
        let mut ids = HashSet::new();
        for entry in entries {
            let name = entry?.file_name();
            if let Some(id) = name.to_str().and_then(artifact_id) {
                ids.insert(id.to_string());
            }
        }
        Ok(ids)
    }

    fn write_artifact(&self, record: &Record) -> io::Result<PathBuf> {
        let name = artifact_name(&record.posted_at, record.trailing_id());
        write_json_atomic(&self.dir.join(name), record)
    }
}

/// Identity token of an artifact file name, if it is one.
pub fn artifact_id(file_name: &str) -> Option<&str> {
    ARTIFACT_RE
        .captures(file_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn artifact_name(posted_at: &str, id: &str) -> String {
    format!("{}_id_{}.json", filename_timestamp(posted_at), id)
}

/// `2024-05-01T12:34:56.789Z` -> `2024-05-01_12-34-56`.
pub fn filename_timestamp(posted_at: &str) -> String {
    if let Ok(ts) = DateTime::parse_from_rfc3339(posted_at) {
        return ts.format("%Y-%m-%d_%H-%M-%S").to_string();
    }
    if posted_at.trim().is_empty() {
        return chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    }
    let no_fraction = posted_at.split('.').next().unwrap_or_default();
    no_fraction
        .replace('T', "_")
        .replace(':', "-")
        .replace(['/', '\\'], "-")
}

/// Write pretty JSON to a hidden temp file next to `path`, then rename it
/// into place. Readers never observe a half-written artifact.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<PathBuf> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "artifact path has no name"))?;
    let tmp = dir.join(format!(".{file_name}.tmp"));

    let body = serde_json::to_vec_pretty(value)?;
    let result = (|| {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(&body)?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result.map(|_| path.to_path_buf())
}

/// Load a JSON manifest; `Ok(None)` when it does not exist yet.
pub fn load_manifest<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
