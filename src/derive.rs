use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::checkpoint::artifact_id;
use crate::models::Record;
use crate::tasks::DeepDiveTask;

/// One deep-dive per first-pass artifact that has quote reposts, aimed at
/// the most-reposted quote. Output order follows artifact file names.
pub fn derive_deep_dives(stage_dir: &Path) -> Result<Vec<DeepDiveTask>> {
    info!(stage = %stage_dir.display(), "analysing first-pass artifacts");

    let mut files: Vec<PathBuf> = fs::read_dir(stage_dir)
        .with_context(|| format!("Failed to list {}", stage_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .and_then(artifact_id)
                .is_some()
        })
        .collect();
    files.sort();

    let tasks: Vec<DeepDiveTask> = files
        .par_iter()
        .filter_map(|path| match read_artifact(path) {
            Ok(record) => task_for(path, &record),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unreadable artifact");
                None
            }
        })
        .collect();

    info!(stage = %stage_dir.display(), tasks = tasks.len(), "deep-dive tasks derived");
    Ok(tasks)
}

fn read_artifact(path: &Path) -> Result<Record> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn task_for(path: &Path, record: &Record) -> Option<DeepDiveTask> {
    let top = most_reposted(&record.quote_reposts)?;
    if top.post_url.is_empty() {
        return None;
    }
    Some(DeepDiveTask {
        source_label: path.file_stem()?.to_string_lossy().into_owned(),
        url_to_scrape: top.post_url.clone(),
    })
}

/// Highest `repost_count`; the earliest one wins a tie.
pub fn most_reposted(records: &[Record]) -> Option<&Record> {
    records.iter().fold(None, |best: Option<&Record>, r| match best {
        Some(b) if b.repost_count >= r.repost_count => Some(b),
        _ => Some(r),
    })
}
