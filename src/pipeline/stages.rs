use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{info, warn};

use super::{pending_targets, run_pool};
use crate::checkpoint::{load_manifest, write_json_atomic};
use crate::config::HarvestConfig;
use crate::derive::derive_deep_dives;
use crate::harvest::DeepDiveOptions;
use crate::session::SessionFactory;
use crate::tasks::{DeepDiveTask, PostTarget};

static STAGE_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Stage folders under `root`, ordered by the first number in their name.
/// Unnumbered folders go last, by name.
pub fn discover_stages(root: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut stages: Vec<(u64, String, PathBuf)> = fs::read_dir(root)
        .with_context(|| format!("Failed to list {}", root.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            if !name.starts_with(prefix) {
                return None;
            }
            let number = STAGE_NUMBER
                .find(&name)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(u64::MAX);
            Some((number, name, e.path()))
        })
        .collect();
    stages.sort();
    Ok(stages.into_iter().map(|(_, _, path)| path).collect())
}

fn output_dir(stage: &Path, cfg: &HarvestConfig) -> PathBuf {
    stage.join(&cfg.stages.output_subdir)
}

pub(crate) fn manifest_path(stage: &Path, cfg: &HarvestConfig) -> PathBuf {
    output_dir(stage, cfg).join(&cfg.stages.manifest)
}

/// The stage's persisted deep-dive manifest, or a freshly derived one.
fn resolve_stage_tasks(stage: &Path, cfg: &HarvestConfig) -> Result<Vec<DeepDiveTask>> {
    let manifest = manifest_path(stage, cfg);
    if let Some(tasks) = load_manifest::<Vec<DeepDiveTask>>(&manifest)
        .with_context(|| format!("Failed to read {}", manifest.display()))?
    {
        info!(tasks = tasks.len(), manifest = %manifest.display(), "using saved manifest");
        return Ok(tasks);
    }
    derive_and_persist(stage, cfg)
}

fn derive_and_persist(stage: &Path, cfg: &HarvestConfig) -> Result<Vec<DeepDiveTask>> {
    let tasks = derive_deep_dives(stage)?;
    if !tasks.is_empty() {
        let manifest = manifest_path(stage, cfg);
        write_json_atomic(&manifest, &tasks)
            .with_context(|| format!("Failed to write {}", manifest.display()))?;
        info!(tasks = tasks.len(), manifest = %manifest.display(), "manifest saved");
    }
    Ok(tasks)
}

/// Recompute and persist one stage's manifest without harvesting.
pub fn derive_stage(stage: &Path, cfg: &HarvestConfig) -> Result<Vec<DeepDiveTask>> {
    if !stage.is_dir() {
        anyhow::bail!("{} is not a directory", stage.display());
    }
    derive_and_persist(stage, cfg)
}

/// Each task lands in its own `{output_subdir}/{sourceLabel}` folder.
pub(crate) fn stage_targets(
    stage: &Path,
    tasks: Vec<DeepDiveTask>,
    cfg: &HarvestConfig,
) -> Vec<PostTarget> {
    let out = output_dir(stage, cfg);
    tasks
        .into_iter()
        .map(|t| PostTarget {
            output_dir: out.join(&t.source_label),
            url: t.url_to_scrape,
        })
        .collect()
}

/// Stage mode: for every stage, derive or load deep-dives and run the
/// pending ones on a bounded pool of sessions.
pub async fn run_stage_pipeline(cfg: &HarvestConfig, factory: Arc<dyn SessionFactory>) -> Result<()> {
    let stages = discover_stages(&cfg.stages.root, &cfg.stages.prefix)?;
    if stages.is_empty() {
        warn!(
            root = %cfg.stages.root.display(),
            prefix = %cfg.stages.prefix,
            "no stage folders found"
        );
        return Ok(());
    }

    let opts = Arc::new(DeepDiveOptions::for_stages(cfg));
    let cooldown = Duration::from_secs(cfg.stages.cooldown_secs);

    for (i, stage) in stages.iter().enumerate() {
        info!("==== stage {}/{}: {} ====", i + 1, stages.len(), stage.display());

        let tasks = match resolve_stage_tasks(stage, cfg) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(stage = %stage.display(), error = %e, "cannot resolve stage tasks");
                continue;
            }
        };
        if tasks.is_empty() {
            info!(stage = %stage.display(), "nothing to deep-dive");
            continue;
        }

        let targets = stage_targets(stage, tasks, cfg);
        let total = targets.len();
        let pending = match pending_targets(targets) {
            Ok(p) => p,
            Err(e) => {
                warn!(stage = %stage.display(), error = %e, "cannot read checkpoints");
                continue;
            }
        };
        info!(total, completed = total - pending.len(), pending = pending.len(), "stage status");
        if pending.is_empty() {
            continue;
        }

        run_pool(
            Arc::clone(&factory),
            pending,
            cfg.stages.workers,
            Arc::clone(&opts),
            cooldown,
        )
        .await;
    }
    Ok(())
}
