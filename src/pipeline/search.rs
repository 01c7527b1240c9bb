use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{pending_targets, run_sequential, BatchStats, LiveSession};
use crate::backoff::{Backoff, Outcome};
use crate::checkpoint::{load_manifest, write_json_atomic};
use crate::config::HarvestConfig;
use crate::harvest::{self, DeepDiveOptions, SearchOptions};
use crate::session::SessionFactory;
use crate::tasks::{load_search_tasks, Manifest, PostTarget, SearchTask};

/// Search mode: every task in `tasks.txt`, one session, strictly in order.
pub async fn run_search_pipeline(cfg: &HarvestConfig, factory: &dyn SessionFactory) -> Result<()> {
    let tasks = match load_search_tasks(&cfg.search.tasks_file)? {
        Manifest::Created => {
            info!(
                file = %cfg.search.tasks_file.display(),
                "created an example task file; edit it and run again"
            );
            return Ok(());
        }
        Manifest::Loaded(tasks) if tasks.is_empty() => {
            warn!(file = %cfg.search.tasks_file.display(), "no valid tasks");
            return Ok(());
        }
        Manifest::Loaded(tasks) => tasks,
    };
    info!(tasks = tasks.len(), "search pipeline starting");

    let mut live = LiveSession::open(factory, "search")
        .await
        .context("Failed to open browser session")?;
    let stats = run_search_tasks(&mut live, &tasks, cfg).await;
    live.close().await;

    let ok: usize = stats.iter().map(|s| s.ok).sum();
    info!(tasks = tasks.len(), saved = ok, "search pipeline finished");
    Ok(())
}

pub(crate) async fn run_search_tasks(
    live: &mut LiveSession<'_>,
    tasks: &[SearchTask],
    cfg: &HarvestConfig,
) -> Vec<BatchStats> {
    let search_opts = SearchOptions::from_config(cfg);
    let dive_opts = DeepDiveOptions::for_search(cfg);
    let mut backoff = Backoff::new("search", Duration::from_secs(cfg.search.cooldown_secs));
    let mut all = Vec::new();

    for (i, task) in tasks.iter().enumerate() {
        info!(
            "==== task {}/{}: '{}' {} .. {} -> {} ====",
            i + 1,
            tasks.len(),
            task.keyword,
            task.start_date,
            task.end_date,
            task.output_folder.display()
        );
        if let Err(e) = fs::create_dir_all(&task.output_folder) {
            warn!(folder = %task.output_folder.display(), error = %e, "cannot create output folder");
            continue;
        }

        let Some(links) = resolve_links(live, &mut backoff, task, &search_opts, cfg).await else {
            continue;
        };
        if links.is_empty() {
            info!(keyword = %task.keyword, "no links found, skipping task");
            continue;
        }

        let targets: Vec<PostTarget> = links
            .into_iter()
            .map(|url| PostTarget {
                url,
                output_dir: task.output_folder.clone(),
            })
            .collect();
        let total = targets.len();
        let pending = match pending_targets(targets) {
            Ok(p) => p,
            Err(e) => {
                warn!(folder = %task.output_folder.display(), error = %e, "cannot read checkpoint");
                continue;
            }
        };
        info!(total, completed = total - pending.len(), pending = pending.len(), "task status");
        if pending.is_empty() {
            info!(keyword = %task.keyword, "all posts already harvested");
            continue;
        }

        all.push(run_sequential(live, &mut backoff, pending, &dive_opts).await);
    }
    all
}

fn link_cache(task: &SearchTask, cfg: &HarvestConfig) -> PathBuf {
    task.output_folder.join(&cfg.search.link_cache)
}

/// Cached links if a previous run persisted them, otherwise a fresh search.
async fn resolve_links(
    live: &mut LiveSession<'_>,
    backoff: &mut Backoff,
    task: &SearchTask,
    opts: &SearchOptions,
    cfg: &HarvestConfig,
) -> Option<Vec<String>> {
    let cache = link_cache(task, cfg);
    match load_manifest::<Vec<String>>(&cache) {
        Ok(Some(links)) => {
            info!(links = links.len(), cache = %cache.display(), "using cached links");
            return Some(links);
        }
        Ok(None) => {}
        Err(e) => warn!(cache = %cache.display(), error = %e, "ignoring unreadable link cache"),
    }

    let session = live.get()?;
    let outcome = backoff
        .guard(&task.keyword, harvest::search_links(session, task, opts))
        .await;
    live.recover(&outcome).await;
    let links = match outcome {
        Outcome::Done(links) => links,
        Outcome::Skipped(_) | Outcome::Failed(_) => return None,
    };

    if !links.is_empty() {
        if let Err(e) = write_json_atomic(&cache, &links) {
            warn!(cache = %cache.display(), error = %e, "could not persist link cache");
        }
    }
    Some(links)
}
