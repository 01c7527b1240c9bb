use anyhow::Result;

use super::pending_targets;
use super::stages::{discover_stages, manifest_path, stage_targets};
use crate::checkpoint::load_manifest;
use crate::config::HarvestConfig;
use crate::tasks::{load_search_tasks, DeepDiveTask, Manifest, PostTarget};

/// Progress of one search task or stage. `None` counts mean no manifest yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub kind: &'static str,
    pub name: String,
    pub counts: Option<(usize, usize)>,
}

fn progress_of(targets: Vec<PostTarget>) -> Result<(usize, usize)> {
    let total = targets.len();
    let pending = pending_targets(targets)?.len();
    Ok((total, total - pending))
}

pub fn collect_status(cfg: &HarvestConfig) -> Result<Vec<StatusRow>> {
    let mut rows = Vec::new();

    // Never create the example task file from here.
    if cfg.search.tasks_file.exists() {
        if let Manifest::Loaded(tasks) = load_search_tasks(&cfg.search.tasks_file)? {
            for task in tasks {
                let cache = task.output_folder.join(&cfg.search.link_cache);
                let counts = match load_manifest::<Vec<String>>(&cache)? {
                    Some(links) => Some(progress_of(
                        links
                            .into_iter()
                            .map(|url| PostTarget {
                                url,
                                output_dir: task.output_folder.clone(),
                            })
                            .collect(),
                    )?),
                    None => None,
                };
                rows.push(StatusRow {
                    kind: "search",
                    name: format!("{} ({} .. {})", task.keyword, task.start_date, task.end_date),
                    counts,
                });
            }
        }
    }

    if cfg.stages.root.is_dir() {
        for stage in discover_stages(&cfg.stages.root, &cfg.stages.prefix)? {
            let counts = match load_manifest::<Vec<DeepDiveTask>>(&manifest_path(&stage, cfg))? {
                Some(tasks) => Some(progress_of(stage_targets(&stage, tasks, cfg))?),
                None => None,
            };
            rows.push(StatusRow {
                kind: "stage",
                name: stage.display().to_string(),
                counts,
            });
        }
    }

    Ok(rows)
}

pub fn report_status(cfg: &HarvestConfig) -> Result<()> {
    let rows = collect_status(cfg)?;
    if rows.is_empty() {
        println!("No search tasks or stages found.");
        return Ok(());
    }

    println!(
        "{:<6} | {:<48} | {:>6} | {:>9} | {:>7}",
        "Kind", "Name", "Total", "Completed", "Pending"
    );
    println!("{}", "-".repeat(88));
    for row in &rows {
        match row.counts {
            Some((total, done)) => println!(
                "{:<6} | {:<48} | {:>6} | {:>9} | {:>7}",
                row.kind,
                row.name,
                total,
                done,
                total - done
            ),
            None => println!("{:<6} | {:<48} | {:>26}", row.kind, row.name, "no manifest"),
        }
    }
    Ok(())
}
