use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{progress_bar, BatchStats, LiveSession, Tally};
use crate::backoff::{Backoff, Outcome};
use crate::checkpoint::write_json_atomic;
use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::harvest::{self, ProfileOptions};
use crate::models::ProfileErrorReport;
use crate::session::SessionFactory;
use crate::tasks::{load_handles, Manifest};

const ERROR_SUFFIX: &str = "_error";

/// Handles that already have a `{handle}.json`. Error reports don't count.
pub fn completed_profiles(dir: &Path) -> io::Result<HashSet<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(e),
    };
    let mut done = HashSet::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if !stem.ends_with(ERROR_SUFFIX) {
                done.insert(stem.to_string());
            }
        }
    }
    Ok(done)
}

fn write_error_report(dir: &Path, handle: &str, err: &HarvestError) -> io::Result<PathBuf> {
    let report = ProfileErrorReport {
        handle: handle.to_string(),
        error_message: err.to_string(),
        error_timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    };
    write_json_atomic(&dir.join(format!("{handle}{ERROR_SUFFIX}.json")), &report)
}

/// Profile mode: every handle in `users.txt` on one session.
pub async fn run_profile_pipeline(cfg: &HarvestConfig, factory: &dyn SessionFactory) -> Result<()> {
    let handles = match load_handles(&cfg.profiles.users_file)? {
        Manifest::Created => {
            info!(
                file = %cfg.profiles.users_file.display(),
                "created an example users file; edit it and run again"
            );
            return Ok(());
        }
        Manifest::Loaded(handles) => handles,
    };

    let out = &cfg.profiles.output_dir;
    fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;
    let done = completed_profiles(out)
        .with_context(|| format!("Failed to list {}", out.display()))?;
    let pending: Vec<String> = handles.into_iter().filter(|h| !done.contains(h)).collect();
    info!(already = done.len(), pending = pending.len(), "profile pipeline starting");
    if pending.is_empty() {
        return Ok(());
    }

    let mut live = LiveSession::open(factory, "profiles")
        .await
        .context("Failed to open browser session")?;
    run_profiles(&mut live, &pending, cfg).await;
    live.close().await;
    Ok(())
}

pub(crate) async fn run_profiles(
    live: &mut LiveSession<'_>,
    handles: &[String],
    cfg: &HarvestConfig,
) -> BatchStats {
    let opts = ProfileOptions::from_config(cfg);
    let out = &cfg.profiles.output_dir;
    let mut backoff = Backoff::new("profiles", Duration::from_secs(cfg.profiles.cooldown_secs));
    let mut stats = BatchStats::new(handles.len());
    let pb = progress_bar(handles.len());

    for (i, handle) in handles.iter().enumerate() {
        let Some(session) = live.get() else {
            warn!("no live session, leaving the remaining profiles pending");
            break;
        };
        pb.set_message(handle.clone());
        let outcome = backoff
            .guard(handle, harvest::profile(session, handle, out, &opts))
            .await;
        stats.record(Tally::from(&outcome));
        if let Outcome::Skipped(e) | Outcome::Failed(e) = &outcome {
            if let Err(io) = write_error_report(out, handle, e) {
                warn!(handle = %handle, error = %io, "could not write error report");
            }
        }
        live.recover(&outcome).await;
        pb.inc(1);

        if i + 1 < handles.len() {
            cfg.timing.between_profiles.sleep().await;
        }
    }

    pb.finish_and_clear();
    info!("Profiles finished: {}", stats.summary());
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timing;
    use crate::session::fake::{page_of, post_html, FakeFactory, FakeSession, Listing};

    fn cfg(out: &Path) -> HarvestConfig {
        let mut cfg = HarvestConfig::default();
        cfg.timing = Timing::instant();
        cfg.profiles.output_dir = out.to_path_buf();
        cfg.profiles.cooldown_secs = 0;
        cfg
    }

    fn profile_page(handle: &str) -> String {
        let header = format!(
            r#"<div data-testid="UserName"><div><span><span>{handle} name</span></span></div></div>"#
        );
        page_of(&[header, post_html(handle, 1, 0)])
    }

    #[test]
    fn error_reports_are_not_completions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("nasa.json"), "{}").unwrap();
        fs::write(dir.path().join("google_error.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        let done = completed_profiles(dir.path()).unwrap();
        assert_eq!(done, HashSet::from(["nasa".to_string()]));
        assert!(completed_profiles(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn failures_leave_an_error_report() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let factory = FakeFactory::new(
            FakeSession::new().route("https://x.com/nasa", Listing::fixed(profile_page("nasa"))),
        );
        let mut live = LiveSession::open(&factory, "profiles").await.unwrap();

        let handles = vec!["nasa".to_string(), "ghost".to_string()];
        let stats = run_profiles(&mut live, &handles, &cfg).await;

        assert_eq!((stats.ok, stats.failed), (1, 1));
        assert!(dir.path().join("nasa.json").exists());
        let report: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("ghost_error.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(report["handle"], "ghost");
        assert!(report["errorMessage"].as_str().unwrap().contains("UserName"));
        assert_eq!(
            completed_profiles(dir.path()).unwrap(),
            HashSet::from(["nasa".to_string()])
        );
    }

    #[tokio::test]
    async fn crashed_browser_is_replaced_between_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let mut factory = FakeFactory::new(
            FakeSession::new()
                .route("https://x.com/nasa", Listing::fixed(profile_page("nasa")))
                .route("https://x.com/esa", Listing::fixed(profile_page("esa"))),
        );
        factory.dead_on_arrival = 1;
        let mut live = LiveSession::open(&factory, "profiles").await.unwrap();

        let handles = vec!["nasa".to_string(), "esa".to_string()];
        let stats = run_profiles(&mut live, &handles, &cfg).await;

        assert_eq!((stats.ok, stats.failed), (1, 1));
        assert_eq!(live.renewals(), 1);
        assert!(dir.path().join("nasa_error.json").exists());
        assert!(dir.path().join("esa.json").exists());
    }
}
