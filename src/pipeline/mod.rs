pub mod profiles;
pub mod search;
pub mod stages;
pub mod status;

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::backoff::{Backoff, Outcome};
use crate::checkpoint::{CheckpointStore, DirCheckpoint};
use crate::error::SessionError;
use crate::harvest::{self, DeepDiveOptions};
use crate::session::{Session, SessionFactory};
use crate::tasks::PostTarget;

pub use profiles::run_profile_pipeline;
pub use search::run_search_pipeline;
pub use stages::{derive_stage, run_stage_pipeline};
pub use status::report_status;

/// Per-batch counts, printed when a batch ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub total: usize,
    pub ok: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchStats {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    fn record(&mut self, tally: Tally) {
        match tally {
            Tally::Ok => self.ok += 1,
            Tally::Skipped => self.skipped += 1,
            Tally::Failed => self.failed += 1,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} total / {} ok / {} skipped / {} failed",
            self.total, self.ok, self.skipped, self.failed
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum Tally {
    Ok,
    Skipped,
    Failed,
}

impl<T> From<&Outcome<T>> for Tally {
    fn from(outcome: &Outcome<T>) -> Self {
        match outcome {
            Outcome::Done(_) => Tally::Ok,
            Outcome::Skipped(_) => Tally::Skipped,
            Outcome::Failed(_) => Tally::Failed,
        }
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} ({msg})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

/// Targets whose trailing URL segment has no artifact in their folder yet.
/// Each folder is listed once.
pub fn pending_targets(targets: Vec<PostTarget>) -> io::Result<Vec<PostTarget>> {
    let mut completed: HashMap<PathBuf, HashSet<String>> = HashMap::new();
    let mut pending = Vec::new();
    for target in targets {
        if !completed.contains_key(&target.output_dir) {
            let ids = DirCheckpoint::new(&target.output_dir).completed_ids()?;
            completed.insert(target.output_dir.clone(), ids);
        }
        let done = completed
            .get(&target.output_dir)
            .is_some_and(|ids| ids.contains(target.identity()));
        if !done {
            pending.push(target);
        }
    }
    Ok(pending)
}

/// A runner's session, replaced through its factory when the browser dies.
pub struct LiveSession<'f> {
    factory: &'f dyn SessionFactory,
    session: Option<Box<dyn Session>>,
    label: String,
    renewals: u32,
}

impl<'f> LiveSession<'f> {
    pub async fn open(
        factory: &'f dyn SessionFactory,
        label: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let session = factory.open().await?;
        Ok(Self {
            factory,
            session: Some(session),
            label: label.into(),
            renewals: 0,
        })
    }

    /// `None` once the session died and no replacement could be opened.
    pub fn get(&mut self) -> Option<&mut (dyn Session + 'static)> {
        self.session.as_deref_mut()
    }

    pub fn renewals(&self) -> u32 {
        self.renewals
    }

    /// Swap in a fresh session if `outcome` says the browser is gone.
    /// Runs after the cooldown, so the replacement starts clean.
    pub async fn recover<T>(&mut self, outcome: &Outcome<T>) {
        let Outcome::Failed(cause) = outcome else { return };
        if !cause.session_lost() {
            return;
        }
        if let Some(mut dead) = self.session.take() {
            if let Err(e) = dead.close().await {
                debug!(session = %self.label, error = %e, "dead session did not close");
            }
        }
        match self.factory.open().await {
            Ok(fresh) => {
                self.session = Some(fresh);
                self.renewals += 1;
                info!(session = %self.label, renewals = self.renewals, "session reopened");
            }
            Err(e) => error!(session = %self.label, error = %e, "could not reopen session"),
        }
    }

    pub async fn close(mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!(session = %self.label, error = %e, "session did not close cleanly");
            }
        }
    }
}

/// Deep-dive every target on one shared session, in order.
pub async fn run_sequential(
    live: &mut LiveSession<'_>,
    backoff: &mut Backoff,
    targets: Vec<PostTarget>,
    opts: &DeepDiveOptions,
) -> BatchStats {
    let mut stats = BatchStats::new(targets.len());
    let pb = progress_bar(targets.len());

    for target in targets {
        let Some(session) = live.get() else {
            warn!("no live session, leaving the rest of the batch pending");
            break;
        };
        pb.set_message(target.identity().to_string());
        let store = DirCheckpoint::new(&target.output_dir);
        let outcome = backoff
            .guard(
                &target.url,
                harvest::deep_dive(session, &target.url, &store, opts),
            )
            .await;
        stats.record(Tally::from(&outcome));
        live.recover(&outcome).await;
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Deep-dives finished: {}", stats.summary());
    stats
}

/// Deep-dive targets on `workers` independent sessions.
///
/// Workers pull from a shared queue and report over a channel; the caller's
/// loop owns the progress bar. Each worker has its own session and its own
/// cooldown state.
pub async fn run_pool(
    factory: Arc<dyn SessionFactory>,
    targets: Vec<PostTarget>,
    workers: usize,
    opts: Arc<DeepDiveOptions>,
    cooldown: Duration,
) -> BatchStats {
    let total = targets.len();
    let mut stats = BatchStats::new(total);
    if total == 0 {
        return stats;
    }

    let workers = workers.clamp(1, total);
    let queue = Arc::new(Mutex::new(VecDeque::from(targets)));
    let (tx, mut rx) = mpsc::channel::<Tally>(workers * 2);

    let mut handles = Vec::with_capacity(workers);
    for n in 0..workers {
        let factory = Arc::clone(&factory);
        let queue = Arc::clone(&queue);
        let opts = Arc::clone(&opts);
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            pool_worker(n + 1, factory, queue, tx, opts, cooldown).await;
        }));
    }

    // Drop our copy of tx so rx closes when every worker is done
    drop(tx);

    let pb = progress_bar(total);
    pb.set_message(format!("{workers} workers"));
    while let Some(tally) = rx.recv().await {
        stats.record(tally);
        pb.inc(1);
    }
    pb.finish_and_clear();

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "worker task panicked");
        }
    }

    let left = queue.lock().map(|q| q.len()).unwrap_or(0);
    if left > 0 {
        warn!(left, "no session was available for the remaining items");
    }
    info!("Pool finished: {}", stats.summary());
    stats
}

async fn pool_worker(
    id: usize,
    factory: Arc<dyn SessionFactory>,
    queue: Arc<Mutex<VecDeque<PostTarget>>>,
    tx: mpsc::Sender<Tally>,
    opts: Arc<DeepDiveOptions>,
    cooldown: Duration,
) {
    let label = format!("worker-{id}");
    let mut live = match LiveSession::open(factory.as_ref(), label.as_str()).await {
        Ok(s) => s,
        Err(e) => {
            error!(worker = %label, error = %e, "could not open session");
            return;
        }
    };
    let mut backoff = Backoff::new(label.as_str(), cooldown);
    info!(worker = %label, "session ready");

    loop {
        let Some(session) = live.get() else { break };
        let next = queue.lock().ok().and_then(|mut q| q.pop_front());
        let Some(target) = next else { break };

        let store = DirCheckpoint::new(&target.output_dir);
        let outcome = backoff
            .guard(
                &target.url,
                harvest::deep_dive(session, &target.url, &store, &opts),
            )
            .await;
        let sent = tx.send(Tally::from(&outcome)).await;
        if sent.is_err() {
            break;
        }
        live.recover(&outcome).await;
    }

    info!(
        worker = %label,
        cooldowns = backoff.cooldowns(),
        renewals = live.renewals(),
        "worker done"
    );
    live.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Pause;
    use crate::models::Record;
    use crate::session::fake::{page_of, post_html, FakeFactory, FakeSession, Listing};

    fn instant_dive() -> DeepDiveOptions {
        DeepDiveOptions {
            wait_timeout: Duration::from_secs(20),
            render: Pause::none(),
            scroll: Pause::none(),
            reply_cycles: 1,
            quote_cycles: 1,
            sample_cap: 20,
            like_probability: 0.0,
        }
    }

    fn target(id: u64, dir: &std::path::Path) -> PostTarget {
        PostTarget {
            url: format!("https://x.com/p/status/{id}"),
            output_dir: dir.to_path_buf(),
        }
    }

    fn routed(ids: &[u64]) -> FakeSession {
        ids.iter().fold(FakeSession::new(), |s, id| {
            s.route(
                &format!("https://x.com/p/status/{id}"),
                Listing::fixed(page_of(&[post_html("p", *id, 0)])),
            )
        })
    }

    #[test]
    fn pending_is_set_difference_by_trailing_id() {
        let dir = tempfile::tempdir().unwrap();
        let done = Record {
            post_url: "https://x.com/p/status/2".into(),
            author_display_name: String::new(),
            author_handle: String::new(),
            posted_at: "2024-05-01T10:00:00.000Z".into(),
            body_text: String::new(),
            hashtags: vec![],
            emojis: vec![],
            reply_count: 0,
            repost_count: 0,
            like_count: 0,
            replies: vec![],
            quote_reposts: vec![],
        };
        DirCheckpoint::new(dir.path()).write_artifact(&done).unwrap();

        let pending =
            pending_targets((1..=3).map(|i| target(i, dir.path())).collect()).unwrap();
        let ids: Vec<_> = pending.iter().map(|t| t.identity()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn sequential_run_writes_every_target_then_nothing_is_pending() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new(routed(&[1, 2]));
        let mut live = LiveSession::open(&factory, "test").await.unwrap();
        let mut backoff = Backoff::new("test", Duration::ZERO);
        let targets: Vec<_> = (1..=2).map(|i| target(i, dir.path())).collect();

        let stats =
            run_sequential(&mut live, &mut backoff, targets.clone(), &instant_dive()).await;
        assert_eq!((stats.ok, stats.failed), (2, 0));
        assert_eq!(live.renewals(), 0);
        assert!(pending_targets(targets).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_run_replaces_a_crashed_browser() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = FakeFactory::new(routed(&[1, 2, 3]));
        factory.dead_on_arrival = 1;
        let opened = Arc::clone(&factory.opened);
        let mut live = LiveSession::open(&factory, "test").await.unwrap();
        let mut backoff = Backoff::new("test", Duration::from_secs(183));
        let targets: Vec<_> = (1..=3).map(|i| target(i, dir.path())).collect();

        let t0 = tokio::time::Instant::now();
        let stats = run_sequential(&mut live, &mut backoff, targets, &instant_dive()).await;

        assert_eq!((stats.ok, stats.failed), (2, 1));
        assert_eq!(*opened.lock().unwrap(), 2);
        assert_eq!(live.renewals(), 1);
        assert_eq!(backoff.cooldowns(), 1);
        assert!(t0.elapsed() < Duration::from_secs(2 * 183));
    }

    #[tokio::test]
    async fn sequential_run_stops_when_no_session_can_be_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = FakeFactory::new(routed(&[1, 2, 3]));
        factory.dead_on_arrival = 1;
        factory.max_sessions = Some(1);
        let mut live = LiveSession::open(&factory, "test").await.unwrap();
        let mut backoff = Backoff::new("test", Duration::ZERO);
        let targets: Vec<_> = (1..=3).map(|i| target(i, dir.path())).collect();

        let stats = run_sequential(&mut live, &mut backoff, targets.clone(), &instant_dive()).await;

        assert_eq!(stats, BatchStats { total: 3, ok: 0, skipped: 0, failed: 1 });
        assert!(live.get().is_none());
        assert_eq!(pending_targets(targets).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn pool_runs_everything_once_per_worker_session() {
        let dir = tempfile::tempdir().unwrap();
        let ids: Vec<u64> = (1..=5).collect();
        let factory = FakeFactory::new(routed(&ids));
        let opened = Arc::clone(&factory.opened);
        let targets: Vec<_> = ids.iter().map(|i| target(*i, dir.path())).collect();

        let stats = run_pool(
            Arc::new(factory),
            targets.clone(),
            2,
            Arc::new(instant_dive()),
            Duration::ZERO,
        )
        .await;

        assert_eq!(stats, BatchStats { total: 5, ok: 5, skipped: 0, failed: 0 });
        assert_eq!(*opened.lock().unwrap(), 2);
        assert!(pending_targets(targets).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pool_cooldown_is_per_worker() {
        let dir = tempfile::tempdir().unwrap();
        let mut template = routed(&[1, 2, 3, 4]);
        template.broken = Some("https://x.com/p/status/99".into());
        let template = template.route(
            "https://x.com/p/status/99",
            Listing::fixed(page_of(&[post_html("p", 99, 0)])),
        );
        let factory = Arc::new(FakeFactory::new(template));
        let mut targets = vec![target(99, dir.path())];
        targets.extend((1..=4).map(|i| target(i, dir.path())));

        let t0 = tokio::time::Instant::now();
        let stats = run_pool(factory, targets, 2, Arc::new(instant_dive()), Duration::from_secs(183)).await;

        assert_eq!((stats.ok, stats.failed), (4, 1));
        // Only the failing worker waited; the rest finished on the other session.
        assert!(t0.elapsed() >= Duration::from_secs(183));
        assert!(t0.elapsed() < Duration::from_secs(2 * 183));
    }

    #[tokio::test(start_paused = true)]
    async fn pool_worker_resumes_on_a_fresh_session_after_a_crash() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = FakeFactory::new(routed(&[1, 2, 3, 4]));
        factory.dead_on_arrival = 1;
        let opened = Arc::clone(&factory.opened);
        let targets: Vec<_> = (1..=4).map(|i| target(i, dir.path())).collect();

        let t0 = tokio::time::Instant::now();
        let stats = run_pool(
            Arc::new(factory),
            targets.clone(),
            1,
            Arc::new(instant_dive()),
            Duration::from_secs(183),
        )
        .await;

        assert_eq!(stats, BatchStats { total: 4, ok: 3, skipped: 0, failed: 1 });
        assert_eq!(*opened.lock().unwrap(), 2);
        // One cooldown for the crash, none after the session was replaced.
        assert!(t0.elapsed() >= Duration::from_secs(183));
        assert!(t0.elapsed() < Duration::from_secs(2 * 183));
        assert_eq!(pending_targets(targets).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn not_found_items_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let session_pages = FakeSession::new().route(
            "https://x.com/p/status/7",
            Listing::fixed(page_of(&[post_html("other", 8, 0)])),
        );
        let factory = Arc::new(FakeFactory::new(session_pages));
        let stats = run_pool(
            factory,
            vec![target(7, dir.path())],
            2,
            Arc::new(instant_dive()),
            Duration::from_secs(183),
        )
        .await;
        assert_eq!((stats.skipped, stats.failed), (1, 0));
    }
}
