use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use crate::checkpoint::{write_json_atomic, CheckpointStore};
use crate::collector::{collect, CollectOptions, SeenSet};
use crate::config::{HarvestConfig, Pause};
use crate::error::HarvestError;
use crate::models::{ProfileRecord, Record};
use crate::parser::fragment::{same_post, ORIGIN};
use crate::parser::profile::extract_header;
use crate::parser::{self, FRAGMENT_SELECTOR};
use crate::session::{Element, Session};
use crate::tasks::SearchTask;

const PROFILE_READY_SELECTOR: &str = r#"div[data-testid="UserName"]"#;

pub struct SearchOptions {
    pub limit: usize,
    pub retry_budget: u32,
    pub min_reposts: u64,
    pub min_likes: u64,
    pub scroll: Pause,
    pub empty_retry: Pause,
}

impl SearchOptions {
    pub fn from_config(cfg: &HarvestConfig) -> Self {
        Self {
            limit: cfg.search.link_limit,
            retry_budget: cfg.search.retry_budget,
            min_reposts: cfg.search.min_reposts,
            min_likes: cfg.search.min_likes,
            scroll: cfg.timing.search_scroll,
            empty_retry: cfg.timing.empty_retry,
        }
    }
}

pub struct DeepDiveOptions {
    pub wait_timeout: Duration,
    pub render: Pause,
    pub scroll: Pause,
    pub reply_cycles: u32,
    pub quote_cycles: u32,
    pub sample_cap: usize,
    pub like_probability: f64,
}

impl DeepDiveOptions {
    pub fn for_search(cfg: &HarvestConfig) -> Self {
        Self {
            wait_timeout: cfg.wait_timeout(),
            render: cfg.timing.render,
            scroll: cfg.timing.scroll,
            reply_cycles: cfg.search.reply_cycles,
            quote_cycles: cfg.search.quote_cycles,
            sample_cap: cfg.sample_cap,
            like_probability: 0.0,
        }
    }

    pub fn for_stages(cfg: &HarvestConfig) -> Self {
        Self {
            wait_timeout: cfg.wait_timeout(),
            render: cfg.timing.render,
            scroll: cfg.timing.scroll,
            reply_cycles: cfg.stages.reply_cycles,
            quote_cycles: cfg.stages.quote_cycles,
            sample_cap: cfg.sample_cap,
            like_probability: cfg.stages.like_probability,
        }
    }

    fn cycles(&self, max_cycles: u32) -> CollectOptions {
        CollectOptions {
            max_cycles,
            settle: self.scroll,
        }
    }

    fn roll_like(&self) -> bool {
        self.like_probability > 0.0 && rand::rng().random_bool(self.like_probability.min(1.0))
    }
}

pub struct ProfileOptions {
    pub wait_timeout: Duration,
    pub render: Pause,
    pub scroll: Pause,
    pub max_scrolls: u32,
    pub recent_posts: usize,
}

impl ProfileOptions {
    pub fn from_config(cfg: &HarvestConfig) -> Self {
        Self {
            wait_timeout: cfg.wait_timeout(),
            render: cfg.timing.render,
            scroll: cfg.timing.scroll,
            max_scrolls: cfg.profiles.max_scrolls,
            recent_posts: cfg.profiles.recent_posts,
        }
    }
}

/// Search page URL with the engagement floor and date window in the query.
pub fn search_url(task: &SearchTask, min_reposts: u64, min_likes: u64) -> String {
    let mut q = format!("{} min_retweets:{}", task.keyword, min_reposts);
    if min_likes > 0 {
        q.push_str(&format!(" min_faves:{min_likes}"));
    }
    q.push_str(&format!(
        " since:{} until:{}",
        task.start_date.format("%Y-%m-%d"),
        task.end_date.format("%Y-%m-%d")
    ));
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("q", &q)
        .append_pair("src", "typed_query")
        .finish();
    format!("{ORIGIN}/search?{query}")
}

/// Collect post links from a search view until `limit` links are found or
/// the retry budget runs out. Each empty snapshot and each scroll that
/// leaves the height unchanged spends one retry.
pub async fn search_links(
    session: &mut dyn Session,
    task: &SearchTask,
    opts: &SearchOptions,
) -> Result<Vec<String>, HarvestError> {
    info!(
        keyword = %task.keyword,
        since = %task.start_date,
        until = %task.end_date,
        min_reposts = opts.min_reposts,
        "searching"
    );
    session.navigate(&search_url(task, opts.min_reposts, opts.min_likes)).await?;

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    let mut retries = opts.retry_budget;

    while links.len() < opts.limit && retries > 0 {
        let html = session.rendered_content().await?;
        let scan = parser::scan_links(&html);
        if scan.fragments == 0 {
            opts.empty_retry.sleep().await;
            retries -= 1;
            continue;
        }

        for link in scan.links {
            if links.len() >= opts.limit {
                break;
            }
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }
        info!(found = links.len(), limit = opts.limit, "search progress");

        let before = session.current_height().await?;
        session.scroll_to_bottom().await?;
        opts.scroll.sleep().await;
        let after = session.current_height().await?;
        if after == before {
            retries -= 1;
            info!(retries, "results stopped growing");
        }
    }

    info!(keyword = %task.keyword, links = links.len(), "search finished");
    Ok(links)
}

/// Harvest one post with sampled replies and quote reposts, and write it.
///
/// Nothing is written unless every step up to assembly succeeded.
pub async fn deep_dive(
    session: &mut dyn Session,
    url: &str,
    store: &dyn CheckpointStore,
    opts: &DeepDiveOptions,
) -> Result<PathBuf, HarvestError> {
    session.navigate(url).await?;
    session
        .wait_for_selector(FRAGMENT_SELECTOR, opts.wait_timeout)
        .await?;
    opts.render.sleep().await;

    if opts.roll_like() {
        like_source(session, url).await;
    }

    // The page also renders ancestors and replies; keep the one we asked for.
    let html = session.rendered_content().await?;
    let mut source = parser::extract_records(&html)
        .into_iter()
        .find(|r| same_post(url, &r.post_url))
        .ok_or_else(|| HarvestError::SourceNotFound(url.to_string()))?;

    // One SeenSet for both listings: a post already kept as a reply is not
    // kept again as a quote repost.
    let mut seen = SeenSet::new();
    seen.insert(&source.post_url);

    let replies = collect(session, &mut seen, &opts.cycles(opts.reply_cycles)).await?;
    debug!(url, cycles = replies.cycles, seen = seen.len(), "replies collected");
    let quotes = match quote_reposts(session, url, &mut seen, opts).await {
        Ok(records) => records,
        Err(e) => {
            info!(url, error = %e, "no quote reposts collected");
            Vec::new()
        }
    };

    source.replies = sample_capped(replies.records, opts.sample_cap);
    source.quote_reposts = sample_capped(quotes, opts.sample_cap);

    let path = store.write_artifact(&source)?;
    info!(
        url,
        replies = source.replies.len(),
        quotes = source.quote_reposts.len(),
        path = %path.display(),
        "saved"
    );
    Ok(path)
}

async fn quote_reposts(
    session: &mut dyn Session,
    url: &str,
    seen: &mut SeenSet,
    opts: &DeepDiveOptions,
) -> Result<Vec<Record>, HarvestError> {
    let quotes_url = format!("{}/quotes", url.trim_end_matches('/'));
    let reached = async {
        session.navigate(&quotes_url).await?;
        session
            .wait_for_selector(FRAGMENT_SELECTOR, opts.wait_timeout)
            .await?;
        collect(session, seen, &opts.cycles(opts.quote_cycles)).await
    }
    .await;

    match reached {
        Ok(collected) => Ok(collected.records),
        Err(e) => {
            debug!(url = %quotes_url, error = %e, "quote listing failed");
            Err(HarvestError::ChildListingUnavailable(quotes_url))
        }
    }
}

/// Like control of the fragment whose timestamp links to `url`. Ancestors
/// rendered above it on a reply page are not matched.
fn like_selector(url: &str) -> String {
    let path = url.strip_prefix(ORIGIN).unwrap_or(url).trim_end_matches('/');
    format!(
        r#"article[data-testid="tweet"]:has(a[href="{path}"] > time) button[data-testid="like"]"#
    )
}

/// Opportunistic; the outcome does not matter.
async fn like_source(session: &mut dyn Session, url: &str) {
    match session.click(&Element::css(like_selector(url))).await {
        Ok(()) => debug!("liked source post"),
        Err(e) => debug!(error = %e, "like skipped"),
    }
}

/// At most `cap` items, a uniform sample without replacement when over.
pub fn sample_capped<T>(items: Vec<T>, cap: usize) -> Vec<T> {
    if items.len() <= cap {
        return items;
    }
    let picks = rand::seq::index::sample(&mut rand::rng(), items.len(), cap);
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    picks.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// Harvest a profile header and its most recent posts into `{handle}.json`.
pub async fn profile(
    session: &mut dyn Session,
    handle: &str,
    output_dir: &Path,
    opts: &ProfileOptions,
) -> Result<PathBuf, HarvestError> {
    let url = format!("{ORIGIN}/{handle}");
    session.navigate(&url).await?;
    session
        .wait_for_selector(PROFILE_READY_SELECTOR, opts.wait_timeout)
        .await?;
    opts.render.sleep().await;

    let header = extract_header(&session.rendered_content().await?, handle);

    let mut last = session.current_height().await?;
    for _ in 0..opts.max_scrolls {
        session.scroll_to_bottom().await?;
        opts.scroll.sleep().await;
        let height = session.current_height().await?;
        if height == last {
            break;
        }
        last = height;
    }

    let recent_posts: Vec<Record> = parser::extract_records(&session.rendered_content().await?)
        .into_iter()
        .take(opts.recent_posts)
        .collect();

    let record = ProfileRecord {
        scraped_url: url,
        scraped_timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        display_name: header.display_name,
        handle: header.handle,
        bio: header.bio,
        location: header.location,
        website: header.website,
        join_date: header.join_date,
        following_count: header.following_count,
        followers_count: header.followers_count,
        recent_posts,
    };

    let path = write_json_atomic(&output_dir.join(format!("{handle}.json")), &record)?;
    info!(handle, posts = record.recent_posts.len(), "profile saved");
    Ok(path)
}
