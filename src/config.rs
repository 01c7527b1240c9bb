use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde::Deserialize;

/// Everything tunable about a harvest. Built once in `main` and passed down.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub cookies_file: PathBuf,
    pub headless: bool,
    pub sample_cap: usize,
    pub wait_timeout_secs: u64,
    pub timing: Timing,
    pub search: SearchConfig,
    pub stages: StageConfig,
    pub profiles: ProfileConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            cookies_file: PathBuf::from("x_cookies.json"),
            headless: true,
            sample_cap: 20,
            wait_timeout_secs: 20,
            timing: Timing::default(),
            search: SearchConfig::default(),
            stages: StageConfig::default(),
            profiles: ProfileConfig::default(),
        }
    }
}

impl HarvestConfig {
    /// `harvest.toml` (or `path`) if present, then `HARVEST_*` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name("harvest").required(false),
        };
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("HARVEST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read harvest configuration")?;
        settings
            .try_deserialize()
            .context("Invalid harvest configuration")
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

/// A randomized pause, drawn uniformly from `[min_ms, max_ms]`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Pause {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Pause {
    pub const fn between(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    #[cfg(test)]
    pub const fn none() -> Self {
        Self::between(0, 0)
    }

    pub fn pick(&self) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rand::rng().random_range(self.min_ms..=self.max_ms))
    }

    pub async fn sleep(&self) {
        let d = self.pick();
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// After each scroll in a listing, before re-measuring height.
    pub scroll: Pause,
    /// After each scroll in the search link-discovery loop.
    pub search_scroll: Pause,
    /// After a post or profile page first renders.
    pub render: Pause,
    /// When a search view shows no fragments yet.
    pub empty_retry: Pause,
    /// Between consecutive profiles.
    pub between_profiles: Pause,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            scroll: Pause::between(2000, 3500),
            search_scroll: Pause::between(2500, 4000),
            render: Pause::between(2000, 3000),
            empty_retry: Pause::between(2000, 2000),
            between_profiles: Pause::between(5000, 12000),
        }
    }
}

impl Timing {
    /// No pauses at all; used by tests.
    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            scroll: Pause::none(),
            search_scroll: Pause::none(),
            render: Pause::none(),
            empty_retry: Pause::none(),
            between_profiles: Pause::none(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub tasks_file: PathBuf,
    pub link_cache: String,
    pub link_limit: usize,
    pub min_reposts: u64,
    pub min_likes: u64,
    pub retry_budget: u32,
    pub reply_cycles: u32,
    pub quote_cycles: u32,
    pub cooldown_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tasks_file: PathBuf::from("tasks.txt"),
            link_cache: "urls_to_process.json".into(),
            link_limit: 120,
            min_reposts: 0,
            min_likes: 0,
            retry_budget: 5,
            reply_cycles: 3,
            quote_cycles: 3,
            cooldown_secs: 241,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub root: PathBuf,
    pub prefix: String,
    pub output_subdir: String,
    pub manifest: String,
    pub workers: usize,
    pub reply_cycles: u32,
    pub quote_cycles: u32,
    pub cooldown_secs: u64,
    pub like_probability: f64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            prefix: "stage".into(),
            output_subdir: "secondary_output".into(),
            manifest: "secondary_tasks.json".into(),
            workers: 2,
            reply_cycles: 1,
            quote_cycles: 1,
            cooldown_secs: 183,
            like_probability: 0.33,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub users_file: PathBuf,
    pub output_dir: PathBuf,
    pub recent_posts: usize,
    pub max_scrolls: u32,
    pub cooldown_secs: u64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            users_file: PathBuf::from("users.txt"),
            output_dir: PathBuf::from("scraped_users"),
            recent_posts: 10,
            max_scrolls: 3,
            cooldown_secs: 180,
        }
    }
}
