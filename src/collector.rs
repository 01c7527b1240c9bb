use std::collections::HashSet;

use tracing::debug;

use crate::config::Pause;
use crate::error::SessionError;
use crate::models::Record;
use crate::parser;
use crate::session::Session;

/// Post identities already taken during one harvest of one item.
#[derive(Debug, Default)]
pub struct SeenSet(HashSet<String>);

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `url` was not seen before.
    pub fn insert(&mut self, url: &str) -> bool {
        self.0.insert(url.to_string())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

pub struct CollectOptions {
    pub max_cycles: u32,
    pub settle: Pause,
}

pub struct Collected {
    pub records: Vec<Record>,
    pub cycles: u32,
}

/// Extract, scroll, repeat.
///
/// Stops after `max_cycles`, or earlier on the first cycle where the scroll
/// did not change the page height *and* no new record appeared. A height
/// change alone keeps going (lazy loaders), and so do new records alone.
pub async fn collect(
    session: &mut dyn Session,
    seen: &mut SeenSet,
    opts: &CollectOptions,
) -> Result<Collected, SessionError> {
    let mut records = Vec::new();
    let mut cycles = 0;

    while cycles < opts.max_cycles {
        let html = session.rendered_content().await?;
        let mut found_new = false;
        for record in parser::extract_records(&html) {
            if seen.insert(&record.post_url) {
                records.push(record);
                found_new = true;
            }
        }

        let before = session.current_height().await?;
        session.scroll_to_bottom().await?;
        opts.settle.sleep().await;
        let after = session.current_height().await?;
        cycles += 1;

        debug!(cycle = cycles, total = records.len(), before, after, "collect cycle");
        if after == before && !found_new {
            break;
        }
    }

    Ok(Collected { records, cycles })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fake::{page_of, post_html, FakeSession, Listing};

    const URL: &str = "https://x.com/a/status/1";

    fn opts(max_cycles: u32) -> CollectOptions {
        CollectOptions {
            max_cycles,
            settle: Pause::none(),
        }
    }

    fn urls(records: &[Record]) -> Vec<String> {
        records.iter().map(|r| r.post_url.clone()).collect()
    }

    #[tokio::test]
    async fn three_snapshot_listing() {
        let p1 = post_html("u", 11, 0);
        let p2 = post_html("u", 12, 0);
        let p3 = post_html("u", 13, 0);
        let listing = Listing::new(vec![
            (page_of(&[p1.clone(), p2.clone()]), 1000),
            (page_of(&[p1.clone(), p2.clone(), p3.clone()]), 2000),
            (page_of(&[p1, p2, p3]), 3000),
        ]);
        let mut session = FakeSession::new().route(URL, listing).at(URL);
        let mut seen = SeenSet::new();

        let out = collect(&mut session, &mut seen, &opts(10)).await.unwrap();
        assert_eq!(out.cycles, 3);
        assert_eq!(
            urls(&out.records),
            vec![
                "https://x.com/u/status/11",
                "https://x.com/u/status/12",
                "https://x.com/u/status/13"
            ]
        );
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn exhausted_listing_stops_within_one_extra_cycle() {
        // Grows for N = 2 scrolls, then stays put with nothing new.
        let posts: Vec<String> = (1..=4).map(|i| post_html("v", i, 0)).collect();
        let listing = Listing::new(vec![
            (page_of(&posts[..2]), 100),
            (page_of(&posts[..4]), 200),
            (page_of(&posts[..4]), 300),
        ]);
        let mut session = FakeSession::new().route(URL, listing).at(URL);
        let mut seen = SeenSet::new();

        let out = collect(&mut session, &mut seen, &opts(50)).await.unwrap();
        assert!(out.cycles <= 3);
        assert_eq!(out.records.len(), 4);
    }

    #[tokio::test]
    async fn height_change_alone_keeps_going_until_cap() {
        let post = post_html("w", 1, 0);
        let steps = (0..10).map(|i| (page_of(&[post.clone()]), 100 * (i + 1))).collect();
        let mut session = FakeSession::new().route(URL, Listing::new(steps)).at(URL);
        let mut seen = SeenSet::new();

        let out = collect(&mut session, &mut seen, &opts(5)).await.unwrap();
        assert_eq!(out.cycles, 5);
        assert_eq!(out.records.len(), 1);
    }

    #[tokio::test]
    async fn reentry_only_yields_unseen() {
        let posts: Vec<String> = (1..=3).map(|i| post_html("z", i, 0)).collect();
        let listing = Listing::new(vec![(page_of(&posts), 100), (page_of(&posts), 200)]);
        let mut session = FakeSession::new().route(URL, listing).at(URL);
        let mut seen = SeenSet::new();
        seen.insert("https://x.com/z/status/1");
        seen.insert("https://x.com/z/status/2");

        let out = collect(&mut session, &mut seen, &opts(1)).await.unwrap();
        assert_eq!(urls(&out.records), vec!["https://x.com/z/status/3"]);
        assert!(!seen.insert("https://x.com/z/status/3"));
    }

    #[tokio::test]
    async fn zero_cycles_touches_nothing() {
        let mut session = FakeSession::new();
        let mut seen = SeenSet::new();
        let out = collect(&mut session, &mut seen, &opts(0)).await.unwrap();
        assert_eq!(out.cycles, 0);
        assert!(out.records.is_empty());
    }
}
