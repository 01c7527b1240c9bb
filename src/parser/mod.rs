pub mod fragment;
pub mod metrics;
pub mod profile;

use std::sync::LazyLock;

use scraper::{Html, Selector};

use crate::models::Record;

pub const FRAGMENT_SELECTOR: &str = r#"article[data-testid="tweet"]"#;

static FRAGMENT: LazyLock<Selector> = LazyLock::new(|| Selector::parse(FRAGMENT_SELECTOR).unwrap());

/// Every parseable post fragment in a rendered page, in document order.
pub fn extract_records(html: &str) -> Vec<Record> {
    let doc = Html::parse_document(html);
    doc.select(&FRAGMENT)
        .filter_map(fragment::extract_record)
        .collect()
}

/// Fragment count plus identity links of one search-results snapshot.
#[derive(Debug, Default)]
pub struct LinkScan {
    pub fragments: usize,
    pub links: Vec<String>,
}

pub fn scan_links(html: &str) -> LinkScan {
    let doc = Html::parse_document(html);
    let mut scan = LinkScan::default();
    for article in doc.select(&FRAGMENT) {
        scan.fragments += 1;
        if let Some(link) = fragment::post_link(article) {
            scan.links.push(link);
        }
    }
    scan
}
