use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use super::fragment::flatten_text;
use super::metrics::parse_count_text;

static DISPLAY_NAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"div[data-testid="UserName"] span > span"#).unwrap());
static SCREEN_NAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"div[data-testid="UserScreenName"] span"#).unwrap());
static BIO: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"div[data-testid="UserDescription"]"#).unwrap());
static LOCATION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"span[data-testid="UserLocation"] span"#).unwrap());
static WEBSITE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[data-testid="UserUrl"] span"#).unwrap());
static JOIN_DATE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"span[data-testid="UserJoinDate"] span"#).unwrap());
static FOLLOWING: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href$="/following"]"#).unwrap());
static VERIFIED_FOLLOWERS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href$="/verified_followers"]"#).unwrap());
static FOLLOWERS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href$="/followers"]"#).unwrap());
static SPAN: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span").unwrap());

const MISSING: &str = "N/A";

/// Header fields of a rendered profile page.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileHeader {
    pub display_name: String,
    pub handle: String,
    pub bio: String,
    pub location: String,
    pub website: String,
    pub join_date: String,
    pub following_count: u64,
    pub followers_count: u64,
}

pub fn extract_header(html: &str, requested_handle: &str) -> ProfileHeader {
    let doc = Html::parse_document(html);
    let text_of = |sel: &Selector| {
        doc.select(sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
    };

    let followers_link = doc
        .select(&VERIFIED_FOLLOWERS)
        .next()
        .or_else(|| doc.select(&FOLLOWERS).next());

    ProfileHeader {
        display_name: text_of(&DISPLAY_NAME).unwrap_or_else(|| MISSING.into()),
        handle: text_of(&SCREEN_NAME).unwrap_or_else(|| format!("@{requested_handle}")),
        bio: doc.select(&BIO).next().map(flatten_text).unwrap_or_default(),
        location: text_of(&LOCATION).unwrap_or_else(|| MISSING.into()),
        website: text_of(&WEBSITE).unwrap_or_else(|| MISSING.into()),
        join_date: text_of(&JOIN_DATE).unwrap_or_else(|| MISSING.into()),
        following_count: doc.select(&FOLLOWING).next().map(link_count).unwrap_or(0),
        followers_count: followers_link.map(link_count).unwrap_or(0),
    }
}

/// First span inside a follow link that looks like a count.
fn link_count(link: ElementRef<'_>) -> u64 {
    link.select(&SPAN)
        .map(|span| span.text().collect::<String>().trim().to_string())
        .find(|t| {
            !t.is_empty()
                && t
                    .chars()
                    .any(|c| c.is_ascii_digit() || matches!(c, '万' | 'K' | 'M' | '.'))
        })
        .map(|t| parse_count_text(&t))
        .unwrap_or(0)
}
