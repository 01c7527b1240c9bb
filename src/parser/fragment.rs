use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Node, Selector};
use url::Url;

use super::metrics::parse_metric;
use crate::models::Record;

pub const ORIGIN: &str = "https://x.com";

static TIME: LazyLock<Selector> = LazyLock::new(|| Selector::parse("time").unwrap());
static USER_NAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"div[data-testid="User-Name"]"#).unwrap());
static SPAN: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span").unwrap());
static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"div[data-testid="tweetText"]"#).unwrap());
static HASHTAG: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="/hashtag/"]"#).unwrap());

// Six blocks: emoticons, pictographs, transport, flags, dingbats, enclosed.
static EMOJI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        "[",
        r"\x{1F600}-\x{1F64F}",
        r"\x{1F300}-\x{1F5FF}",
        r"\x{1F680}-\x{1F6FF}",
        r"\x{1F1E0}-\x{1F1FF}",
        r"\x{2702}-\x{27B0}",
        r"\x{24C2}-\x{1F251}",
        "]+"
    ))
    .unwrap()
});

/// Engagement control, preferring the button form over the div form.
fn control<'a>(fragment: ElementRef<'a>, test_id: &str) -> Option<ElementRef<'a>> {
    ["button", "div"].iter().find_map(|tag| {
        let sel = Selector::parse(&format!(r#"{tag}[data-testid="{test_id}"]"#)).ok()?;
        fragment.select(&sel).next()
    })
}

/// Turn one rendered post fragment into a `Record`.
///
/// Returns `None` for partial fragments: no `<time>`, no enclosing link,
/// no `datetime`, or a link without an author segment.
pub fn extract_record(fragment: ElementRef<'_>) -> Option<Record> {
    // Last <time>: quoted posts nest their own timestamp first.
    let time = fragment.select(&TIME).last()?;
    let post_url = enclosing_link(fragment, time)?;
    let posted_at = time.value().attr("datetime")?.to_string();
    let author_handle = author_segment(&post_url)?;

    let author_display_name = fragment
        .select(&USER_NAME)
        .next()
        .and_then(|name| name.select(&SPAN).next())
        .map(|span| span.text().collect::<String>())
        .unwrap_or_else(|| author_handle.clone());

    let body_text = fragment
        .select(&BODY)
        .next()
        .map(flatten_text)
        .unwrap_or_default();

    let emojis = EMOJI_RE
        .find_iter(&body_text)
        .map(|m| m.as_str().to_string())
        .collect();

    let hashtags = fragment
        .select(&HASHTAG)
        .map(|a| a.text().collect::<String>().trim().to_string())
        .collect();

    Some(Record {
        post_url,
        author_display_name,
        author_handle,
        posted_at,
        body_text,
        hashtags,
        emojis,
        reply_count: parse_metric(control(fragment, "reply")),
        repost_count: parse_metric(control(fragment, "retweet")),
        like_count: parse_metric(control(fragment, "like")),
        replies: Vec::new(),
        quote_reposts: Vec::new(),
    })
}

/// Just the identity link of a fragment, for link discovery.
pub fn post_link(fragment: ElementRef<'_>) -> Option<String> {
    let time = fragment.select(&TIME).last()?;
    enclosing_link(fragment, time)
}

fn enclosing_link(fragment: ElementRef<'_>, time: ElementRef<'_>) -> Option<String> {
    for node in time.ancestors() {
        if let Some(el) = ElementRef::wrap(node) {
            if el.value().name() == "a" {
                if let Some(href) = el.value().attr("href") {
                    return Some(absolute(href));
                }
            }
        }
        if node.id() == fragment.id() {
            break;
        }
    }
    None
}

fn absolute(href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{ORIGIN}{href}")
    }
}

fn author_segment(post_url: &str) -> Option<String> {
    let url = Url::parse(post_url).ok()?;
    let first = url.path_segments()?.next()?;
    (!first.is_empty()).then(|| first.to_string())
}

/// Plain text of a body region, one line per text run. Images with alt
/// text (emoji are rendered as images) contribute their alt text.
pub fn flatten_text(region: ElementRef<'_>) -> String {
    let mut parts: Vec<String> = Vec::new();
    for node in region.descendants() {
        let piece = match node.value() {
            Node::Text(t) => Some(&**t),
            Node::Element(e) if e.name() == "img" => e.attr("alt"),
            _ => None,
        };
        if let Some(p) = piece.map(str::trim).filter(|p| !p.is_empty()) {
            parts.push(p.to_string());
        }
    }
    parts.join("\n")
}

/// Whether a navigated URL points at the post identified by `post_url`.
pub fn same_post(navigated: &str, post_url: &str) -> bool {
    let path = post_url.strip_prefix(ORIGIN).unwrap_or(post_url);
    !path.is_empty() && navigated.trim_end_matches('/').ends_with(path)
}
