use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

static GROUPED_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\d,]+").unwrap());

/// Engagement count of a reply/repost/like control; 0 when absent or unreadable.
pub fn parse_metric(control: Option<ElementRef<'_>>) -> u64 {
    let Some(el) = control else {
        return 0;
    };
    let text: String = el.text().collect();
    parse_metric_parts(el.value().attr("aria-label"), &text)
}

/// The accessibility label wins whenever it holds a number.
pub fn parse_metric_parts(aria_label: Option<&str>, visible_text: &str) -> u64 {
    if let Some(n) = aria_label.and_then(label_count) {
        return n;
    }
    parse_count_text(visible_text)
}

fn label_count(label: &str) -> Option<u64> {
    let m = GROUPED_NUMBER_RE.find(label)?;
    m.as_str().replace(',', "").parse().ok()
}

/// Decode "1.2K", "3万", "4M" or "1,234". Anything else is 0.
pub fn parse_count_text(text: &str) -> u64 {
    let text = text.trim().replace(',', "").to_uppercase();
    if text.is_empty() {
        return 0;
    }
    let (digits, scale) = if text.contains('万') {
        (text.replace('万', ""), 10_000.0)
    } else if text.contains('K') {
        (text.replace('K', ""), 1_000.0)
    } else if text.contains('M') {
        (text.replace('M', ""), 1_000_000.0)
    } else {
        (text, 1.0)
    };
    match digits.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => (v * scale) as u64,
        _ => 0,
    }
}
