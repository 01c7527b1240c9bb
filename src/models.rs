use serde::{Deserialize, Serialize};

/// One harvested post. `post_url` is the identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub post_url: String,
    #[serde(default)]
    pub author_display_name: String,
    #[serde(default)]
    pub author_handle: String,
    #[serde(default)]
    pub posted_at: String,
    #[serde(default)]
    pub body_text: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub emojis: Vec<String>,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub repost_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub replies: Vec<Record>,
    #[serde(default)]
    pub quote_reposts: Vec<Record>,
}

impl Record {
    /// Last path segment of `post_url` (the status id for post URLs).
    pub fn trailing_id(&self) -> &str {
        trailing_segment(&self.post_url)
    }
}

pub fn trailing_segment(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

/// Profile header plus a handful of recent posts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    pub scraped_url: String,
    pub scraped_timestamp: String,
    pub display_name: String,
    pub handle: String,
    pub bio: String,
    pub location: String,
    pub website: String,
    pub join_date: String,
    pub following_count: u64,
    pub followers_count: u64,
    pub recent_posts: Vec<Record>,
}

/// Written in place of a profile artifact when a profile harvest fails.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileErrorReport {
    pub handle: String,
    pub error_message: String,
    pub error_timestamp: String,
}
