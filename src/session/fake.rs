//! Scripted in-memory session for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};

use super::{Element, Session, SessionFactory};
use crate::error::SessionError;

/// One scrollable page: a snapshot and a height per scroll step.
/// Steps past the end repeat the last snapshot.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub snapshots: Vec<String>,
    pub heights: Vec<u64>,
}

impl Listing {
    pub fn new(steps: Vec<(String, u64)>) -> Self {
        let (snapshots, heights) = steps.into_iter().unzip();
        Self { snapshots, heights }
    }

    /// A page that never grows.
    pub fn fixed(html: String) -> Self {
        Self::new(vec![(html, 1000)])
    }
}

#[derive(Debug, Default, Clone)]
pub struct FakeSession {
    routes: HashMap<String, Listing>,
    current: Option<String>,
    step: usize,
    /// Every navigation and click, in order.
    pub log: Arc<Mutex<Vec<String>>>,
    /// Fail `rendered_content` for this URL, to simulate a throttled page.
    pub broken: Option<String>,
    /// The browser is gone: every call fails.
    pub dead: bool,
    /// Fail every height measurement, to fault a listing mid-collection.
    pub broken_height: bool,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, url: &str, listing: Listing) -> Self {
        self.routes.insert(url.to_string(), listing);
        self
    }

    /// Start already positioned on `url`, as if navigated there.
    pub fn at(mut self, url: &str) -> Self {
        self.current = Some(url.to_string());
        self
    }

    fn listing(&self) -> Option<&Listing> {
        self.current.as_ref().and_then(|u| self.routes.get(u))
    }

    fn clamp(&self, len: usize) -> usize {
        self.step.min(len.saturating_sub(1))
    }

    fn alive(&self) -> Result<(), SessionError> {
        if self.dead {
            return Err(SessionError::Browser("target closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.log.lock().unwrap().push(format!("goto {url}"));
        self.alive()?;
        self.current = Some(url.to_string());
        self.step = 0;
        Ok(())
    }

    async fn rendered_content(&mut self) -> Result<String, SessionError> {
        self.alive()?;
        if self.broken.is_some() && self.broken == self.current {
            return Err(SessionError::Browser("connection reset".into()));
        }
        Ok(self
            .listing()
            .and_then(|l| l.snapshots.get(self.clamp(l.snapshots.len())).cloned())
            .unwrap_or_else(|| "<html><body></body></html>".into()))
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), SessionError> {
        self.step += 1;
        Ok(())
    }

    async fn current_height(&mut self) -> Result<u64, SessionError> {
        self.alive()?;
        if self.broken_height {
            return Err(SessionError::Script("document.body is null".into()));
        }
        Ok(self
            .listing()
            .and_then(|l| l.heights.get(self.clamp(l.heights.len())).copied())
            .unwrap_or(0))
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let html = self.rendered_content().await?;
        let sel = Selector::parse(selector).map_err(|e| SessionError::Script(e.to_string()))?;
        if Html::parse_document(&html).select(&sel).next().is_some() {
            Ok(())
        } else {
            Err(SessionError::Timeout {
                selector: selector.to_string(),
                timeout,
            })
        }
    }

    async fn click(&mut self, element: &Element) -> Result<(), SessionError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("click {}", element.selector()));
        Ok(())
    }
}

/// Hands out clones of a template session; counts how many were opened.
pub struct FakeFactory {
    pub template: FakeSession,
    pub opened: Arc<Mutex<usize>>,
    /// The first `dead_on_arrival` sessions crash on first use.
    pub dead_on_arrival: usize,
    /// Refuse to open anything past this many sessions.
    pub max_sessions: Option<usize>,
}

impl FakeFactory {
    pub fn new(template: FakeSession) -> Self {
        Self {
            template,
            opened: Arc::new(Mutex::new(0)),
            dead_on_arrival: 0,
            max_sessions: None,
        }
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open(&self) -> Result<Box<dyn Session>, SessionError> {
        let n = {
            let mut opened = self.opened.lock().unwrap();
            if self.max_sessions.is_some_and(|max| *opened >= max) {
                return Err(SessionError::Browser("could not launch".into()));
            }
            *opened += 1;
            *opened
        };
        let mut session = self.template.clone();
        session.current = None;
        session.step = 0;
        session.dead = n <= self.dead_on_arrival;
        Ok(Box::new(session))
    }
}

/// Markup for one post fragment.
pub fn post_html(handle: &str, id: u64, reposts: u64) -> String {
    format!(
        r#"<article data-testid="tweet">
  <div data-testid="User-Name"><span>{handle}</span></div>
  <a href="/{handle}/status/{id}"><time datetime="2024-05-01T10:00:{:02}.000Z">May 1</time></a>
  <div data-testid="tweetText"><span>post {id}</span></div>
  <button data-testid="retweet" aria-label="{reposts} reposts. Repost"><span>{reposts}</span></button>
</article>"#,
        id % 60
    )
}

pub fn page_of(posts: &[String]) -> String {
    format!("<html><body>{}</body></html>", posts.concat())
}
