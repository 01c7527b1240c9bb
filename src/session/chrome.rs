use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{Element, Session, SessionFactory};
use crate::config::HarvestConfig;
use crate::error::SessionError;
use crate::parser::fragment::ORIGIN;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Cookie as exported from a logged-in browser profile.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCookie {
    name: String,
    value: String,
    domain: Option<String>,
    path: Option<String>,
    #[serde(default)]
    secure: bool,
    #[serde(default)]
    http_only: bool,
}

fn load_jar(path: &Path) -> Result<Vec<CookieParam>, SessionError> {
    let jar_err = |message: String| SessionError::Cookies {
        path: path.display().to_string(),
        message,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| jar_err(e.to_string()))?;
    let stored: Vec<StoredCookie> =
        serde_json::from_str(&raw).map_err(|e| jar_err(e.to_string()))?;

    stored
        .into_iter()
        .map(|c| {
            let mut b = CookieParam::builder()
                .name(c.name)
                .value(c.value)
                .secure(c.secure)
                .http_only(c.http_only);
            if let Some(domain) = c.domain {
                b = b.domain(domain);
            }
            if let Some(p) = c.path {
                b = b.path(p);
            }
            b.build().map_err(jar_err)
        })
        .collect()
}

fn browser_err(e: impl std::fmt::Display) -> SessionError {
    SessionError::Browser(e.to_string())
}

fn script_err(e: impl std::fmt::Display) -> SessionError {
    SessionError::Script(e.to_string())
}

/// Launches Chrome and replays a stored cookie jar into each new session.
pub struct ChromeLauncher {
    headless: bool,
    cookies_file: PathBuf,
}

impl ChromeLauncher {
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            headless: config.headless,
            cookies_file: config.cookies_file.clone(),
        }
    }
}

#[async_trait]
impl SessionFactory for ChromeLauncher {
    async fn open(&self) -> Result<Box<dyn Session>, SessionError> {
        let jar = load_jar(&self.cookies_file)?;

        let mut builder = BrowserConfig::builder()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .no_sandbox()
            .window_size(1920, 1080);
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(SessionError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_err)?;
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page(ORIGIN).await.map_err(browser_err)?;
        let cookies = jar.len();
        page.set_cookies(jar).await.map_err(browser_err)?;
        info!(cookies, "browser session ready");

        Ok(Box::new(ChromeSession {
            browser,
            page,
            events: Some(events),
        }))
    }
}

pub struct ChromeSession {
    browser: Browser,
    page: Page,
    events: Option<JoinHandle<()>>,
}

#[async_trait]
impl Session for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        debug!(url, "navigate");
        self.page
            .goto(url)
            .await
            .map_err(|e| SessionError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn rendered_content(&mut self) -> Result<String, SessionError> {
        self.page.content().await.map_err(browser_err)
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), SessionError> {
        self.page
            .evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
            .map_err(script_err)?;
        Ok(())
    }

    async fn current_height(&mut self) -> Result<u64, SessionError> {
        let height: f64 = self
            .page
            .evaluate("document.body.scrollHeight")
            .await
            .map_err(script_err)?
            .into_value()
            .map_err(script_err)?;
        Ok(height.max(0.0) as u64)
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Timeout {
                    selector: selector.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&mut self, element: &Element) -> Result<(), SessionError> {
        let el = self
            .page
            .find_element(element.selector())
            .await
            .map_err(|_| SessionError::ElementNotFound(element.selector().to_string()))?;
        el.click().await.map_err(browser_err)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let closed = self.browser.close().await.map(|_| ()).map_err(browser_err);
        if let Some(events) = self.events.take() {
            events.abort();
        }
        closed
    }
}
