//! The rendered-page capability the harvester drives.
//!
//! Everything above this module only sees [`Session`]: navigate, read the
//! current markup, scroll, measure, wait and click. Launching a browser and
//! loading credentials belong to the implementations.

pub mod chrome;
#[cfg(test)]
pub mod fake;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SessionError;

/// A CSS-addressed element on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    selector: String,
}

impl Element {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
        }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }
}

#[async_trait]
pub trait Session: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    async fn rendered_content(&mut self) -> Result<String, SessionError>;

    async fn scroll_to_bottom(&mut self) -> Result<(), SessionError>;

    async fn current_height(&mut self) -> Result<u64, SessionError>;

    /// Resolve once `selector` matches, or fail with `SessionError::Timeout`.
    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError>;

    async fn click(&mut self, element: &Element) -> Result<(), SessionError>;

    /// Release the underlying browser. Called exactly once per session.
    async fn close(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Opens independent sessions, one per worker.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Session>, SessionError>;
}
