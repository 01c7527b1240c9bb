use std::time::Duration;

use thiserror::Error;

/// Failures at the browser-session boundary.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("timed out after {timeout:?} waiting for {selector}")]
    Timeout { selector: String, timeout: Duration },

    #[error("no element matches {0}")]
    ElementNotFound(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("cookie jar {path}: {message}")]
    Cookies { path: String, message: String },
}

/// Classified outcome of harvesting one work item.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The page rendered, but no fragment carries the navigated identity.
    #[error("source post not found on {0}")]
    SourceNotFound(String),

    /// The quote listing never rendered. Absorbed inside a deep-dive.
    #[error("child listing unavailable at {0}")]
    ChildListingUnavailable(String),

    #[error("session fault: {0}")]
    Session(#[from] SessionError),

    #[error("artifact write failed: {0}")]
    Artifact(#[from] std::io::Error),
}

impl HarvestError {
    /// Anything we cannot tell apart from throttling earns a cooldown.
    pub fn triggers_cooldown(&self) -> bool {
        !matches!(
            self,
            HarvestError::SourceNotFound(_) | HarvestError::ChildListingUnavailable(_)
        )
    }

    /// The browser behind the session is gone; only a fresh session helps.
    pub fn session_lost(&self) -> bool {
        matches!(
            self,
            HarvestError::Session(SessionError::Browser(_) | SessionError::Navigation { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_session_class_errors_cool_down() {
        assert!(!HarvestError::SourceNotFound("u".into()).triggers_cooldown());
        assert!(!HarvestError::ChildListingUnavailable("u".into()).triggers_cooldown());
        let fault = HarvestError::from(SessionError::ElementNotFound("article".into()));
        assert!(fault.triggers_cooldown());
        let io = HarvestError::from(std::io::Error::other("disk"));
        assert!(io.triggers_cooldown());
    }

    #[test]
    fn only_dead_browsers_need_a_new_session() {
        assert!(HarvestError::from(SessionError::Browser("target closed".into())).session_lost());
        let nav = SessionError::Navigation {
            url: "https://x.com".into(),
            message: "net::ERR_ABORTED".into(),
        };
        assert!(HarvestError::from(nav).session_lost());
        let timeout = SessionError::Timeout {
            selector: "article".into(),
            timeout: Duration::from_secs(20),
        };
        assert!(!HarvestError::from(timeout).session_lost());
        assert!(!HarvestError::SourceNotFound("u".into()).session_lost());
    }
}
