use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::HarvestError;

/// What became of one guarded work item.
#[derive(Debug)]
pub enum Outcome<T> {
    Done(T),
    /// Recoverable: logged and skipped, no cooldown.
    Skipped(HarvestError),
    /// Unrecoverable: the session cooled down before this returned.
    Failed(HarvestError),
}

/// Cooldown state of one harvesting session.
///
/// Every session owns its own `Backoff`; a cooldown in one worker never
/// pauses another.
pub struct Backoff {
    label: String,
    cooldown: Duration,
    cooldowns: u32,
}

impl Backoff {
    pub fn new(label: impl Into<String>, cooldown: Duration) -> Self {
        Self {
            label: label.into(),
            cooldown,
            cooldowns: 0,
        }
    }

    pub fn cooldowns(&self) -> u32 {
        self.cooldowns
    }

    /// Run one item. On a cooldown-class failure, hold this session for the
    /// full cooldown before handing control back.
    pub async fn guard<T, F>(&mut self, item: &str, work: F) -> Outcome<T>
    where
        F: Future<Output = Result<T, HarvestError>>,
    {
        match work.await {
            Ok(v) => Outcome::Done(v),
            Err(e) if !e.triggers_cooldown() => {
                warn!(session = %self.label, item, error = %e, "skipped");
                Outcome::Skipped(e)
            }
            Err(e) => {
                warn!(session = %self.label, item, error = %e, "harvest failed");
                self.cool_down().await;
                Outcome::Failed(e)
            }
        }
    }

    async fn cool_down(&mut self) {
        self.cooldowns += 1;
        if self.cooldown.is_zero() {
            return;
        }
        warn!(
            session = %self.label,
            secs = self.cooldown.as_secs(),
            "pausing this session to ride out throttling"
        );
        tokio::time::sleep(self.cooldown).await;
        info!(session = %self.label, "cooldown over, resuming");
    }
}
