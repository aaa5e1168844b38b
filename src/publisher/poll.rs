use std::time::Duration;
use tokio::time::Instant;

use crate::config::PollSettings;

/// Wall-clock deadline for a polling loop
///
/// Callers check `expired` before each attempt and `sleep` after each
/// unsuccessful one, so a successful attempt returns without sleeping.
/// A timeout too large to represent as an instant never expires.
#[derive(Debug)]
pub(crate) struct Poller {
    settings: PollSettings,
    deadline: Option<Instant>,
}

impl Poller {
    pub(crate) fn start(settings: PollSettings) -> Self {
        Self {
            settings,
            deadline: Instant::now().checked_add(settings.timeout),
        }
    }

    pub(crate) fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub(crate) async fn sleep(&self) {
        tokio::time::sleep(self.settings.interval).await;
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.settings.timeout
    }
}
