use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Time budget for one operation, together with the token that lets the caller
/// abort it early.
#[derive(Debug, Clone)]
pub struct Deadline {
    budget: Duration,
    started_at: Instant,
    cancel: CancellationToken,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            budget,
            started_at: Instant::now(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// Budgets too large for the clock saturate to a far-future instant.
    pub fn expires_at(&self) -> Instant {
        self.started_at
            .checked_add(self.budget)
            .unwrap_or_else(|| self.started_at + FAR_FUTURE)
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.budget
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
