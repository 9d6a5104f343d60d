use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Outcome of one sleep-or-cancel tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollWait {
    /// The interval elapsed; the caller may issue the next poll.
    Ready,
    /// The authorization window closed before the interval elapsed.
    DeadlineElapsed,
    /// The caller cancelled the flow.
    Cancelled,
}

/// Paces the device-flow poll loop: a fixed interval raced against an
/// absolute deadline and an external cancellation signal.
///
/// The deadline is computed once at construction from the authorization
/// window and is never reset by individual polls.
pub(crate) struct IntervalPoller {
    interval: Duration,
    deadline: Instant,
    cancel: CancellationToken,
}

impl IntervalPoller {
    pub(crate) fn new(interval: Duration, expires_in: Duration, cancel: CancellationToken) -> Self {
        Self {
            interval,
            deadline: Instant::now() + expires_in,
            cancel,
        }
    }

    /// Sleep one interval. Cancellation wins over a pending sleep; a tick
    /// that would end past the deadline is never started, so the caller
    /// cannot poll past the authorization window.
    pub(crate) async fn wait(&self) -> PollWait {
        let tick = Instant::now() + self.interval;
        if tick > self.deadline {
            return PollWait::DeadlineElapsed;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => PollWait::Cancelled,
            _ = sleep_until(tick) => PollWait::Ready,
        }
    }
}
