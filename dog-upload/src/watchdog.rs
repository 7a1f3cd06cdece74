use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Stall detector for a single transfer attempt.
///
/// Cancels `token` when `timeout` elapses without a [`kick`](Watchdog::kick).
/// Every kick re-arms the full timeout. The timer stops when the token is
/// cancelled by anyone else, or when the watchdog is disarmed or dropped.
pub struct Watchdog {
    kick: Arc<Notify>,
    fired: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Watchdog {
    /// Start the timer. Must be called from within a tokio runtime.
    pub fn arm(timeout: Duration, token: CancellationToken) -> Self {
        let kick = Arc::new(Notify::new());
        let fired = Arc::new(AtomicBool::new(false));

        let task = {
            let kick = kick.clone();
            let fired = fired.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        _ = kick.notified() => continue,
                        _ = tokio::time::sleep(timeout) => {
                            debug!(timeout_ms = timeout.as_millis() as u64, "watchdog fired");
                            fired.store(true, Ordering::SeqCst);
                            token.cancel();
                            return;
                        }
                    }
                }
            })
        };

        Self { kick, fired, task }
    }

    /// Record progress and restart the countdown
    pub fn kick(&self) {
        self.kick.notify_one();
    }

    /// Whether the timeout elapsed and the token was cancelled by us
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Stop the timer; returns whether it had fired
    pub fn disarm(self) -> bool {
        self.fired()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_without_ticks() {
        let token = CancellationToken::new();
        let watchdog = Watchdog::arm(Duration::from_millis(500), token.clone());

        tokio::time::sleep(Duration::from_millis(501)).await;

        assert!(token.is_cancelled());
        assert!(watchdog.fired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kicks_rearm_the_timer() {
        let token = CancellationToken::new();
        let watchdog = Watchdog::arm(Duration::from_millis(500), token.clone());

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(400)).await;
            watchdog.kick();
            tokio::task::yield_now().await;
        }
        assert!(!token.is_cancelled());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(watchdog.disarm());
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancel_is_not_a_timeout() {
        let token = CancellationToken::new();
        let watchdog = Watchdog::arm(Duration::from_millis(500), token.clone());

        token.cancel();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(!watchdog.fired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_clears_the_timer() {
        let token = CancellationToken::new();
        drop(Watchdog::arm(Duration::from_millis(500), token.clone()));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!token.is_cancelled());
    }
}
