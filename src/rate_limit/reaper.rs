use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default period between idle-state sweeps
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic background sweep that owns its task until stopped
///
/// The sweep closure returns how many entries it removed. Dropping the reaper
/// aborts the task; [`Reaper::stop`] signals it and waits for it to finish.
pub struct Reaper {
    name: &'static str,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Start a sweep every `period` on the current tokio runtime
    ///
    /// Returns `None` when called outside a runtime; callers can still sweep
    /// by hand.
    pub fn spawn<F>(name: &'static str, period: Duration, sweep: F) -> Option<Self>
    where
        F: Fn() -> usize + Send + 'static,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(reaper = name, "No tokio runtime, background sweep disabled");
                return None;
            }
        };

        let period = period.max(Duration::from_millis(1));
        let (shutdown, mut stopped) = oneshot::channel();

        let handle = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            debug!(reaper = name, period_ms = period.as_millis() as u64, "Started sweep");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = sweep();
                        if removed > 0 {
                            debug!(reaper = name, removed, "Swept idle entries");
                        }
                    }
                    _ = &mut stopped => break,
                }
            }
        });

        Some(Self {
            name,
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Signal the task and wait until it exits
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(reaper = self.name, error = %e, "Sweep task ended abnormally");
            }
        }
        info!(reaper = self.name, "Stopped sweep");
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Reaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaper")
            .field("name", &self.name)
            .field("running", &self.handle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reaper_runs_periodically_and_stops() {
        let sweeps = Arc::new(AtomicUsize::new(0));
        let counter = sweeps.clone();

        let reaper = Reaper::spawn("test", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            0
        })
        .expect("runtime is available");

        tokio::time::sleep(Duration::from_millis(80)).await;
        reaper.stop().await;

        let after_stop = sweeps.load(Ordering::SeqCst);
        assert!(after_stop >= 2, "expected several sweeps, got {}", after_stop);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(sweeps.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_reaper_without_runtime() {
        assert!(Reaper::spawn("orphan", Duration::from_secs(1), || 0).is_none());
    }
}
