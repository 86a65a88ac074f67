//! Connection health checks with exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};

use crate::{HEARTBEAT, HeartbeatConfig, Messenger};

/// Exponentially growing delay between reconnection attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    attempts: u32,
}

impl Backoff {
    /// Start at `initial`, grow by `multiplier` per attempt, never exceed
    /// `max`.
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: multiplier.max(1.0),
            attempts: 0,
        }
    }

    /// Backoff described by `config`.
    pub fn from_config(config: &HeartbeatConfig) -> Self {
        Self::new(config.initial_backoff, config.multiplier, config.max_backoff)
    }

    /// Delay before the next attempt; each call counts as one attempt.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = i32::try_from(self.attempts).unwrap_or(i32::MAX);
        let seconds = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        self.attempts = self.attempts.saturating_add(1);

        Duration::try_from_secs_f64(seconds)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Forget past attempts.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Health of the connection to the inspected page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum ConnectionState {
    /// No probe has completed yet.
    Connecting,
    /// The last probe succeeded.
    Connected,
    /// The last probe failed; `attempt` consecutive failures so far.
    Reconnecting {
        /// Consecutive failed probes.
        attempt: u32,
    },
}

/// Probes the content script with [HEARTBEAT] and publishes the resulting
/// [ConnectionState].
///
/// While connected a probe is sent every `interval`; after a failure the
/// next probe waits for the backoff delay instead. Dropping the monitor
/// stops probing.
pub struct ConnectionMonitor {
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl ConnectionMonitor {
    /// Start probing through `messenger`.
    pub fn start(messenger: Messenger, config: &HeartbeatConfig) -> Self {
        let (sender, state) = watch::channel(ConnectionState::Connecting);
        let task = tokio::spawn(probe(
            messenger,
            sender,
            config.interval,
            Backoff::from_config(config),
        ));
        Self { state, task }
    }

    /// The most recently published state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stop probing.
    pub fn stop(self) {}
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("state", &self.state())
            .finish()
    }
}

async fn probe(
    messenger: Messenger,
    state: watch::Sender<ConnectionState>,
    interval: Duration,
    mut backoff: Backoff,
) {
    loop {
        let (next, delay) = match HEARTBEAT.send(&messenger, ()).await {
            Ok(status) => {
                tracing::trace!(
                    available = status.available,
                    databases = status.database_count,
                    "Heartbeat answered"
                );
                backoff.reset();
                (ConnectionState::Connected, interval)
            }
            Err(error) => {
                let delay = backoff.next_delay();
                tracing::debug!(
                    %error,
                    attempt = backoff.attempts(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Heartbeat failed"
                );
                (
                    ConnectionState::Reconnecting {
                        attempt: backoff.attempts(),
                    },
                    delay,
                )
            }
        };

        state.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });

        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HeartbeatStatus, Router};
    use pretty_assertions::assert_eq;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };
    use testresult::TestResult;

    #[test]
    fn it_grows_the_delay_up_to_the_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(500), 2.0, Duration::from_secs(3));
        let delays: Vec<u128> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();

        assert_eq!(delays, vec![500, 1000, 2000, 3000, 3000]);
        assert_eq!(backoff.attempts(), 5);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn it_never_overflows_after_many_attempts() {
        let mut backoff = Backoff::new(Duration::from_millis(500), 2.0, Duration::from_secs(30));
        for _ in 0..5000 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn it_tracks_connection_health() -> TestResult {
        let router = Router::new();
        let background = router.messenger();
        let healthy = Arc::new(AtomicBool::new(true));

        let _heartbeat = HEARTBEAT
            .on(&background, {
                let healthy = healthy.clone();
                move |_| {
                    let healthy = healthy.load(Ordering::SeqCst);
                    async move {
                        if healthy {
                            Ok(HeartbeatStatus {
                                available: true,
                                database_count: 1,
                            })
                        } else {
                            Err("content script unreachable")
                        }
                    }
                }
            })
            .await?;

        let monitor = ConnectionMonitor::start(background, &HeartbeatConfig::default());
        let mut states = monitor.subscribe();
        assert_eq!(monitor.state(), ConnectionState::Connecting);

        states.changed().await?;
        assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

        healthy.store(false, Ordering::SeqCst);
        states.changed().await?;
        assert_eq!(
            *states.borrow_and_update(),
            ConnectionState::Reconnecting { attempt: 1 }
        );
        states.changed().await?;
        assert_eq!(
            *states.borrow_and_update(),
            ConnectionState::Reconnecting { attempt: 2 }
        );

        healthy.store(true, Ordering::SeqCst);
        states.changed().await?;
        assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

        monitor.stop();
        Ok(())
    }
}
