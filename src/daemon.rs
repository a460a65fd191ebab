//! The long-running bridge daemon.
//!
//! Maintains a session with OBS, reconciles events and polls into the
//! canonical snapshot, and publishes it to the state file. Connection loss
//! never kills the process: the supervisor walks an explicit connection
//! state machine with exponential backoff.

use std::time::Duration;

use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ObsConfig;
use crate::error::{Error, Result};
use crate::paths;
use crate::protocol::{Event, ProtocolClient, Transport};
use crate::publisher::StatePublisher;
use crate::reconcile::Reconciler;

/// Daemon connection lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Identifying,
    Connected,
    Reconnecting { attempt: u32, next_delay: Duration },
    ShuttingDown,
}

/// The OBS bridge daemon.
pub struct Daemon {
    config: ObsConfig,
    conn: ConnectionState,
    reconciler: Reconciler,
    publisher: StatePublisher,
}

impl Daemon {
    /// Creates a new daemon with the given configuration.
    #[must_use]
    pub fn new(config: ObsConfig) -> Self {
        let publisher = StatePublisher::new(
            paths::state_file(),
            Duration::from_millis(config.debounce_ms),
        );
        Self {
            config,
            conn: ConnectionState::Disconnected,
            reconciler: Reconciler::new(),
            publisher,
        }
    }

    fn enter(&mut self, next: ConnectionState) {
        debug!(from = ?self.conn, to = ?next, "connection state");
        self.conn = next;
    }

    /// Runs the daemon until a shutdown signal or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error only when retrying is pointless: an auth rejection
    /// without `retry_on_auth_failure`, or `max_reconnect_attempts`
    /// exceeded. Everything else feeds the reconnect loop.
    pub async fn run(&mut self) -> Result<()> {
        // Publish a disconnected snapshot before the first attempt so the
        // shell has something to read immediately.
        self.reconciler.state.touch();
        if let Err(e) = self.publisher.write_now(&self.reconciler.state) {
            warn!(error = %e, "failed to write initial state");
        }

        info!(
            url = %self.config.websocket_url(),
            state_file = %paths::state_file().display(),
            "starting OBS daemon"
        );

        let mut attempt = 0u32;

        loop {
            match self.session().await {
                Ok(()) => {
                    self.enter(ConnectionState::ShuttingDown);
                    info!("shutting down");
                    self.publish_disconnected(None);
                    self.enter(ConnectionState::Disconnected);
                    return Ok(());
                }
                Err(e) => {
                    let was_connected = self.reconciler.state.connected;
                    self.publish_disconnected(Some(e.to_string()));

                    if matches!(e, Error::Auth(_)) && !self.config.retry_on_auth_failure {
                        error!(error = %e, "authentication rejected, giving up");
                        return Err(e);
                    }

                    // A lost session starts a fresh backoff sequence.
                    if was_connected {
                        attempt = 0;
                    }
                    attempt += 1;

                    let max = self.config.max_reconnect_attempts;
                    if max > 0 && attempt > max {
                        error!(max_attempts = max, "max reconnection attempts exceeded");
                        return Err(e);
                    }

                    let delay = backoff_delay(&self.config, attempt);
                    self.enter(ConnectionState::Reconnecting {
                        attempt,
                        next_delay: delay,
                    });
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "reconnecting"
                    );

                    tokio::select! {
                        () = sleep(delay) => {}
                        _ = tokio::signal::ctrl_c() => {
                            self.enter(ConnectionState::ShuttingDown);
                            info!("shutdown signal received during backoff");
                            self.publish_disconnected(None);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// One connection lifetime: connect, identify, sync, then the event
    /// loop. Returns `Ok(())` only on a shutdown signal; any error means
    /// the session is over and the supervisor decides what happens next.
    async fn session(&mut self) -> Result<()> {
        self.enter(ConnectionState::Connecting);
        let transport = Transport::connect_timeout(
            &self.config.host,
            self.config.port,
            Duration::from_millis(self.config.request_timeout_ms),
        )
        .await?;

        self.enter(ConnectionState::Identifying);
        let mut client = ProtocolClient::identify(transport, &self.config).await?;

        self.enter(ConnectionState::Connected);
        info!("connected to OBS");

        self.reconciler.set_connected();
        self.initial_sync(&mut client).await?;
        self.reconciler.state.touch();
        if let Err(e) = self.publisher.write_now(&self.reconciler.state) {
            warn!(error = %e, "state write failed");
        }

        let mut ticker = interval(Duration::from_millis(self.config.stats_interval_ms));
        // A slow poll must not queue up extra ticks behind it.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    client.close().await;
                    return Ok(());
                }

                event = client.next_event() => {
                    let event = event?;
                    if matches!(event, Event::ExitStarted) {
                        info!("OBS is shutting down");
                    }
                    self.reconciler.apply_event(&event);
                    self.reconciler.state.touch();
                    self.publisher.schedule(&self.reconciler.state);
                }

                _ = ticker.tick() => {
                    self.reconciler.update_elapsed();
                    if self.config.show_stats {
                        match client.stats().await {
                            Ok(stats) => self.reconciler.set_stats(&stats),
                            // A missed poll never kills the poller.
                            Err(e @ (Error::Timeout(_) | Error::Rejected { .. })) => {
                                warn!(error = %e, "stats poll failed");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    self.reconciler.state.touch();
                    self.publisher.schedule(&self.reconciler.state);
                }

                () = self.publisher.debounce_elapsed() => {
                    if let Err(e) = self.publisher.flush() {
                        warn!(error = %e, "state write failed");
                    }
                }
            }
        }
    }

    /// Fetches the full current state right after identify, through the
    /// same reconciliation path the events use.
    async fn initial_sync(&mut self, client: &mut ProtocolClient) -> Result<()> {
        let recording = client.record_status().await?;
        self.reconciler.apply_record_status(&recording);

        let streaming = client.stream_status().await?;
        self.reconciler.apply_stream_status(&streaming);

        let scene_list = client.scene_list().await?;
        self.reconciler
            .set_scenes(scene_list.scenes.into_iter().map(|s| s.scene_name).collect());
        if let Some(current) = scene_list.current_program_scene_name {
            self.reconciler.set_scene(current);
        }

        if self.config.show_stats {
            match client.stats().await {
                Ok(stats) => self.reconciler.set_stats(&stats),
                Err(e @ (Error::Timeout(_) | Error::Rejected { .. })) => {
                    warn!(error = %e, "initial stats fetch failed");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Publishes a disconnected snapshot immediately, bypassing the
    /// debounce. Write failures are logged and absorbed.
    fn publish_disconnected(&mut self, error: Option<String>) {
        self.reconciler.set_disconnected(error);
        self.reconciler.state.touch();
        if let Err(e) = self.publisher.write_now(&self.reconciler.state) {
            warn!(error = %e, "state write failed");
        }
    }
}

/// Exponential backoff: `reconnect_interval * 2^(attempt - 1)`, capped at
/// `max_backoff_ms`.
fn backoff_delay(config: &ObsConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay_ms = config
        .reconnect_interval_ms
        .saturating_mul(1u64 << exp)
        .min(config.max_backoff_ms);
    Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let config = ObsConfig {
            reconnect_interval_ms: 5000,
            max_backoff_ms: 60_000,
            ..Default::default()
        };

        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(5000));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(10_000));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(20_000));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(40_000));
        assert_eq!(backoff_delay(&config, 5), Duration::from_millis(60_000));
        // stays at the cap, no overflow for absurd attempts
        assert_eq!(backoff_delay(&config, 500), Duration::from_millis(60_000));
    }

    #[test]
    fn state_machine_transitions_are_recorded() {
        let mut daemon = Daemon::new(ObsConfig::default());
        assert_eq!(daemon.conn, ConnectionState::Disconnected);

        daemon.enter(ConnectionState::Connecting);
        daemon.enter(ConnectionState::Identifying);
        daemon.enter(ConnectionState::Connected);
        assert_eq!(daemon.conn, ConnectionState::Connected);

        daemon.enter(ConnectionState::Reconnecting {
            attempt: 3,
            next_delay: Duration::from_secs(20),
        });
        match &daemon.conn {
            ConnectionState::Reconnecting { attempt, next_delay } => {
                assert_eq!(*attempt, 3);
                assert_eq!(*next_delay, Duration::from_secs(20));
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }
}
