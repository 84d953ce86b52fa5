//! Outbound WebSocket link with automatic reconnection.
//!
//! An [`UpstreamLink`] owns one upstream session at a time: it dials, replays
//! the handler's handshake, hands every text frame to an [`UpstreamHandler`]
//! and, when the session ends, waits out a [`Backoff`] before dialing again.
//! Cancelling the token stops both the session and the wait.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use arbwatch_telemetry::Metrics;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{RelayError, RelayResult};

/// Callbacks for one upstream feed.
///
/// Handlers are invoked from the link task only; they must not block.
pub trait UpstreamHandler: Send + Sync {
    /// Label used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Text frames to send immediately after each (re)connect.
    fn handshake(&self) -> Vec<String> {
        Vec::new()
    }

    fn on_connected(&self) {}

    fn on_text(&self, text: &str);

    fn on_disconnected(&self) {}
}

/// Retry schedule between sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// Upper bound of the random extra delay.
    pub jitter: Duration,
    /// Consecutive failures tolerated before giving up; 0 retries forever.
    pub max_attempts: u32,
}

impl Backoff {
    /// `base * 2^(attempt-1)`, capped at `max`, without jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1u32 << doublings).min(self.max)
    }

    /// [`Backoff::delay`] plus a random share of `jitter`.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        self.delay(attempt) + random_below(self.jitter)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
            max_attempts: 0,
        }
    }
}

/// Default bound on TCP connect plus WebSocket handshake.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub url: String,
    pub backoff: Backoff,
    /// A dial that has not completed the handshake by then counts as failed.
    pub dial_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            backoff: Backoff::default(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

/// Lifecycle of an [`UpstreamLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Dialing,
    Live,
    /// Waiting before the next dial.
    BackingOff,
}

/// Keeps one upstream connected until cancelled.
pub struct UpstreamLink<H> {
    config: UpstreamConfig,
    handler: H,
    state: RwLock<LinkState>,
    failures: AtomicU32,
    cancel: CancellationToken,
}

impl<H: UpstreamHandler> UpstreamLink<H> {
    pub fn new(config: UpstreamConfig, handler: H, cancel: CancellationToken) -> Self {
        Self {
            config,
            handler,
            state: RwLock::new(LinkState::Idle),
            failures: AtomicU32::new(0),
            cancel,
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.read()
    }

    /// Consecutive failed sessions since the last one that went live.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn stop(&self) {
        info!(upstream = self.handler.name(), "Upstream stop requested");
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn set_state(&self, state: LinkState) {
        *self.state.write() = state;
    }

    /// Run sessions back to back until cancelled.
    ///
    /// Returns an error only once `Backoff::max_attempts` is reached.
    pub async fn run(&self) -> RelayResult<()> {
        let name = self.handler.name();
        let mut outage_reported = false;

        while !self.is_stopped() {
            self.set_state(LinkState::Dialing);
            let outcome = self.session().await;

            // A session that went live ends the current outage.
            let went_live = self.state() == LinkState::Live;
            self.set_state(LinkState::Idle);
            if went_live {
                self.handler.on_disconnected();
                Metrics::upstream_disconnected(name);
                self.failures.store(0, Ordering::Relaxed);
                outage_reported = false;
            }

            match outcome {
                Ok(()) => info!(upstream = name, "Upstream session ended"),
                Err(e) if !outage_reported => {
                    warn!(
                        upstream = name,
                        url = %self.config.url,
                        error = %e,
                        "Upstream unavailable, will keep retrying"
                    );
                    outage_reported = true;
                }
                Err(e) => debug!(upstream = name, error = %e, "Upstream still unavailable"),
            }

            if self.is_stopped() {
                break;
            }

            let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
            if self.config.backoff.exhausted(failures) {
                error!(upstream = name, failures, "Giving up on upstream");
                return Err(RelayError::GaveUp {
                    upstream: name,
                    attempts: failures,
                });
            }

            let wait = self.config.backoff.delay_with_jitter(failures);
            self.set_state(LinkState::BackingOff);
            Metrics::upstream_reconnect(name);
            debug!(upstream = name, failures, wait_ms = wait.as_millis() as u64, "Backing off");

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = self.cancel.cancelled() => break,
            }
        }

        self.set_state(LinkState::Idle);
        debug!(upstream = name, "Upstream link stopped");
        Ok(())
    }

    /// One dial plus message loop. `Ok` means the peer hung up or we were
    /// cancelled.
    async fn session(&self) -> RelayResult<()> {
        let name = self.handler.name();
        debug!(upstream = name, url = %self.config.url, "Dialing upstream");

        let dial = tokio::time::timeout(
            self.config.dial_timeout,
            connect_async_tls_with_config(&self.config.url, None, true, None),
        );
        let (stream, _) = tokio::select! {
            () = self.cancel.cancelled() => {
                debug!(upstream = name, "Dial abandoned on shutdown");
                return Ok(());
            }
            dialed = dial => dialed.map_err(|_| RelayError::DialTimeout(self.config.dial_timeout))??,
        };
        let (mut sink, mut frames) = stream.split();

        self.set_state(LinkState::Live);
        self.failures.store(0, Ordering::Relaxed);
        Metrics::upstream_connected(name);
        self.handler.on_connected();

        for request in self.handler.handshake() {
            sink.send(Message::Text(request)).await?;
        }

        loop {
            let frame = tokio::select! {
                () = self.cancel.cancelled() => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        debug!(upstream = name, error = %e, "Close frame not delivered");
                    }
                    return Ok(());
                }
                frame = frames.next() => frame,
            };

            match frame {
                None => return Ok(()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Text(text))) => self.handler.on_text(&text),
                Some(Ok(Message::Ping(payload))) => sink.send(Message::Pong(payload)).await?,
                Some(Ok(Message::Close(close))) => return Err(closed(close)),
                Some(Ok(_)) => {}
            }
        }
    }
}

fn closed(frame: Option<CloseFrame<'_>>) -> RelayError {
    match frame {
        Some(frame) => RelayError::Closed {
            code: frame.code.into(),
            reason: frame.reason.into_owned(),
        },
        None => RelayError::Closed {
            code: 1005,
            reason: String::new(),
        },
    }
}

/// Roughly uniform duration in `0..bound`, seeded from the clock.
fn random_below(bound: Duration) -> Duration {
    use std::time::{SystemTime, UNIX_EPOCH};

    let bound_ms = bound.as_millis() as u64;
    if bound_ms == 0 {
        return Duration::ZERO;
    }
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| u64::from(since.subsec_nanos()));
    Duration::from_millis(seed % bound_ms)
}
