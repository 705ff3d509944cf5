//! The TCP transport under the RCON engine: connect with timeout
//! classification, the write half behind a single writer lock, and the
//! reconnect backoff schedule.
//!
//! The connection lifecycle is:
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Connected
//!      ^                                             |
//!      |------------- Reconnecting <-----------------|
//! ```
//!
//! plus `Destroyed` as the terminal state `destroy()` forces from anywhere.
//! Socket errors only trigger the reconnect machinery once `Connected` was
//! reached; earlier failures propagate to the caller of `connect()`.

use std::io;
use std::time::Duration;

use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::config::ReconnectConfig;
use crate::error::ConnectionError;

/// The observable lifecycle of the RCON channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Reconnecting,
    Destroyed,
}

/// Opens the TCP stream with the configured timeout and classifies the
/// failure modes the reconnect logic needs to tell apart.
pub(crate) async fn open_stream(
    addr: &str,
    timeout: Duration,
) -> Result<(OwnedReadHalf, OwnedWriteHalf), ConnectionError> {
    let attempt = tokio::time::timeout(timeout, TcpStream::connect(addr)).await;
    match attempt {
        Err(_) => Err(ConnectionError::ConnectTimeout {
            addr: addr.to_owned(),
        }),
        Ok(Err(err)) if err.kind() == io::ErrorKind::ConnectionRefused => {
            Err(ConnectionError::Refused {
                addr: addr.to_owned(),
                source: err,
            })
        }
        Ok(Err(err)) => Err(ConnectionError::Socket(err)),
        Ok(Ok(stream)) => {
            // Command frames are tiny; waiting for Nagle only adds latency.
            if let Err(err) = stream.set_nodelay(true) {
                tracing::debug!(?err, "Could not disable Nagle on the rcon socket.");
            }
            Ok(stream.into_split())
        }
    }
}

/// The write side of the transport. There is exactly one writer task at a
/// time, which keeps a command's two-frame write atomic on the wire.
pub(crate) struct Writer {
    half: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self {
            half: tokio::sync::Mutex::new(None),
        }
    }

    pub(crate) async fn install(&self, half: OwnedWriteHalf) {
        *self.half.lock().await = Some(half);
    }

    /// Drops the write half, which closes our sending direction. Idempotent.
    pub(crate) async fn close(&self) {
        if let Some(mut half) = self.half.lock().await.take() {
            let _ = half.shutdown().await;
        }
    }

    pub(crate) async fn write(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let mut guard = self.half.lock().await;
        let Some(half) = guard.as_mut() else {
            return Err(ConnectionError::NotConnected);
        };
        half.write_all(bytes)
            .await
            .map_err(ConnectionError::Socket)?;
        half.flush().await.map_err(ConnectionError::Socket)
    }
}

/// The reconnect delay schedule: exponential growth capped at the maximum,
/// with symmetric jitter on every emitted delay. `reset()` is called when a
/// connection reaches the authenticated state again.
pub(crate) struct Backoff {
    config: ReconnectConfig,
    next: Duration,
    attempts: u32,
}

impl Backoff {
    pub(crate) fn new(config: ReconnectConfig) -> Self {
        let next = config.initial_delay();
        Self {
            config,
            next,
            attempts: 0,
        }
    }

    /// The delay before the next attempt, or `None` once the configured
    /// attempt budget (0 = unlimited) is spent.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts != 0 && self.attempts >= self.config.max_attempts {
            return None;
        }
        self.attempts += 1;
        let base = self.next;
        self.next = Duration::min(base.mul_f64(self.config.multiplier), self.config.max_delay());
        Some(self.jittered(base))
    }

    pub(crate) fn reset(&mut self) {
        self.next = self.config.initial_delay();
        self.attempts = 0;
    }

    fn jittered(&self, base: Duration) -> Duration {
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }
        let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
        base.mul_f64(factor.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter: f64, max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            enabled: true,
            initial_delay_ms: 1_000,
            max_delay_ms: 8_000,
            multiplier: 2.0,
            jitter,
            max_attempts,
        }
    }

    #[test]
    fn delays_grow_monotonically_and_cap_without_jitter() {
        let mut backoff = Backoff::new(config(0.0, 0));
        let delays: Vec<Duration> = (0..6).map(|_| backoff.next_delay().unwrap()).collect();
        assert_eq!(delays[0], Duration::from_millis(1_000));
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert_eq!(delays[5], Duration::from_millis(8_000));
    }

    #[test]
    fn attempt_budget_is_enforced_and_reset() {
        let mut backoff = Backoff::new(config(0.0, 2));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1_000)));
    }

    #[test]
    fn jitter_stays_within_the_symmetric_band() {
        let mut backoff = Backoff::new(config(0.5, 0));
        let first = backoff.next_delay().unwrap();
        assert!(first >= Duration::from_millis(500), "{first:?}");
        assert!(first <= Duration::from_millis(1_500), "{first:?}");
    }
}
