//! The RCON engine: one authenticated connection, sequence allocation,
//! multiplexed command dispatch with multi-frame response assembly, chat
//! frame demultiplexing, heartbeat and automatic reconnection.
//!
//! The engine task is the only writer of the pending-command map, which makes
//! aborting every in-flight command on a connection loss a single pass. Chat
//! frames are unsolicited and never complete a pending command; they go to
//! the event bus instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use bytes::{Buf, BytesMut};
use rcon_protocol::{AUTH_FAILED, CHAT_VALUE, Decoded, END, Frame, MID, RESPONSE_VALUE};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::config::RconConfig;
use crate::error::{CommandError, ConnectionError};
use crate::events::{Event, EventKind};
use crate::rcon::connection::{Backoff, ConnectionState, Writer, open_stream};
use crate::rcon::parsers;

/// One registered command waiting for its END frame.
struct Pending {
    command: String,
    sent_at: Instant,
    accumulator: BytesMut,
    completion: oneshot::Sender<Result<String, CommandError>>,
}

/// The auth handshake waiter; present only between sending the AUTH frame and
/// receiving the AUTH_RESPONSE.
struct AuthWaiter {
    seq: u16,
    completion: oneshot::Sender<bool>,
}

struct EngineInner {
    next_seq: u16,
    pending: HashMap<u16, Pending>,
    auth: Option<AuthWaiter>,
}

impl EngineInner {
    /// 16-bit sequence counter starting at 1 and wrapping back to 1; 0 is
    /// never handed out so a zeroed count can never match a command.
    fn alloc_seq(&mut self) -> u16 {
        let seq = self.next_seq;
        self.next_seq = if seq == u16::MAX { 1 } else { seq + 1 };
        seq
    }
}

/// Notices the read task sends when its socket ends. The generation guards
/// against a stale notice from a connection that was already replaced.
enum Notice {
    ReadClosed {
        generation: u64,
        error: Option<std::io::Error>,
    },
}

struct TaskHandles {
    read: Option<JoinHandle<()>>,
    supervisor: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

/// The engine. Cheap to share; all methods take `&self`.
pub struct RconEngine {
    config: RconConfig,
    bus: EventBus,
    writer: Writer,
    inner: std::sync::Mutex<EngineInner>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    notice_tx: mpsc::UnboundedSender<Notice>,
    notice_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Notice>>>,
    tasks: std::sync::Mutex<TaskHandles>,
    generation: AtomicU64,
    auto_reconnect: AtomicBool,
    destroyed: AtomicBool,
}

impl RconEngine {
    pub fn new(config: RconConfig, bus: EventBus) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            config,
            bus,
            writer: Writer::new(),
            inner: std::sync::Mutex::new(EngineInner {
                next_seq: 1,
                pending: HashMap::new(),
                auth: None,
            }),
            state_tx,
            state_rx,
            notice_tx,
            notice_rx: std::sync::Mutex::new(Some(notice_rx)),
            tasks: std::sync::Mutex::new(TaskHandles {
                read: None,
                supervisor: None,
                heartbeat: None,
            }),
            generation: AtomicU64::new(0),
            auto_reconnect: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// A receiver that observes every lifecycle transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Connects and authenticates. Failures before the first authenticated
    /// state propagate here and schedule no reconnect; afterwards the
    /// supervisor owns the connection.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ConnectionError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ConnectionError::NotConnected);
        }
        self.auto_reconnect
            .store(self.config.reconnect.enabled, Ordering::SeqCst);
        self.establish().await.inspect_err(|_| {
            self.set_state(ConnectionState::Disconnected);
        })?;
        self.ensure_supervisor();
        self.ensure_heartbeat();
        self.bus
            .emit(&Event::lifecycle(EventKind::RconConnected, None));
        Ok(())
    }

    /// Closes the connection and disables automatic reconnection. Pending
    /// commands fail with `Aborted`.
    pub async fn disconnect(&self) {
        self.auto_reconnect.store(false, Ordering::SeqCst);
        self.teardown_io().await;
        self.fail_all_pending("disconnected");
        if self.state() != ConnectionState::Destroyed {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Forcible, idempotent teardown. Every waiter is failed fast and no
    /// reconnect can be scheduled afterwards.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.auto_reconnect.store(false, Ordering::SeqCst);
        {
            let mut tasks = self.tasks.lock().expect("task lock poisoned");
            for handle in [
                tasks.read.take(),
                tasks.supervisor.take(),
                tasks.heartbeat.take(),
            ]
            .into_iter()
            .flatten()
            {
                handle.abort();
            }
        }
        self.teardown_io().await;
        self.fail_all_pending("destroyed");
        self.set_state(ConnectionState::Destroyed);
    }

    /// Executes a raw command and returns the full response body. Retries
    /// recoverable failures (timeout, transport rejection) up to the
    /// configured count; aborts and auth errors surface immediately.
    pub async fn execute(&self, command: &str) -> Result<String, CommandError> {
        let retries = self.config.command.retries;
        let mut attempt = 0;
        loop {
            let result = self.execute_once(command).await;
            let (recoverable, transport) = match &result {
                Err(CommandError::Timeout) => (true, false),
                Err(CommandError::Failed(_)) => (true, true),
                Err(CommandError::Connection(ConnectionError::NotConnected)) => (true, true),
                _ => (false, false),
            };
            if !recoverable || attempt >= retries {
                return result;
            }
            attempt += 1;
            tracing::debug!(command, attempt, "Retrying rcon command.");
            if transport && !self.wait_for_connected().await {
                return result;
            }
        }
    }

    async fn execute_once(&self, command: &str) -> Result<String, CommandError> {
        if self.state() != ConnectionState::Connected {
            return Err(CommandError::Connection(ConnectionError::NotConnected));
        }
        let (seq, receiver) = {
            let mut inner = self.inner.lock().expect("engine lock poisoned");
            let seq = inner.alloc_seq();
            let (completion, receiver) = oneshot::channel();
            inner.pending.insert(
                seq,
                Pending {
                    command: command.to_owned(),
                    sent_at: Instant::now(),
                    accumulator: BytesMut::new(),
                    completion,
                },
            );
            (seq, receiver)
        };
        let bytes = match rcon_protocol::encode_command(seq, command) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.remove_pending(seq);
                return Err(CommandError::Encode(err));
            }
        };
        if let Err(err) = self.writer.write(&bytes).await {
            self.remove_pending(seq);
            return Err(CommandError::Failed(err.to_string()));
        }
        match tokio::time::timeout(self.config.command.timeout(), receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CommandError::Aborted("engine torn down".to_owned())),
            Err(_) => {
                // Frames that still arrive for this sequence are discarded.
                self.remove_pending(seq);
                Err(CommandError::Timeout)
            }
        }
    }

    /// Brings the transport up and authenticates. Walks
    /// Connecting -> Authenticating -> Connected.
    async fn establish(self: &Arc<Self>) -> Result<(), ConnectionError> {
        self.set_state(ConnectionState::Connecting);
        let (read_half, write_half) =
            open_stream(&self.config.addr(), self.config.connect_timeout()).await?;
        self.writer.install(write_half).await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let read_task = tokio::spawn(read_loop(self.clone(), read_half, generation));
        {
            let mut tasks = self.tasks.lock().expect("task lock poisoned");
            if let Some(old) = tasks.read.replace(read_task) {
                old.abort();
            }
        }
        self.set_state(ConnectionState::Authenticating);
        match self.authenticate().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(err) => {
                self.teardown_io().await;
                Err(err)
            }
        }
    }

    async fn authenticate(&self) -> Result<(), ConnectionError> {
        let (seq, receiver) = {
            let mut inner = self.inner.lock().expect("engine lock poisoned");
            let seq = inner.alloc_seq();
            let (completion, receiver) = oneshot::channel();
            inner.auth = Some(AuthWaiter { seq, completion });
            (seq, receiver)
        };
        let bytes = rcon_protocol::encode_auth(seq, &self.config.password).map_err(|_| {
            ConnectionError::Socket(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "password does not fit a frame",
            ))
        })?;
        self.writer.write(&bytes).await?;
        match tokio::time::timeout(self.config.connect_timeout(), receiver).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(ConnectionError::AuthFailed),
            // The waiter was dropped: the socket went away mid-handshake.
            Ok(Err(_)) => Err(ConnectionError::Socket(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "connection closed during authentication",
            ))),
            Err(_) => {
                self.inner.lock().expect("engine lock poisoned").auth = None;
                Err(ConnectionError::AuthTimeout)
            }
        }
    }

    /// Pulls every complete frame off the head of the read buffer. The stub
    /// probe runs before the decoder so the 21-byte server bug never reaches
    /// it; malformed heads skip one byte and resynchronize.
    pub(crate) fn drain_frames(&self, buf: &mut BytesMut) {
        loop {
            if let Some(skip) = rcon_protocol::broken_stub_len(buf) {
                tracing::debug!("Skipping broken 21-byte response stub.");
                buf.advance(skip);
                continue;
            }
            match rcon_protocol::decode(buf) {
                Decoded::Incomplete { .. } => break,
                Decoded::Frame { frame, consumed } => {
                    buf.advance(consumed);
                    self.handle_frame(frame);
                }
                Decoded::Malformed(err @ rcon_protocol::DecodeError::SizeExceeded(size)) => {
                    // An oversized claim drops the whole claimed frame.
                    let claimed = 4 + size as usize;
                    tracing::warn!(%err, "Dropping oversized frame.");
                    buf.advance(claimed.min(buf.len()));
                }
                Decoded::Malformed(err) => {
                    tracing::warn!(%err, "Malformed frame at buffer head, skipping one byte.");
                    buf.advance(1);
                }
            }
        }
    }

    fn handle_frame(&self, frame: Frame) {
        match frame.kind {
            CHAT_VALUE => {
                // Unsolicited; parsed and published, never completes a command.
                if let Some(event) = parsers::parse_chat_frame(&frame.body_text()) {
                    self.bus.emit(&event);
                }
            }
            RESPONSE_VALUE => self.handle_response(frame),
            // Type 2 from the server is the AUTH_RESPONSE.
            rcon_protocol::AUTH_RESPONSE => self.handle_auth_response(frame),
            other => {
                tracing::trace!(kind = other, "Discarding frame of unknown type.");
            }
        }
    }

    fn handle_auth_response(&self, frame: Frame) {
        let waiter = {
            let mut inner = self.inner.lock().expect("engine lock poisoned");
            inner.auth.take()
        };
        let Some(waiter) = waiter else {
            tracing::trace!("AUTH_RESPONSE without a pending handshake.");
            return;
        };
        if frame.id != AUTH_FAILED && frame.count != waiter.seq && frame.id != waiter.seq as i16 {
            tracing::debug!(
                count = frame.count,
                expected = waiter.seq,
                "AUTH_RESPONSE sequence mismatch, accepting anyway."
            );
        }
        let _ = waiter.completion.send(frame.id != AUTH_FAILED);
    }

    fn handle_response(&self, frame: Frame) {
        let completed = {
            let mut inner = self.inner.lock().expect("engine lock poisoned");
            // Some server builds acknowledge the AUTH frame with an empty
            // RESPONSE_VALUE before the real AUTH_RESPONSE; discard it.
            if let Some(auth) = &inner.auth
                && frame.count == auth.seq
            {
                return;
            }
            match frame.id {
                MID => {
                    if let Some(pending) = inner.pending.get_mut(&frame.count) {
                        pending.accumulator.extend_from_slice(&frame.body);
                    } else {
                        tracing::trace!(count = frame.count, "MID frame without pending command.");
                    }
                    None
                }
                END => inner.pending.remove(&frame.count).map(|mut pending| {
                    pending.accumulator.extend_from_slice(&frame.body);
                    pending
                }),
                other => {
                    tracing::trace!(id = other, "RESPONSE_VALUE with unexpected id.");
                    None
                }
            }
        };
        if let Some(pending) = completed {
            let body = String::from_utf8_lossy(&pending.accumulator).into_owned();
            tracing::trace!(
                command = pending.command.as_str(),
                elapsed_ms = pending.sent_at.elapsed().as_millis() as u64,
                "Command completed."
            );
            let _ = pending.completion.send(Ok(body));
        }
    }

    fn remove_pending(&self, seq: u16) {
        self.inner
            .lock()
            .expect("engine lock poisoned")
            .pending
            .remove(&seq);
    }

    /// Fails every pending command and the auth waiter in one pass.
    fn fail_all_pending(&self, reason: &str) {
        let (pending, auth) = {
            let mut inner = self.inner.lock().expect("engine lock poisoned");
            let pending: Vec<Pending> = inner.pending.drain().map(|(_, p)| p).collect();
            (pending, inner.auth.take())
        };
        for entry in pending {
            let _ = entry
                .completion
                .send(Err(CommandError::Aborted(reason.to_owned())));
        }
        // Dropping the auth waiter makes the handshake fail as a socket loss.
        drop(auth);
    }

    async fn teardown_io(&self) {
        self.writer.close().await;
        let read = {
            let mut tasks = self.tasks.lock().expect("task lock poisoned");
            tasks.read.take()
        };
        if let Some(handle) = read {
            handle.abort();
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                tracing::debug!(?state, "Rcon connection state change.");
                *current = state;
                true
            }
        });
    }

    async fn wait_for_connected(&self) -> bool {
        let mut rx = self.state_rx.clone();
        let limit = self.config.command.timeout();
        tokio::time::timeout(limit, async move {
            loop {
                if *rx.borrow() == ConnectionState::Connected {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    fn ensure_supervisor(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().expect("task lock poisoned");
        if tasks.supervisor.is_some() {
            return;
        }
        let receiver = self
            .notice_rx
            .lock()
            .expect("notice lock poisoned")
            .take();
        let Some(mut receiver) = receiver else {
            return;
        };
        let engine = self.clone();
        tasks.supervisor = Some(tokio::spawn(async move {
            // One schedule across outages; reset whenever a connection
            // reaches the authenticated state again.
            let mut backoff = Backoff::new(engine.config.reconnect.clone());
            while let Some(Notice::ReadClosed { generation, error }) = receiver.recv().await {
                if generation != engine.generation.load(Ordering::SeqCst)
                    || engine.destroyed.load(Ordering::SeqCst)
                {
                    continue;
                }
                engine.on_connection_lost(error, &mut backoff).await;
            }
        }));
    }

    async fn on_connection_lost(
        self: &Arc<Self>,
        error: Option<std::io::Error>,
        backoff: &mut Backoff,
    ) {
        match &error {
            Some(err) => tracing::warn!(%err, "Rcon connection lost."),
            None => tracing::info!("Rcon connection closed by server."),
        }
        self.teardown_io().await;
        self.fail_all_pending("connection lost");
        self.bus
            .emit(&Event::lifecycle(EventKind::RconDisconnected, error.map(|e| e.to_string())));
        if !self.auto_reconnect.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        self.set_state(ConnectionState::Reconnecting);
        loop {
            let Some(delay) = backoff.next_delay() else {
                tracing::error!("Reconnect attempt budget exhausted, giving up.");
                self.bus.emit(&Event::lifecycle(
                    EventKind::RconError,
                    Some("reconnect attempts exhausted".to_owned()),
                ));
                self.set_state(ConnectionState::Disconnected);
                // A later manual connect starts from a fresh schedule.
                backoff.reset();
                return;
            };
            tokio::time::sleep(delay).await;
            if self.destroyed.load(Ordering::SeqCst) {
                return;
            }
            match self.establish().await {
                Ok(()) => {
                    tracing::info!("Rcon reconnected.");
                    backoff.reset();
                    self.bus
                        .emit(&Event::lifecycle(EventKind::RconConnected, None));
                    return;
                }
                Err(err) if err.is_recoverable() => {
                    tracing::warn!(%err, "Reconnect attempt failed.");
                    self.set_state(ConnectionState::Reconnecting);
                }
                Err(err) => {
                    // Wrong credentials cannot heal on their own.
                    tracing::error!(%err, "Reconnect failed terminally.");
                    self.bus
                        .emit(&Event::lifecycle(EventKind::RconError, Some(err.to_string())));
                    self.set_state(ConnectionState::Disconnected);
                    backoff.reset();
                    return;
                }
            }
        }
    }

    fn ensure_heartbeat(self: &Arc<Self>) {
        if !self.config.heartbeat.enabled {
            return;
        }
        let mut tasks = self.tasks.lock().expect("task lock poisoned");
        if tasks.heartbeat.is_some() {
            return;
        }
        let engine = self.clone();
        tasks.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.heartbeat.interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if engine.destroyed.load(Ordering::SeqCst) {
                    return;
                }
                if engine.state() != ConnectionState::Connected {
                    continue;
                }
                // Failures are logged only; the transport owns reconnection.
                if let Err(err) = engine.execute_once(&engine.config.heartbeat.command).await {
                    tracing::warn!(%err, "Heartbeat command failed.");
                }
            }
        }));
    }
}

/// Reads socket bytes into the frame buffer and lets the engine drain it.
/// Ends with a notice that carries the connection generation so a stale
/// socket cannot trigger a reconnect of its successor.
async fn read_loop(engine: Arc<RconEngine>, mut half: OwnedReadHalf, generation: u64) {
    let mut buf = BytesMut::with_capacity(16 * 1024);
    let error = loop {
        match half.read_buf(&mut buf).await {
            Ok(0) => break None,
            Ok(_) => engine.drain_frames(&mut buf),
            Err(err) => break Some(err),
        }
    };
    let _ = engine.notice_tx.send(Notice::ReadClosed { generation, error });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommandConfig, HeartbeatConfig, ReconnectConfig};

    fn test_config() -> RconConfig {
        RconConfig {
            host: "127.0.0.1".to_owned(),
            port: 0,
            password: "pw".to_owned(),
            connect_timeout_ms: 1_000,
            reconnect: ReconnectConfig::default(),
            command: CommandConfig::default(),
            heartbeat: HeartbeatConfig {
                enabled: false,
                ..HeartbeatConfig::default()
            },
        }
    }

    #[tokio::test]
    async fn sequence_wraps_to_one_never_zero() {
        let engine = RconEngine::new(test_config(), EventBus::new());
        let mut inner = engine.inner.lock().unwrap();
        inner.next_seq = u16::MAX;
        assert_eq!(inner.alloc_seq(), u16::MAX);
        assert_eq!(inner.alloc_seq(), 1);
        assert_eq!(inner.alloc_seq(), 2);
    }

    #[tokio::test]
    async fn assembles_split_responses_by_count() {
        let engine = RconEngine::new(test_config(), EventBus::new());
        let (tx, rx) = oneshot::channel();
        engine.inner.lock().unwrap().pending.insert(
            7,
            Pending {
                command: "ListPlayers".to_owned(),
                sent_at: Instant::now(),
                accumulator: BytesMut::new(),
                completion: tx,
            },
        );

        let mut buf = BytesMut::new();
        for (id, body) in [(MID, "ID: 1\n"), (MID, "ID: 2\n"), (END, "")] {
            buf.extend_from_slice(
                &rcon_protocol::encode(RESPONSE_VALUE, id, 7, body.as_bytes()).unwrap(),
            );
        }
        engine.drain_frames(&mut buf);
        assert!(buf.is_empty());
        assert_eq!(rx.await.unwrap().unwrap(), "ID: 1\nID: 2\n");
    }

    #[tokio::test]
    async fn frames_for_other_counts_never_leak_across_commands() {
        let engine = RconEngine::new(test_config(), EventBus::new());
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        {
            let mut inner = engine.inner.lock().unwrap();
            for (seq, tx) in [(1u16, tx_a), (2u16, tx_b)] {
                inner.pending.insert(
                    seq,
                    Pending {
                        command: String::new(),
                        sent_at: Instant::now(),
                        accumulator: BytesMut::new(),
                        completion: tx,
                    },
                );
            }
        }
        // Server answers the second command first, interleaved.
        let mut buf = BytesMut::new();
        for (id, count, body) in [
            (MID, 2u16, "beta"),
            (MID, 1, "alpha"),
            (END, 2, ""),
            (END, 1, ""),
        ] {
            buf.extend_from_slice(
                &rcon_protocol::encode(RESPONSE_VALUE, id, count, body.as_bytes()).unwrap(),
            );
        }
        engine.drain_frames(&mut buf);
        assert_eq!(rx_b.await.unwrap().unwrap(), "beta");
        assert_eq!(rx_a.await.unwrap().unwrap(), "alpha");
    }

    #[tokio::test]
    async fn chat_frames_never_satisfy_pending_commands() {
        let engine = RconEngine::new(test_config(), EventBus::new());
        let chats = Arc::new(std::sync::Mutex::new(Vec::new()));
        let chats_clone = chats.clone();
        engine
            .bus
            .subscribe(EventKind::ChatMessage, move |event| {
                chats_clone.lock().unwrap().push(event.clone());
            })
            .unwrap();
        let (tx, mut rx) = oneshot::channel();
        engine.inner.lock().unwrap().pending.insert(
            3,
            Pending {
                command: String::new(),
                sent_at: Instant::now(),
                accumulator: BytesMut::new(),
                completion: tx,
            },
        );
        let body = "[ChatAll] [Online IDs:EOS: 0002a10186d9414496bf20d22d3860ba steam: 76561198012345678] Yuri : hello";
        let mut buf = BytesMut::from(
            &rcon_protocol::encode(CHAT_VALUE, MID, 3, body.as_bytes()).unwrap()[..],
        );
        engine.drain_frames(&mut buf);
        assert_eq!(chats.lock().unwrap().len(), 1);
        assert!(rx.try_recv().is_err());
        assert!(engine.inner.lock().unwrap().pending.contains_key(&3));
    }

    #[tokio::test]
    async fn broken_stub_is_skipped_before_decoding() {
        let engine = RconEngine::new(test_config(), EventBus::new());
        let (tx, rx) = oneshot::channel();
        engine.inner.lock().unwrap().pending.insert(
            9,
            Pending {
                command: String::new(),
                sent_at: Instant::now(),
                accumulator: BytesMut::new(),
                completion: tx,
            },
        );
        let mut buf = BytesMut::new();
        let mut stub = vec![0u8; rcon_protocol::BROKEN_STUB_LEN];
        stub[..4].copy_from_slice(&10u32.to_le_bytes());
        stub[15] = 1;
        buf.extend_from_slice(&stub);
        buf.extend_from_slice(&rcon_protocol::encode(RESPONSE_VALUE, END, 9, b"ok").unwrap());
        engine.drain_frames(&mut buf);
        assert_eq!(rx.await.unwrap().unwrap(), "ok");
    }

    #[tokio::test]
    async fn abort_fails_every_pending_waiter() {
        let engine = RconEngine::new(test_config(), EventBus::new());
        let (tx, rx) = oneshot::channel();
        engine.inner.lock().unwrap().pending.insert(
            4,
            Pending {
                command: String::new(),
                sent_at: Instant::now(),
                accumulator: BytesMut::new(),
                completion: tx,
            },
        );
        engine.fail_all_pending("connection lost");
        assert!(matches!(
            rx.await.unwrap(),
            Err(CommandError::Aborted(reason)) if reason == "connection lost"
        ));
        assert!(engine.inner.lock().unwrap().pending.is_empty());
    }
}
