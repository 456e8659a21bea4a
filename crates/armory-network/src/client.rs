//! Reconnecting transport client.
//!
//! The client spawns one supervisor task per link on the first
//! [`connect`](Transport::connect). The supervisor opens the link, runs the
//! session until the link fails, then waits the reconnect delay and tries
//! again. Concurrent `connect` calls join the attempt in progress instead of
//! opening a second link.
//!
//! Responses are correlated by order: a [`send`](Transport::send) registers a
//! waiter, and the next inbound message resolves the oldest waiter still
//! listening. Inbound messages nobody waits for are published as
//! [`TransportEvent::Data`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use armory_core::config::{SerialEndpointConfig, TcpEndpointConfig, TransportConfig};
use armory_core::constants::{HEARTBEAT_ACK_PAYLOADS, HEARTBEAT_PAYLOAD};
use armory_core::{ConnectionStatus, TransportKind};
use armory_protocol::{MessageCodec, is_active_report_frame};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::link::{LinkReader, LinkTarget, LinkWriter};
use crate::{Result, Transport, TransportError, TransportEvent, TransportStats};

const OUTBOUND_CAPACITY: usize = 32;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default)]
struct LinkState {
    status: ConnectionStatus,
    /// Bumped every time a connection attempt settles.
    attempt: u64,
    error: Option<String>,
}

struct Outbound {
    payload: Bytes,
    done: oneshot::Sender<Result<()>>,
}

type Waiter = oneshot::Sender<Result<Bytes>>;

struct Shared {
    id: String,
    kind: TransportKind,
    target: LinkTarget,
    options: TransportConfig,
    framing: bool,
    state: watch::Sender<LinkState>,
    outbound: Mutex<Option<mpsc::Sender<Outbound>>>,
    waiters: Mutex<VecDeque<Waiter>>,
    /// Serializes request/response exchanges.
    request_lock: tokio::sync::Mutex<()>,
    stats: Mutex<TransportStats>,
    events: mpsc::Sender<TransportEvent>,
    kick: Notify,
}

impl Shared {
    fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    fn set_status(&self, status: ConnectionStatus, error: Option<String>, settle: bool) {
        let mut changed = false;
        self.state.send_modify(|state| {
            changed = state.status != status;
            state.status = status;
            state.error = error;
            if settle {
                state.attempt += 1;
            }
        });

        if changed {
            debug!(endpoint = %self.id, status = %status, "Link status changed");
            self.publish(TransportEvent::Status {
                endpoint: self.id.clone(),
                kind: self.kind,
                status,
            });
        }
    }

    fn publish(&self, event: TransportEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(endpoint = %self.id, "Event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(endpoint = %self.id, "Event channel closed");
            }
        }
    }

    /// Hand an inbound message to the oldest live waiter, or publish it.
    ///
    /// Active reports are never responses: boards push them on their own,
    /// so they are published even while a request is waiting.
    fn deliver(&self, message: Bytes) {
        {
            let mut stats = lock(&self.stats);
            stats.messages_received += 1;
            stats.last_activity = Some(Utc::now());
        }

        let mut message = Some(message);
        if message.as_deref().is_some_and(is_active_report_frame) {
            trace!(endpoint = %self.id, "Active report bypasses pending requests");
        } else {
            let mut waiters = lock(&self.waiters);
            while let Some(waiter) = waiters.pop_front() {
                let Some(payload) = message.take() else { break };
                match waiter.send(Ok(payload)) {
                    Ok(()) => break,
                    Err(Ok(payload)) => message = Some(payload),
                    Err(Err(_)) => break,
                }
            }
        }

        if let Some(payload) = message {
            self.publish(TransportEvent::Data {
                endpoint: self.id.clone(),
                kind: self.kind,
                payload,
            });
        }
    }

    fn prune_waiters(&self) {
        lock(&self.waiters).retain(|waiter| !waiter.is_closed());
    }

    fn fail_waiters(&self) {
        for waiter in lock(&self.waiters).drain(..) {
            let _ = waiter.send(Err(TransportError::ConnectionClosed));
        }
    }

    fn record_sent(&self) {
        let mut stats = lock(&self.stats);
        stats.messages_sent += 1;
        stats.last_activity = Some(Utc::now());
    }

    fn record_error(&self) {
        lock(&self.stats).errors += 1;
    }
}

struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Persistent link to one endpoint over TCP or a serial line.
///
/// # Example
///
/// ```no_run
/// use armory_core::config::{TcpEndpointConfig, TransportConfig};
/// use armory_network::{Transport, TransportClient};
/// use bytes::Bytes;
/// use tokio::sync::mpsc;
///
/// # async fn example() -> armory_network::Result<()> {
/// let (events, _rx) = mpsc::channel(100);
/// let client = TransportClient::tcp(
///     "cabinet",
///     &TcpEndpointConfig::default(),
///     TransportConfig::default(),
///     events,
/// );
/// client.connect().await?;
/// client.send_no_wait(Bytes::from_static(&[0xCC, 0xDD])).await?;
/// # Ok(())
/// # }
/// ```
pub struct TransportClient {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl TransportClient {
    pub fn tcp(
        id: impl Into<String>,
        config: &TcpEndpointConfig,
        options: TransportConfig,
        events: mpsc::Sender<TransportEvent>,
    ) -> Self {
        Self::new(
            id.into(),
            TransportKind::Tcp,
            LinkTarget::Tcp(config.clone()),
            config.framing,
            options,
            events,
        )
    }

    pub fn serial(
        id: impl Into<String>,
        config: &SerialEndpointConfig,
        options: TransportConfig,
        events: mpsc::Sender<TransportEvent>,
    ) -> Self {
        Self::new(
            id.into(),
            TransportKind::Serial,
            LinkTarget::Serial(config.clone()),
            config.framing,
            options,
            events,
        )
    }

    fn new(
        id: String,
        kind: TransportKind,
        target: LinkTarget,
        framing: bool,
        options: TransportConfig,
        events: mpsc::Sender<TransportEvent>,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::default());
        Self {
            shared: Arc::new(Shared {
                id,
                kind,
                target,
                options,
                framing,
                state,
                outbound: Mutex::new(None),
                waiters: Mutex::new(VecDeque::new()),
                request_lock: tokio::sync::Mutex::new(()),
                stats: Mutex::new(TransportStats::default()),
                events,
                kick: Notify::new(),
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Error of the last failed attempt, if the link is not connected.
    pub fn last_error(&self) -> Option<String> {
        self.shared.state.borrow().error.clone()
    }

    /// Human readable link address, e.g. `tcp://192.168.1.101:50000`.
    pub fn describe(&self) -> String {
        self.shared.target.describe()
    }

    /// Start the supervisor, or wake it up when it is idling after a failure.
    fn ensure_supervisor(&self) {
        let mut supervisor = lock(&self.supervisor);
        if let Some(running) = supervisor.as_ref()
            && !running.handle.is_finished()
        {
            let idle = {
                let state = self.shared.state.borrow();
                state.attempt > 0
                    && matches!(
                        state.status,
                        ConnectionStatus::Error | ConnectionStatus::Disconnected
                    )
            };
            if idle {
                self.shared.kick.notify_one();
            }
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(Arc::clone(&self.shared), cancel.clone()));
        *supervisor = Some(Supervisor { cancel, handle });
    }
}

impl Transport for TransportClient {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn kind(&self) -> TransportKind {
        self.shared.kind
    }

    fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    fn stats(&self) -> TransportStats {
        lock(&self.shared.stats).clone()
    }

    async fn connect(&self) -> Result<()> {
        let mut state = self.shared.state.subscribe();
        let seen = {
            let current = state.borrow_and_update();
            if current.status.is_connected() {
                return Ok(());
            }
            current.attempt
        };

        self.ensure_supervisor();

        let settled = state
            .wait_for(|current| current.attempt > seen)
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;

        if settled.status.is_connected() {
            Ok(())
        } else {
            Err(TransportError::ConnectFailed(
                settled
                    .error
                    .clone()
                    .unwrap_or_else(|| "link closed".to_string()),
            ))
        }
    }

    async fn send(&self, payload: Bytes) -> Result<Bytes> {
        let _exchange = self.shared.request_lock.lock().await;

        let (tx, rx) = oneshot::channel();
        lock(&self.shared.waiters).push_back(tx);

        if let Err(e) = self.send_no_wait(payload).await {
            drop(rx);
            self.shared.prune_waiters();
            return Err(e);
        }

        let timeout = self.shared.options.response_timeout();
        match time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => {
                self.shared.prune_waiters();
                self.shared.record_error();
                warn!(endpoint = %self.shared.id, timeout_ms = timeout.as_millis() as u64, "Response timeout");
                Err(TransportError::ResponseTimeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn send_no_wait(&self, payload: Bytes) -> Result<()> {
        let sender = lock(&self.shared.outbound)
            .clone()
            .ok_or(TransportError::NotConnected)?;

        let (done, rx) = oneshot::channel();
        sender
            .send(Outbound { payload, done })
            .await
            .map_err(|_| TransportError::NotConnected)?;

        let result = rx.await.unwrap_or(Err(TransportError::ConnectionClosed));
        match &result {
            Ok(()) => self.shared.record_sent(),
            Err(_) => self.shared.record_error(),
        }
        result
    }

    async fn disconnect(&self) {
        let supervisor = lock(&self.supervisor).take();
        if let Some(Supervisor { cancel, handle }) = supervisor {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(endpoint = %self.shared.id, error = %e, "Supervisor task failed");
            }
            info!(endpoint = %self.shared.id, "Disconnected");
        }
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        if let Some(supervisor) = lock(&self.supervisor).take() {
            supervisor.cancel.cancel();
        }
    }
}

async fn supervise(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        shared.set_status(ConnectionStatus::Connecting, None, false);
        let connect_timeout = shared.target.connect_timeout();

        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            result = time::timeout(connect_timeout, shared.target.open()) => match result {
                Ok(opened) => opened,
                Err(_) => Err(TransportError::ConnectionTimeout(connect_timeout.as_millis() as u64)),
            },
        };

        match opened {
            Ok((reader, writer)) => {
                info!(endpoint = %shared.id, link = %shared.target.describe(), "Connected");
                let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
                *lock(&shared.outbound) = Some(out_tx);
                shared.set_status(ConnectionStatus::Connected, None, true);

                let end = run_session(&shared, &cancel, reader, writer, out_rx).await;

                *lock(&shared.outbound) = None;
                shared.fail_waiters();

                match end {
                    SessionEnd::Cancelled => break,
                    SessionEnd::Closed => {
                        info!(endpoint = %shared.id, "Link closed by peer");
                        shared.set_status(ConnectionStatus::Disconnected, None, false);
                    }
                    SessionEnd::Failed(e) => {
                        warn!(endpoint = %shared.id, error = %e, "Link failed");
                        shared.record_error();
                        shared.set_status(ConnectionStatus::Error, Some(e.to_string()), false);
                    }
                }
            }
            Err(e) => {
                warn!(endpoint = %shared.id, link = %shared.target.describe(), error = %e, "Connection attempt failed");
                shared.record_error();
                shared.set_status(ConnectionStatus::Error, Some(e.to_string()), true);
            }
        }

        if shared.options.reconnect {
            let delay = shared.options.reconnect_delay();
            debug!(endpoint = %shared.id, delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep(delay) => {}
                _ = shared.kick.notified() => {}
            }
        } else {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = shared.kick.notified() => {}
            }
        }
    }

    shared.fail_waiters();
    shared.set_status(
        ConnectionStatus::Disconnected,
        Some("disconnected".to_string()),
        true,
    );
}

enum SessionEnd {
    Cancelled,
    Closed,
    Failed(TransportError),
}

async fn run_session(
    shared: &Shared,
    cancel: &CancellationToken,
    mut reader: LinkReader,
    mut writer: LinkWriter,
    mut out_rx: mpsc::Receiver<Outbound>,
) -> SessionEnd {
    let mut codec = MessageCodec::for_framing(shared.framing);
    let mut buffer = BytesMut::new();
    let heartbeat = shared.options.heartbeat;
    let mut ticker = heartbeat
        .enabled
        .then(|| time::interval_at(Instant::now() + heartbeat.interval(), heartbeat.interval()));
    let mut ack_deadline: Option<Instant> = None;

    let end = loop {
        tokio::select! {
            _ = cancel.cancelled() => break SessionEnd::Cancelled,

            chunk = reader.read_chunk() => match chunk {
                Ok(Some(chunk)) => {
                    buffer.extend_from_slice(&chunk);
                    if let Err(e) = drain_messages(shared, &mut codec, &mut buffer, &mut ack_deadline) {
                        break SessionEnd::Failed(e);
                    }
                }
                Ok(None) => break SessionEnd::Closed,
                Err(e) => break SessionEnd::Failed(e.into()),
            },

            Some(Outbound { payload, done }) = out_rx.recv() => {
                match write_message(shared, &mut codec, &mut writer, payload).await {
                    Ok(()) => {
                        let _ = done.send(Ok(()));
                    }
                    Err(message) => {
                        let _ = done.send(Err(TransportError::WriteFailed(message.clone())));
                        break SessionEnd::Failed(TransportError::WriteFailed(message));
                    }
                }
            }

            _ = next_tick(&mut ticker) => {
                trace!(endpoint = %shared.id, "Sending heartbeat");
                if let Err(message) = write_message(shared, &mut codec, &mut writer, Bytes::from_static(HEARTBEAT_PAYLOAD)).await {
                    break SessionEnd::Failed(TransportError::WriteFailed(message));
                }
                ack_deadline.get_or_insert_with(|| Instant::now() + heartbeat.timeout());
            }

            _ = time::sleep_until(ack_deadline.unwrap_or_else(Instant::now)), if ack_deadline.is_some() => {
                ack_deadline = None;
                let timeout_ms = heartbeat.timeout_ms;
                if heartbeat.strict {
                    break SessionEnd::Failed(TransportError::HeartbeatTimeout(timeout_ms));
                }
                warn!(endpoint = %shared.id, timeout_ms, "Heartbeat not acknowledged");
            }
        }
    };

    writer.shutdown().await;
    end
}

fn drain_messages(
    shared: &Shared,
    codec: &mut MessageCodec,
    buffer: &mut BytesMut,
    ack_deadline: &mut Option<Instant>,
) -> Result<()> {
    while let Some(message) = codec.decode(buffer)? {
        if is_heartbeat_ack(&message) {
            trace!(endpoint = %shared.id, "Heartbeat acknowledged");
            *ack_deadline = None;
            continue;
        }
        shared.deliver(message);
    }
    Ok(())
}

async fn write_message(
    shared: &Shared,
    codec: &mut MessageCodec,
    writer: &mut LinkWriter,
    payload: Bytes,
) -> std::result::Result<(), String> {
    let mut wire = BytesMut::new();
    codec.encode(payload, &mut wire).map_err(|e| e.to_string())?;

    let timeout = shared.options.response_timeout();
    match time::timeout(timeout, writer.write_all(wire.freeze())).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("write timed out after {}ms", timeout.as_millis())),
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn is_heartbeat_ack(message: &[u8]) -> bool {
    HEARTBEAT_ACK_PAYLOADS.iter().any(|ack| *ack == message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(events: mpsc::Sender<TransportEvent>) -> TransportClient {
        TransportClient::tcp(
            "cabinet",
            &TcpEndpointConfig {
                host: "127.0.0.1".into(),
                port: 1,
                ..TcpEndpointConfig::default()
            },
            TransportConfig::default(),
            events,
        )
    }

    #[test]
    fn test_heartbeat_ack_detection() {
        assert!(is_heartbeat_ack(b"HEARTBEAT_ACK"));
        assert!(is_heartbeat_ack(b"PONG"));
        assert!(!is_heartbeat_ack(b"HEARTBEAT"));
        assert!(!is_heartbeat_ack(&[0xEE, 0xFF, 0xC0]));
    }

    #[tokio::test]
    async fn test_new_client_is_disconnected() {
        let (events, _rx) = mpsc::channel(8);
        let client = client(events);

        assert_eq!(client.id(), "cabinet");
        assert_eq!(client.kind(), TransportKind::Tcp);
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert_eq!(client.stats(), TransportStats::default());
        assert_eq!(client.describe(), "tcp://127.0.0.1:1");
    }

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let (events, _rx) = mpsc::channel(8);
        let client = client(events);

        let result = client.send(Bytes::from_static(b"ping")).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
        assert!(lock(&client.shared.waiters).is_empty());

        let result = client.send_no_wait(Bytes::from_static(b"ping")).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_deliver_skips_abandoned_waiters() {
        let (events, mut rx) = mpsc::channel(8);
        let client = client(events);

        let (abandoned, abandoned_rx) = oneshot::channel();
        let (live, live_rx) = oneshot::channel();
        drop(abandoned_rx);
        lock(&client.shared.waiters).extend([abandoned, live]);

        client.shared.deliver(Bytes::from_static(b"reply"));
        assert_eq!(&live_rx.await.unwrap().unwrap()[..], b"reply");

        // Nobody waiting: the message becomes an event.
        client.shared.deliver(Bytes::from_static(b"report"));
        match rx.recv().await.unwrap() {
            TransportEvent::Data { endpoint, payload, .. } => {
                assert_eq!(endpoint, "cabinet");
                assert_eq!(&payload[..], b"report");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(client.stats().messages_received, 2);
    }

    #[tokio::test]
    async fn test_status_event_only_on_change() {
        let (events, mut rx) = mpsc::channel(8);
        let client = client(events);

        client.shared.set_status(ConnectionStatus::Error, Some("boom".into()), true);
        client.shared.set_status(ConnectionStatus::Error, Some("boom".into()), true);

        assert!(matches!(
            rx.try_recv(),
            Ok(TransportEvent::Status { status: ConnectionStatus::Error, .. })
        ));
        assert!(rx.try_recv().is_err());
        assert_eq!(client.last_error().as_deref(), Some("boom"));
    }
}
