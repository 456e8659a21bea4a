//! Mock transport for testing and development.
//!
//! The mock never touches a socket. Everything written to it is recorded,
//! responses are taken from a scripted queue and inbound traffic is injected
//! through a [`MockTransportHandle`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use armory_core::{ConnectionStatus, TransportKind};
use armory_network::{Result, Transport, TransportError, TransportEvent, TransportStats};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct MockState {
    status: ConnectionStatus,
    refuse_connect: bool,
    sent: Vec<(Instant, Bytes)>,
    responses: VecDeque<Bytes>,
    stats: TransportStats,
}

#[derive(Debug)]
struct Inner {
    id: String,
    kind: TransportKind,
    events: mpsc::Sender<TransportEvent>,
    state: Mutex<MockState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: ConnectionStatus) {
        let changed = {
            let mut state = self.state();
            let changed = state.status != status;
            state.status = status;
            changed
        };
        if changed {
            let _ = self.events.try_send(TransportEvent::Status {
                endpoint: self.id.clone(),
                kind: self.kind,
                status,
            });
        }
    }

    fn record(&self, payload: Bytes) -> Result<()> {
        let mut state = self.state();
        if !state.status.is_connected() {
            state.stats.errors += 1;
            return Err(TransportError::NotConnected);
        }
        state.sent.push((Instant::now(), payload));
        state.stats.messages_sent += 1;
        Ok(())
    }
}

/// Transport double driven by a [`MockTransportHandle`].
///
/// # Examples
///
/// ```
/// use armory_core::TransportKind;
/// use armory_hardware::mock::MockTransport;
/// use armory_network::Transport;
/// use bytes::Bytes;
/// use tokio::sync::mpsc;
///
/// #[tokio::main]
/// async fn main() -> armory_network::Result<()> {
///     let (events, _rx) = mpsc::channel(16);
///     let (mock, handle) = MockTransport::new("cabinet", TransportKind::Tcp, events);
///
///     mock.connect().await?;
///     handle.push_response(Bytes::from_static(b"{\"ok\":true}"));
///
///     let reply = mock.send(Bytes::from_static(b"status")).await?;
///     assert_eq!(&reply[..], b"{\"ok\":true}");
///     assert_eq!(handle.sent(), vec![Bytes::from_static(b"status")]);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    /// Create a mock publishing its events on `events`.
    pub fn new(
        id: impl Into<String>,
        kind: TransportKind,
        events: mpsc::Sender<TransportEvent>,
    ) -> (Self, MockTransportHandle) {
        let inner = Arc::new(Inner {
            id: id.into(),
            kind,
            events,
            state: Mutex::new(MockState::default()),
        });
        (
            Self {
                inner: Arc::clone(&inner),
            },
            MockTransportHandle { inner },
        )
    }
}

impl Transport for MockTransport {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    fn status(&self) -> ConnectionStatus {
        self.inner.state().status
    }

    fn stats(&self) -> TransportStats {
        self.inner.state().stats.clone()
    }

    async fn connect(&self) -> Result<()> {
        if self.inner.state().refuse_connect {
            self.inner.set_status(ConnectionStatus::Error);
            return Err(TransportError::ConnectFailed("connection refused".into()));
        }
        self.inner.set_status(ConnectionStatus::Connected);
        Ok(())
    }

    async fn send(&self, payload: Bytes) -> Result<Bytes> {
        self.inner.record(payload)?;
        let mut state = self.inner.state();
        match state.responses.pop_front() {
            Some(response) => {
                state.stats.messages_received += 1;
                Ok(response)
            }
            None => {
                state.stats.errors += 1;
                Err(TransportError::ResponseTimeout(0))
            }
        }
    }

    async fn send_no_wait(&self, payload: Bytes) -> Result<()> {
        self.inner.record(payload)
    }

    async fn disconnect(&self) {
        self.inner.set_status(ConnectionStatus::Disconnected);
    }
}

/// Controls a [`MockTransport`] from the outside. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    inner: Arc<Inner>,
}

impl MockTransportHandle {
    /// Payloads written so far, oldest first.
    pub fn sent(&self) -> Vec<Bytes> {
        self.inner
            .state()
            .sent
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Instants at which payloads were written.
    pub fn sent_at(&self) -> Vec<Instant> {
        self.inner.state().sent.iter().map(|(at, _)| *at).collect()
    }

    pub fn clear_sent(&self) {
        self.inner.state().sent.clear();
    }

    /// Queue the response of the next `send`.
    pub fn push_response(&self, response: Bytes) {
        self.inner.state().responses.push_back(response);
    }

    /// Make further `connect` calls fail.
    pub fn refuse_connect(&self, refuse: bool) {
        self.inner.state().refuse_connect = refuse;
    }

    /// Force a status change, as a dropped or restored link would.
    pub fn set_status(&self, status: ConnectionStatus) {
        self.inner.set_status(status);
    }

    /// Publish inbound bytes as if the peer had sent them.
    pub async fn inject(&self, payload: impl Into<Bytes>) {
        let _ = self
            .inner
            .events
            .send(TransportEvent::Data {
                endpoint: self.inner.id.clone(),
                kind: self.inner.kind,
                payload: payload.into(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_requires_connection() {
        let (events, _rx) = mpsc::channel(8);
        let (mock, handle) = MockTransport::new("control", TransportKind::Serial, events);

        let result = mock.send_no_wait(Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
        assert!(handle.sent().is_empty());
        assert_eq!(mock.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_status_changes_are_published() {
        let (events, mut rx) = mpsc::channel(8);
        let (mock, handle) = MockTransport::new("control", TransportKind::Serial, events);

        mock.connect().await.unwrap();
        handle.set_status(ConnectionStatus::Connected);
        handle.set_status(ConnectionStatus::Error);

        let statuses: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| match event {
                TransportEvent::Status { status, .. } => status,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(statuses, vec![ConnectionStatus::Connected, ConnectionStatus::Error]);
    }

    #[tokio::test]
    async fn test_refused_connect() {
        let (events, _rx) = mpsc::channel(8);
        let (mock, handle) = MockTransport::new("cabinet", TransportKind::Tcp, events);
        handle.refuse_connect(true);

        assert!(mock.connect().await.is_err());
        assert_eq!(mock.status(), ConnectionStatus::Error);
    }

    #[tokio::test]
    async fn test_send_without_scripted_response_times_out() {
        let (events, _rx) = mpsc::channel(8);
        let (mock, _handle) = MockTransport::new("cabinet", TransportKind::Tcp, events);
        mock.connect().await.unwrap();

        let result = mock.send(Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(TransportError::ResponseTimeout(_))));
    }
}
