//! Enum wrapper for transport dispatch.
//!
//! Native `async fn` in traits is not object-safe, so the registry cannot
//! hold `Box<dyn Transport>`. [`AnyTransport`] gives it one concrete type
//! that forwards every call to the wrapped implementation.

use armory_core::{ConnectionStatus, TransportKind};
use armory_network::{Transport, TransportClient, TransportStats};
use bytes::Bytes;

use crate::mock::MockTransport;

/// Any transport the manager can register.
///
/// # Examples
///
/// ```
/// use armory_core::TransportKind;
/// use armory_hardware::AnyTransport;
/// use armory_hardware::mock::MockTransport;
/// use armory_network::Transport;
/// use tokio::sync::mpsc;
///
/// let (events, _rx) = mpsc::channel(16);
/// let (mock, _handle) = MockTransport::new("cabinet", TransportKind::Tcp, events);
/// let transport = AnyTransport::Mock(mock);
/// assert_eq!(transport.id(), "cabinet");
/// ```
pub enum AnyTransport {
    /// Real TCP or serial link.
    Client(TransportClient),
    /// Scripted transport for tests and dry runs.
    Mock(MockTransport),
}

impl From<TransportClient> for AnyTransport {
    fn from(client: TransportClient) -> Self {
        Self::Client(client)
    }
}

impl From<MockTransport> for AnyTransport {
    fn from(mock: MockTransport) -> Self {
        Self::Mock(mock)
    }
}

impl Transport for AnyTransport {
    fn id(&self) -> &str {
        match self {
            Self::Client(t) => t.id(),
            Self::Mock(t) => t.id(),
        }
    }

    fn kind(&self) -> TransportKind {
        match self {
            Self::Client(t) => t.kind(),
            Self::Mock(t) => t.kind(),
        }
    }

    fn status(&self) -> ConnectionStatus {
        match self {
            Self::Client(t) => t.status(),
            Self::Mock(t) => t.status(),
        }
    }

    fn stats(&self) -> TransportStats {
        match self {
            Self::Client(t) => t.stats(),
            Self::Mock(t) => t.stats(),
        }
    }

    async fn connect(&self) -> armory_network::Result<()> {
        match self {
            Self::Client(t) => t.connect().await,
            Self::Mock(t) => t.connect().await,
        }
    }

    async fn send(&self, payload: Bytes) -> armory_network::Result<Bytes> {
        match self {
            Self::Client(t) => t.send(payload).await,
            Self::Mock(t) => t.send(payload).await,
        }
    }

    async fn send_no_wait(&self, payload: Bytes) -> armory_network::Result<()> {
        match self {
            Self::Client(t) => t.send_no_wait(payload).await,
            Self::Mock(t) => t.send_no_wait(payload).await,
        }
    }

    async fn disconnect(&self) {
        match self {
            Self::Client(t) => t.disconnect().await,
            Self::Mock(t) => t.disconnect().await,
        }
    }
}
