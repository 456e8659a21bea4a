//! Transport trait and the events a link publishes.

use armory_core::{ConnectionStatus, TransportKind};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Result;

/// Something published by a link without being asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A complete inbound message that no pending request claimed.
    Data {
        endpoint: String,
        kind: TransportKind,
        payload: Bytes,
    },
    /// The link changed state.
    Status {
        endpoint: String,
        kind: TransportKind,
        status: ConnectionStatus,
    },
}

impl TransportEvent {
    /// Id of the endpoint that published the event.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Data { endpoint, .. } | Self::Status { endpoint, .. } => endpoint,
        }
    }
}

/// Send/receive counters of a link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub errors: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// A persistent, reconnecting link to one endpoint.
///
/// All methods take `&self` so a registry can drive several requests
/// against different endpoints concurrently.
///
/// **NOTE**: This trait is NOT object-safe because `async fn` methods return
/// `impl Future`. Dispatch over concrete types goes through an enum wrapper.
pub trait Transport: Send + Sync {
    /// Registry id of the endpoint.
    fn id(&self) -> &str;

    fn kind(&self) -> TransportKind;

    fn status(&self) -> ConnectionStatus;

    fn stats(&self) -> TransportStats;

    /// Open the link, or join an attempt already in progress.
    ///
    /// # Errors
    /// Returns the failure of the attempt. The link keeps retrying in the
    /// background when reconnection is enabled.
    async fn connect(&self) -> Result<()>;

    /// Send a message and wait for the next inbound message as its response.
    ///
    /// # Errors
    /// - `NotConnected` if the link is down
    /// - `ResponseTimeout` if nothing arrives in time
    /// - `ConnectionClosed` if the link drops while waiting
    async fn send(&self, payload: Bytes) -> Result<Bytes>;

    /// Send a message without waiting for a response.
    async fn send_no_wait(&self, payload: Bytes) -> Result<()>;

    /// Close the link and stop reconnecting.
    async fn disconnect(&self);
}
