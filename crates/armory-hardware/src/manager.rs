//! Hardware communication manager.
//!
//! The manager owns every transport of the controller, keyed by endpoint id
//! and grouped by kind. It offers direct sends, a paced command queue, a
//! status snapshot and one event subscription per kind.
//!
//! # Architecture
//!
//! ```text
//!                 ┌───────────────────────────────┐
//! enqueue() ────► │ CommandQueue ─► dispatch loop │──┐
//!                 └───────────────────────────────┘  │ send()
//! send() ────────────────────────────────────────────┤
//!                                                    ▼
//!                 ┌──────────── Registry ─────────────┐
//!                 │ tcp:    { "cabinet": AnyTransport }│
//!                 │ serial: { "control": AnyTransport }│
//!                 └────────────────┬──────────────────┘
//!                                  │ TransportEvent (per kind mpsc)
//!                                  ▼
//!                          subscribe(kind) ───► monitor pump
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use armory_core::{ControllerConfig, TransportKind};
//! use armory_hardware::HardwareManager;
//!
//! #[tokio::main]
//! async fn main() -> armory_hardware::Result<()> {
//!     let config = ControllerConfig::default();
//!     let manager = HardwareManager::from_config(&config)?;
//!
//!     let mut events = manager.subscribe(TransportKind::Tcp).expect("first subscriber");
//!     manager.initialize().await;
//!     manager.reset_all_relays().await;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use armory_core::constants::{DEFAULT_QUEUE_INTERVAL_MS, EVENT_CHANNEL_CAPACITY};
use armory_core::{ConnectionStatus, ControllerConfig, Endpoint, TransportKind};
use armory_network::{Transport, TransportClient, TransportError, TransportEvent, TransportStats};
use armory_protocol::RelayCommand;
use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::queue::{CommandQueue, CompletionHandle, QueuedCommand};
use crate::{AnyTransport, HardwareError, Result};

/// What an endpoint answered to a send.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The message was written and no response was requested.
    Ack,
    /// The response parsed as JSON.
    Json(serde_json::Value),
    /// Any other response, kept verbatim.
    Raw(Bytes),
}

impl Response {
    /// Interpret response bytes: JSON when they parse, raw otherwise.
    pub fn from_payload(payload: Bytes) -> Self {
        match serde_json::from_slice(&payload) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Raw(payload),
        }
    }
}

/// Per-endpoint result of one send.
pub type SendOutcome = HashMap<String, std::result::Result<Response, TransportError>>;

/// Status of every registered endpoint, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub tcp: BTreeMap<String, ConnectionStatus>,
    pub serial: BTreeMap<String, ConnectionStatus>,
}

impl ConnectionSnapshot {
    /// Status of an endpoint of either kind.
    pub fn get(&self, id: &str) -> Option<ConnectionStatus> {
        self.tcp.get(id).or_else(|| self.serial.get(id)).copied()
    }

    /// Whether every registered endpoint is connected.
    pub fn all_connected(&self) -> bool {
        self.tcp
            .values()
            .chain(self.serial.values())
            .all(ConnectionStatus::is_connected)
    }
}

/// Registered transports. Immutable once the manager is built.
#[derive(Default)]
pub(crate) struct Registry {
    tcp: HashMap<String, AnyTransport>,
    serial: HashMap<String, AnyTransport>,
}

impl Registry {
    fn of(&self, kind: TransportKind) -> &HashMap<String, AnyTransport> {
        match kind {
            TransportKind::Tcp => &self.tcp,
            TransportKind::Serial => &self.serial,
        }
    }

    fn of_mut(&mut self, kind: TransportKind) -> &mut HashMap<String, AnyTransport> {
        match kind {
            TransportKind::Tcp => &mut self.tcp,
            TransportKind::Serial => &mut self.serial,
        }
    }

    fn all(&self) -> impl Iterator<Item = &AnyTransport> {
        self.tcp.values().chain(self.serial.values())
    }

    fn kind_of(&self, id: &str) -> Option<TransportKind> {
        TransportKind::ALL
            .into_iter()
            .find(|kind| self.of(*kind).contains_key(id))
    }

    pub(crate) async fn send(
        &self,
        kind: TransportKind,
        payload: Bytes,
        target: Option<&str>,
        expect_response: bool,
    ) -> Result<SendOutcome> {
        let endpoints = self.of(kind);

        if let Some(id) = target {
            let transport = endpoints
                .get(id)
                .ok_or_else(|| HardwareError::not_found(kind, id))?;
            let result = send_one(transport, payload, expect_response).await;
            return Ok(HashMap::from([(id.to_string(), result)]));
        }

        if endpoints.is_empty() {
            warn!(kind = %kind, "Broadcast without registered endpoints");
        }

        let sends = endpoints.iter().map(|(id, transport)| {
            let payload = payload.clone();
            async move {
                (
                    id.clone(),
                    send_one(transport, payload, expect_response).await,
                )
            }
        });
        Ok(join_all(sends).await.into_iter().collect())
    }
}

async fn send_one(
    transport: &AnyTransport,
    payload: Bytes,
    expect_response: bool,
) -> std::result::Result<Response, TransportError> {
    let result = if expect_response {
        transport.send(payload).await.map(Response::from_payload)
    } else {
        transport.send_no_wait(payload).await.map(|()| Response::Ack)
    };

    if let Err(e) = &result {
        warn!(endpoint = %transport.id(), error = %e, "Send failed");
    }
    result
}

/// Builder registering the transports of a [`HardwareManager`].
///
/// Transports publish their events on per-kind channels created by the
/// builder; use [`event_sender`](Self::event_sender) when constructing one.
pub struct HardwareManagerBuilder {
    registry: Registry,
    senders: HashMap<TransportKind, mpsc::Sender<TransportEvent>>,
    receivers: HashMap<TransportKind, mpsc::Receiver<TransportEvent>>,
    queue_interval: Duration,
}

impl HardwareManagerBuilder {
    fn new() -> Self {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for kind in TransportKind::ALL {
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            senders.insert(kind, tx);
            receivers.insert(kind, rx);
        }

        Self {
            registry: Registry::default(),
            senders,
            receivers,
            queue_interval: Duration::from_millis(DEFAULT_QUEUE_INTERVAL_MS),
        }
    }

    /// Channel a transport of this kind must publish its events on.
    pub fn event_sender(&self, kind: TransportKind) -> mpsc::Sender<TransportEvent> {
        self.senders[&kind].clone()
    }

    /// Register a transport under its own id.
    ///
    /// # Errors
    /// Returns `DuplicateEndpoint` if any kind already has that id.
    pub fn register(mut self, transport: impl Into<AnyTransport>) -> Result<Self> {
        let transport = transport.into();
        let id = transport.id().to_string();
        if self.registry.kind_of(&id).is_some() {
            return Err(HardwareError::DuplicateEndpoint(id));
        }
        self.registry
            .of_mut(transport.kind())
            .insert(id, transport);
        Ok(self)
    }

    pub fn queue_interval(mut self, interval: Duration) -> Self {
        self.queue_interval = interval;
        self
    }

    /// Build the manager and start its dispatch loop.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> HardwareManager {
        let registry = Arc::new(self.registry);
        let cancel = CancellationToken::new();
        let (queue, dispatcher) =
            CommandQueue::new(Arc::clone(&registry), self.queue_interval, cancel.clone());
        let handle = tokio::spawn(dispatcher);

        HardwareManager {
            registry,
            queue,
            subscriptions: Mutex::new(self.receivers),
            dispatcher: Mutex::new(Some((cancel, handle))),
        }
    }
}

/// Owns the controller's transports and serializes commands to them.
pub struct HardwareManager {
    registry: Arc<Registry>,
    queue: CommandQueue,
    subscriptions: Mutex<HashMap<TransportKind, mpsc::Receiver<TransportEvent>>>,
    dispatcher: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HardwareManager {
    pub fn builder() -> HardwareManagerBuilder {
        HardwareManagerBuilder::new()
    }

    /// Register the cabinet TCP link and the control serial link.
    ///
    /// # Errors
    /// Fails only on duplicate ids, which this layout cannot produce.
    pub fn from_config(config: &ControllerConfig) -> Result<Self> {
        let builder = Self::builder().queue_interval(config.queue_interval_ms.duration());

        let cabinet = TransportClient::tcp(
            Endpoint::Cabinet.id(),
            &config.cabinet,
            config.transport,
            builder.event_sender(TransportKind::Tcp),
        );
        let control = TransportClient::serial(
            Endpoint::Control.id(),
            &config.control,
            config.transport,
            builder.event_sender(TransportKind::Serial),
        );

        Ok(builder.register(cabinet)?.register(control)?.build())
    }

    /// Connect every transport.
    ///
    /// Failures are logged and left to each link's own reconnect loop.
    pub async fn initialize(&self) {
        let attempts = self.registry.all().map(|transport| async move {
            match transport.connect().await {
                Ok(()) => info!(endpoint = %transport.id(), kind = %transport.kind(), "Endpoint connected"),
                Err(e) => warn!(endpoint = %transport.id(), kind = %transport.kind(), error = %e, "Endpoint not connected, retrying in background"),
            }
        });
        join_all(attempts).await;
    }

    /// Send right away, bypassing the queue.
    ///
    /// With a `target` only that endpoint is addressed; without one the
    /// payload goes to every endpoint of `kind` concurrently.
    ///
    /// # Errors
    /// Returns `EndpointNotFound` for an unknown `target`. Transport failures
    /// are reported per endpoint inside the outcome.
    pub async fn send(
        &self,
        kind: TransportKind,
        payload: Bytes,
        target: Option<&str>,
        expect_response: bool,
    ) -> Result<SendOutcome> {
        self.registry
            .send(kind, payload, target, expect_response)
            .await
    }

    /// Append a send to the paced command queue.
    ///
    /// # Errors
    /// Returns `QueueClosed` after [`shutdown`](Self::shutdown).
    pub fn enqueue(
        &self,
        kind: TransportKind,
        payload: Bytes,
        target: Option<&str>,
        expect_response: bool,
    ) -> Result<CompletionHandle> {
        let id = Uuid::new_v4();
        let (done, rx) = oneshot::channel();
        debug!(command_id = %id, kind = %kind, target = ?target, bytes = payload.len(), "Enqueue command");

        self.queue.push(QueuedCommand {
            id,
            kind,
            payload,
            target: target.map(str::to_string),
            expect_response,
            done,
        })?;
        Ok(CompletionHandle::new(id, rx))
    }

    /// Enqueue a fire-and-forget send to one endpoint of either kind.
    ///
    /// # Errors
    /// Returns `UnknownEndpoint` if no kind has this id.
    pub fn enqueue_to(&self, id: &str, payload: Bytes) -> Result<CompletionHandle> {
        let kind = self
            .registry
            .kind_of(id)
            .ok_or_else(|| HardwareError::UnknownEndpoint(id.to_string()))?;
        self.enqueue(kind, payload, Some(id), false)
    }

    pub fn set_queue_interval(&self, interval: Duration) {
        debug!(interval_ms = interval.as_millis() as u64, "Queue interval changed");
        self.queue.set_interval(interval);
    }

    pub fn queue_interval(&self) -> Duration {
        self.queue.interval()
    }

    /// Commands waiting for the dispatch loop.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether an endpoint with this id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.registry.kind_of(id).is_some()
    }

    pub fn connection_status(&self) -> ConnectionSnapshot {
        let collect = |kind| {
            self.registry
                .of(kind)
                .iter()
                .map(|(id, transport)| (id.clone(), transport.status()))
                .collect()
        };
        ConnectionSnapshot {
            tcp: collect(TransportKind::Tcp),
            serial: collect(TransportKind::Serial),
        }
    }

    /// Statistics of every endpoint, keyed by id.
    pub fn transport_stats(&self) -> BTreeMap<String, TransportStats> {
        self.registry
            .all()
            .map(|transport| (transport.id().to_string(), transport.stats()))
            .collect()
    }

    /// Take the event stream of one kind.
    ///
    /// Each stream has a single subscriber; later calls return `None`.
    pub fn subscribe(&self, kind: TransportKind) -> Option<mpsc::Receiver<TransportEvent>> {
        lock(&self.subscriptions).remove(&kind)
    }

    /// Switch every relay of both boards off.
    ///
    /// Sent at startup so no output stays energized from a previous run.
    /// Endpoints that are not registered are skipped and failures are logged.
    pub async fn reset_all_relays(&self) {
        let payload = RelayCommand::open_all().encode();

        for endpoint in Endpoint::ALL {
            let id = endpoint.id();
            if !self.contains(id) {
                debug!(endpoint = %id, "Relay reset skipped, endpoint not registered");
                continue;
            }

            let outcome = match self.enqueue_to(id, payload.clone()) {
                Ok(handle) => handle.wait().await,
                Err(e) => Err(e),
            };
            match outcome.map(|mut results| results.remove(id)) {
                Ok(Some(Ok(_))) => info!(endpoint = %id, "Relays reset"),
                Ok(Some(Err(e))) => warn!(endpoint = %id, error = %e, "Relay reset failed"),
                Ok(None) => warn!(endpoint = %id, "Relay reset produced no result"),
                Err(e) => warn!(endpoint = %id, error = %e, "Relay reset not dispatched"),
            }
        }
    }

    /// Stop the dispatch loop and disconnect every transport.
    pub async fn shutdown(&self) {
        let dispatcher = lock(&self.dispatcher).take();
        if let Some((cancel, handle)) = dispatcher {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Dispatch loop ended abnormally");
            }
        }

        join_all(self.registry.all().map(|transport| transport.disconnect())).await;
        info!("Hardware manager shut down");
    }
}

impl Drop for HardwareManager {
    fn drop(&mut self) {
        if let Some((cancel, _)) = lock(&self.dispatcher).take() {
            cancel.cancel();
        }
    }
}
