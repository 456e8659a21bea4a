//! Paced FIFO of outbound commands.
//!
//! Relay boards drop commands that arrive back to back, so every command that
//! changes hardware state goes through this queue. A single dispatch loop
//! takes one entry at a time, sends it, and then keeps the line quiet for the
//! configured interval before the next entry. An idle loop starts again as
//! soon as something is enqueued; the interval is only applied between two
//! entries, never before the first one.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use armory_core::TransportKind;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::manager::{Registry, SendOutcome};
use crate::{HardwareError, Result};

/// One queued send, consumed exactly once by the dispatch loop.
pub(crate) struct QueuedCommand {
    pub(crate) id: Uuid,
    pub(crate) kind: TransportKind,
    pub(crate) payload: Bytes,
    pub(crate) target: Option<String>,
    pub(crate) expect_response: bool,
    pub(crate) done: oneshot::Sender<Result<SendOutcome>>,
}

/// Resolves once the dispatch loop has sent a queued command.
#[derive(Debug)]
pub struct CompletionHandle {
    id: Uuid,
    rx: oneshot::Receiver<Result<SendOutcome>>,
}

impl CompletionHandle {
    pub(crate) fn new(id: Uuid, rx: oneshot::Receiver<Result<SendOutcome>>) -> Self {
        Self { id, rx }
    }

    /// Command id used in log lines.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the per-endpoint outcome of the command.
    ///
    /// # Errors
    /// - `EndpointNotFound` if the command named an unknown endpoint
    /// - `QueueClosed` if the manager shut down before the command ran
    pub async fn wait(self) -> Result<SendOutcome> {
        self.rx.await.map_err(|_| HardwareError::QueueClosed)?
    }
}

/// Producer side of the queue, owned by the manager.
pub(crate) struct CommandQueue {
    tx: mpsc::UnboundedSender<QueuedCommand>,
    pending: Arc<AtomicUsize>,
    interval: watch::Sender<Duration>,
}

impl CommandQueue {
    /// Create the queue and the future of its dispatch loop.
    pub(crate) fn new(
        registry: Arc<Registry>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> (Self, impl Future<Output = ()> + Send + 'static) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let (interval_tx, interval_rx) = watch::channel(interval);

        let dispatcher = dispatch_loop(registry, rx, interval_rx, Arc::clone(&pending), cancel);
        (
            Self {
                tx,
                pending,
                interval: interval_tx,
            },
            dispatcher,
        )
    }

    pub(crate) fn push(&self, command: QueuedCommand) -> Result<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(command).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(HardwareError::QueueClosed);
        }
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn interval(&self) -> Duration {
        *self.interval.borrow()
    }

    pub(crate) fn set_interval(&self, interval: Duration) {
        self.interval.send_replace(interval);
    }
}

async fn dispatch_loop(
    registry: Arc<Registry>,
    mut rx: mpsc::UnboundedReceiver<QueuedCommand>,
    interval: watch::Receiver<Duration>,
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    let mut last_sent: Option<Instant> = None;

    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(command) => command,
                None => break,
            },
        };
        pending.fetch_sub(1, Ordering::SeqCst);

        if let Some(last) = last_sent {
            let gap = *interval.borrow();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep_until(last + gap) => {}
            }
        }

        trace!(command_id = %command.id, kind = %command.kind, target = ?command.target, "Dispatching queued command");
        let outcome = registry
            .send(
                command.kind,
                command.payload,
                command.target.as_deref(),
                command.expect_response,
            )
            .await;
        last_sent = Some(Instant::now());

        if command.done.send(outcome).is_err() {
            trace!(command_id = %command.id, "Completion handle dropped");
        }
    }

    debug!("Command dispatch loop stopped");
}
