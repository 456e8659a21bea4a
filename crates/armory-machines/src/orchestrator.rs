//! Top-level router between the monitor and the two business machines.
//!
//! The orchestrator owns the alarm and apply-ammo actors. Everything they
//! and the monitor report lands in one inbox. Each wake-up drains the inbox
//! and serves the batch in priority order, so a safety event that arrived
//! behind routine ones is still handled first.
//!
//! # Architecture
//!
//! ```text
//! monitor ──┐
//! alarm ────┼──> inbox ──> route() ──> AlarmHandle / ApplyAmmoHandle
//! apply ────┘
//! ```
//!
//! # System states
//!
//! - `Idle`: nothing running. An apply request starts the workflow, a safety
//!   event raises an alarm.
//! - `Normal`: the workflow owns the hardware events. A safety event aborts
//!   the workflow and raises an alarm.
//! - `Alarm`: the alarm machine owns the hardware events until it reports
//!   `AlarmCancelled`.

use std::fmt;

use armory_core::constants::EVENT_CHANNEL_CAPACITY;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::alarm::{AlarmCore, AlarmEvent, AlarmHandle, AlarmState};
use crate::apply_ammo::{ApplyAmmoCore, ApplyAmmoHandle, ApplyAmmoSettings, ApplyAmmoState, ApplyEvent};
use crate::event::{BusinessEvent, EventMessage, Priority};
use crate::history::{MachineState, TransitionLog};
use crate::ports::Effects;
use crate::{MachineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    Idle,
    Normal,
    Alarm,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Normal => "normal",
            Self::Alarm => "alarm",
        };
        f.write_str(s)
    }
}

impl MachineState for SystemState {
    fn can_transition_to(&self, next: &Self) -> bool {
        self != next
    }
}

/// Where a routed event goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Alarm(AlarmEvent),
    Apply(ApplyEvent),
}

/// Routing table of the system state machine.
#[derive(Debug)]
pub struct Router {
    log: TransitionLog<SystemState>,
}

impl Router {
    pub fn new(now: Instant) -> Self {
        Self {
            log: TransitionLog::new(SystemState::Idle, now),
        }
    }

    pub fn state(&self) -> SystemState {
        self.log.current()
    }

    pub fn history(&self) -> &TransitionLog<SystemState> {
        &self.log
    }

    /// Decide where one event goes, updating the system state.
    pub fn route(&mut self, event: &BusinessEvent, now: Instant) -> Vec<Route> {
        use BusinessEvent as B;
        use SystemState as S;

        if let B::MonitorConnectionUpdate { cabinet, control } = event {
            info!(cabinet, control, "Connection status");
            return Vec::new();
        }

        let state = self.state();
        match (state, event) {
            (S::Idle, B::ApplyRequest) => {
                self.enter(S::Normal, now);
                vec![Route::Apply(ApplyEvent::Apply)]
            }
            (S::Idle, _) if safety_alarm(event).is_some() => {
                self.enter(S::Alarm, now);
                safety_alarm(event).map(Route::Alarm).into_iter().collect()
            }

            (S::Normal, _) if safety_alarm(event).is_some() => {
                warn!(event = ?event, "Safety event preempts the workflow");
                self.enter(S::Alarm, now);
                let mut routes = vec![Route::Apply(ApplyEvent::Abort)];
                routes.extend(safety_alarm(event).map(Route::Alarm));
                routes
            }
            (S::Normal, B::OperationComplete) => {
                self.enter(S::Idle, now);
                Vec::new()
            }
            (S::Normal, _) => workflow_event(event).map(Route::Apply).into_iter().collect(),

            (S::Alarm, B::AlarmCancelled) => {
                self.enter(S::Idle, now);
                Vec::new()
            }
            (S::Alarm, _) => alarm_event(event).map(Route::Alarm).into_iter().collect(),

            (state, event) => {
                debug!(state = %state, event = ?event, "Event not routed");
                Vec::new()
            }
        }
    }

    fn enter(&mut self, next: SystemState, now: Instant) {
        match self.log.transition_to(next, now) {
            Ok(transition) => info!(from = %transition.from, to = %transition.to, "System state changed"),
            Err(e) => debug!(error = %e, "System transition ignored"),
        }
    }
}

fn safety_alarm(event: &BusinessEvent) -> Option<AlarmEvent> {
    match event {
        BusinessEvent::KeyDetected => Some(AlarmEvent::KeyDetected),
        BusinessEvent::VibrationDetected => Some(AlarmEvent::Vibration),
        BusinessEvent::MonitorAnomaly { reason } => Some(AlarmEvent::Monitor { reason: *reason }),
        _ => None,
    }
}

fn workflow_event(event: &BusinessEvent) -> Option<ApplyEvent> {
    let routed = match event {
        BusinessEvent::ApplyRequest => ApplyEvent::Apply,
        BusinessEvent::AuthorizeRequest => ApplyEvent::Authorized,
        BusinessEvent::RefuseRequest => ApplyEvent::Refuse,
        BusinessEvent::CabinetLockChanged { is_closed: true } => ApplyEvent::DoorClose,
        BusinessEvent::CabinetLockChanged { is_closed: false } => ApplyEvent::DoorOpen,
        BusinessEvent::DoorLockSwitchChanged { is_open: true } => ApplyEvent::DoorLockOpen,
        BusinessEvent::DoorLockSwitchChanged { is_open: false } => ApplyEvent::DoorLockClose,
        BusinessEvent::AlarmCancelToggled => ApplyEvent::AlarmCancel,
        _ => return None,
    };
    Some(routed)
}

fn alarm_event(event: &BusinessEvent) -> Option<AlarmEvent> {
    match event {
        BusinessEvent::KeyReset => Some(AlarmEvent::KeyReset),
        BusinessEvent::AlarmCancelToggled => Some(AlarmEvent::AlarmCancel),
        BusinessEvent::MonitorRecover => Some(AlarmEvent::Recover),
        other => safety_alarm(other),
    }
}

/// Drain order of one batch: P1 first, arrival order within a priority.
pub fn prioritize(batch: &mut [EventMessage]) {
    batch.sort_by_key(|message| message.priority);
}

/// States of all three routing participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemStatus {
    pub system: SystemState,
    pub alarm: AlarmState,
    pub apply_ammo: ApplyAmmoState,
}

enum Control {
    Finish,
    Status(oneshot::Sender<Result<SystemStatus>>),
    Shutdown,
}

/// Handle to the running orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    inbox: mpsc::Sender<EventMessage>,
    control: mpsc::Sender<Control>,
}

impl OrchestratorHandle {
    /// Spawn the orchestrator together with its alarm and apply-ammo actors.
    pub fn spawn(effects: Effects, settings: ApplyAmmoSettings) -> (Self, JoinHandle<()>) {
        let now = Instant::now();
        let (inbox_tx, inbox_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(8);

        let (alarm, _) = AlarmHandle::spawn(AlarmCore::new(effects.clone(), now), inbox_tx.clone());
        let (apply, _) = ApplyAmmoHandle::spawn(ApplyAmmoCore::new(settings, effects, now), inbox_tx.clone());

        let children = Children { alarm, apply };
        let task = tokio::spawn(run(Router::new(now), children, inbox_rx, control_rx));
        (
            Self {
                inbox: inbox_tx,
                control: control_tx,
            },
            task,
        )
    }

    /// Sender for events addressed to the orchestrator, e.g. the monitor's
    /// parent channel.
    pub fn inbox(&self) -> mpsc::Sender<EventMessage> {
        self.inbox.clone()
    }

    pub async fn send(&self, event: BusinessEvent) -> Result<()> {
        self.inbox
            .send(EventMessage::new(event))
            .await
            .map_err(|_| MachineError::MailboxClosed("orchestrator"))
    }

    /// End the running workflow cycle by hand.
    pub async fn finish(&self) -> Result<()> {
        self.command(Control::Finish).await
    }

    pub async fn status(&self) -> Result<SystemStatus> {
        let (reply, rx) = oneshot::channel();
        self.command(Control::Status(reply)).await?;
        rx.await.map_err(|_| MachineError::MailboxClosed("orchestrator"))?
    }

    /// Stop the orchestrator. Its children stop once their handles drop.
    pub async fn shutdown(&self) -> Result<()> {
        self.command(Control::Shutdown).await
    }

    async fn command(&self, control: Control) -> Result<()> {
        self.control
            .send(control)
            .await
            .map_err(|_| MachineError::MailboxClosed("orchestrator"))
    }
}

struct Children {
    alarm: AlarmHandle,
    apply: ApplyAmmoHandle,
}

impl Children {
    async fn deliver(&self, route: Route) {
        let result = match route {
            Route::Alarm(event) => self.alarm.send(event).await,
            Route::Apply(event) => self.apply.send(event).await,
        };
        if let Err(e) = result {
            warn!(route = ?route, error = %e, "Child machine unavailable");
        }
    }

    async fn status(&self, system: SystemState) -> Result<SystemStatus> {
        Ok(SystemStatus {
            system,
            alarm: self.alarm.state().await?,
            apply_ammo: self.apply.state().await?,
        })
    }
}

async fn run(
    mut router: Router,
    children: Children,
    mut inbox: mpsc::Receiver<EventMessage>,
    mut control: mpsc::Receiver<Control>,
) {
    let mut batch = Vec::new();
    loop {
        tokio::select! {
            biased;

            command = control.recv() => match command {
                Some(Control::Finish) => {
                    if router.state() == SystemState::Normal {
                        children.deliver(Route::Apply(ApplyEvent::Finished)).await;
                    } else {
                        debug!(state = %router.state(), "Finish ignored outside a workflow");
                    }
                }
                Some(Control::Status(reply)) => {
                    let _ = reply.send(children.status(router.state()).await);
                }
                Some(Control::Shutdown) | None => break,
            },

            first = inbox.recv() => {
                let Some(first) = first else { break };
                batch.push(first);
                while let Ok(next) = inbox.try_recv() {
                    batch.push(next);
                }
                prioritize(&mut batch);

                for message in batch.drain(..) {
                    if message.priority == Priority::P1 {
                        info!(event = ?message.event, "Safety event");
                    }
                    for route in router.route(&message.event, Instant::now()) {
                        children.deliver(route).await;
                    }
                }
            }
        }
    }
    info!("Orchestrator stopped");
}
