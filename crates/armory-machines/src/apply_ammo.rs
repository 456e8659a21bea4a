//! Apply-ammo workflow: apply, authorize, open, take, close.
//!
//! # States
//!
//! - `Idle`: no request pending.
//! - `Applying`: the request light is on; the request is re-announced every
//!   auth retry interval until someone decides.
//! - `Authorized`: the door lock relay released the door.
//! - `LockOpen`: the mechanical lock was turned open as well.
//! - `DoorOpen`: the door is open; the door-open timer runs.
//! - `DoorOpenTimeout`: the door stayed open too long, alarm lights on.
//! - `DoorOpenAlarmCancelled`: the timeout alarm was silenced but the door is
//!   still open, so the same timer runs again.
//! - `Refused` and `DoorClosed` are passed through on the way back to `Idle`.
//!
//! # Valid Transitions
//!
//! - Idle → Applying → Authorized ⇄ LockOpen
//! - Authorized / LockOpen → DoorOpen → DoorOpenTimeout ⇄ DoorOpenAlarmCancelled
//! - DoorOpen / DoorOpenTimeout / DoorOpenAlarmCancelled → DoorClosed → Idle
//! - Applying → Refused → Idle
//! - any non-idle state → Idle on `Finished` or `Abort`

use std::fmt;
use std::time::Duration;

use armory_core::config::TimingConfig;
use armory_core::constants::EVENT_CHANNEL_CAPACITY;
use armory_core::{ControllerConfig, Endpoint};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::event::{BusinessEvent, EventMessage};
use crate::history::{MachineState, TransitionLog};
use crate::ports::Effects;
use crate::timer::wait_until;
use crate::{MachineError, Result};

const APPLY_CABINET_TEXT: &str = "已申请，请等待授权";
const APPLY_CONTROL_TEXT: &str = "申请供弹请授权";
const AUTHORIZED_CABINET_TEXT: &str = "授权通过，已开锁请打开柜门";
const AUTHORIZED_CONTROL_TEXT: &str = "授权通过，已开锁";
const REFUSED_TEXT: &str = "授权未通过，供弹结束";
const LOCK_OPEN_CABINET_TEXT: &str = "门锁已拧开，请打开柜门";
const LOCK_OPEN_CONTROL_TEXT: &str = "门锁已拧开";
const DOOR_OPEN_CABINET_TEXT: &str = "已开门，请取弹，取弹后请关闭柜门";
const DOOR_OPEN_CONTROL_TEXT: &str = "柜门已打开";
const DOOR_TIMEOUT_TEXT: &str = "柜门超时未关";
const CANCEL_TEXT: &str = "取消报警";
const COMPLETE_TEXT: &str = "供弹完毕";
const CYCLE_ENDED_TEXT: &str = "本次申请已结束";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyAmmoState {
    Idle,
    Applying,
    Authorized,
    Refused,
    LockOpen,
    DoorOpen,
    DoorOpenTimeout,
    DoorOpenAlarmCancelled,
    DoorClosed,
}

impl ApplyAmmoState {
    /// Door open, with or without the timeout alarm.
    pub fn is_door_open(&self) -> bool {
        matches!(
            self,
            Self::DoorOpen | Self::DoorOpenTimeout | Self::DoorOpenAlarmCancelled
        )
    }
}

impl fmt::Display for ApplyAmmoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Applying => "applying",
            Self::Authorized => "authorized",
            Self::Refused => "refused",
            Self::LockOpen => "lock_open",
            Self::DoorOpen => "door_open",
            Self::DoorOpenTimeout => "door_open_timeout",
            Self::DoorOpenAlarmCancelled => "door_open_alarm_cancelled",
            Self::DoorClosed => "door_closed",
        };
        f.write_str(s)
    }
}

impl MachineState for ApplyAmmoState {
    fn can_transition_to(&self, next: &Self) -> bool {
        use ApplyAmmoState::*;
        match (self, next) {
            (Idle, Applying) => true,
            (Applying, Authorized | Refused) => true,
            (Refused | DoorClosed, Idle) => true,
            (Authorized, LockOpen) | (LockOpen, Authorized) => true,
            (Authorized | LockOpen, DoorOpen) => true,
            (DoorOpen | DoorOpenAlarmCancelled, DoorOpenTimeout) => true,
            (DoorOpenTimeout, DoorOpenAlarmCancelled) => true,
            (DoorOpen | DoorOpenTimeout | DoorOpenAlarmCancelled, DoorClosed) => true,
            // Finished and Abort.
            (from, Idle) => *from != Idle,
            _ => false,
        }
    }
}

/// Inputs of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyEvent {
    Apply,
    Authorized,
    Refuse,
    DoorLockOpen,
    DoorLockClose,
    DoorOpen,
    DoorClose,
    AlarmCancel,
    /// Manual end of the cycle.
    Finished,
    /// Silent reset when a safety alarm preempts the workflow.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyAmmoSettings {
    pub door_open_timeout: Duration,
    pub auth_retry_interval: Duration,
}

impl ApplyAmmoSettings {
    pub fn from_timing(timing: &TimingConfig) -> Self {
        Self {
            door_open_timeout: timing.door_open_timeout(),
            auth_retry_interval: timing.auth_retry_interval(),
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::from_timing(&config.timing)
    }
}

impl Default for ApplyAmmoSettings {
    fn default() -> Self {
        Self::from_timing(&TimingConfig::default())
    }
}

/// Decision logic of the workflow.
///
/// The actor loop owns the clock: it calls [`ApplyAmmoCore::on_timer`] once
/// [`ApplyAmmoCore::deadline`] passes.
pub struct ApplyAmmoCore {
    settings: ApplyAmmoSettings,
    effects: Effects,
    log: TransitionLog<ApplyAmmoState>,
    deadline: Option<Instant>,
}

impl ApplyAmmoCore {
    pub fn new(settings: ApplyAmmoSettings, effects: Effects, now: Instant) -> Self {
        Self {
            settings,
            effects,
            log: TransitionLog::new(ApplyAmmoState::Idle, now),
            deadline: None,
        }
    }

    pub fn state(&self) -> ApplyAmmoState {
        self.log.current()
    }

    pub fn history(&self) -> &TransitionLog<ApplyAmmoState> {
        &self.log
    }

    /// When the armed timer of the current state fires.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Handle one event, returning the notifications for the parent.
    pub fn handle(&mut self, event: ApplyEvent, now: Instant) -> Vec<EventMessage> {
        use ApplyAmmoState as S;
        use ApplyEvent as E;

        let relays = *self.effects.relays();
        let state = self.state();
        match (state, event) {
            (S::Idle, E::Apply) => {
                self.enter(S::Applying, now);
                self.effects.close(relays.apply_light);
                self.announce_request();
                self.deadline = Some(now + self.settings.auth_retry_interval);
            }
            (S::Applying, E::Authorized) => {
                self.enter(S::Authorized, now);
                self.effects.close(relays.door_lock);
                self.effects.announce(Endpoint::Cabinet, AUTHORIZED_CABINET_TEXT);
                self.effects.announce(Endpoint::Control, AUTHORIZED_CONTROL_TEXT);
            }
            (S::Applying, E::Refuse) => {
                self.enter(S::Refused, now);
                self.effects.open(relays.apply_light);
                self.effects.announce_both(REFUSED_TEXT);
                self.enter(S::Idle, now);
                return vec![EventMessage::new(BusinessEvent::OperationComplete)];
            }
            (S::Authorized, E::DoorLockOpen) => {
                self.enter(S::LockOpen, now);
                self.effects.close(relays.lock_indicator);
                self.effects.announce(Endpoint::Cabinet, LOCK_OPEN_CABINET_TEXT);
                self.effects.announce(Endpoint::Control, LOCK_OPEN_CONTROL_TEXT);
            }
            (S::LockOpen, E::DoorLockClose) => {
                self.enter(S::Authorized, now);
                self.effects.open(relays.lock_indicator);
            }
            (S::Authorized | S::LockOpen, E::DoorOpen) => {
                self.enter(S::DoorOpen, now);
                self.effects.announce(Endpoint::Cabinet, DOOR_OPEN_CABINET_TEXT);
                self.effects.announce(Endpoint::Control, DOOR_OPEN_CONTROL_TEXT);
                self.deadline = Some(now + self.settings.door_open_timeout);
            }
            (S::DoorOpenTimeout, E::AlarmCancel) => {
                self.enter(S::DoorOpenAlarmCancelled, now);
                self.effects.alarm_lights_off();
                self.effects.announce_both(CANCEL_TEXT);
                self.deadline = Some(now + self.settings.door_open_timeout);
            }
            (S::DoorOpen | S::DoorOpenTimeout | S::DoorOpenAlarmCancelled, E::DoorClose) => {
                self.enter(S::DoorClosed, now);
                return self.finish(now);
            }
            (S::Idle, E::Finished | E::Abort) => {
                debug!(event = ?event, "Workflow already idle");
            }
            (_, E::Finished) => {
                info!(state = %state, "Workflow finished manually");
                return self.finish(now);
            }
            (_, E::Abort) => {
                warn!(state = %state, "Workflow aborted");
                if state == S::DoorOpenTimeout {
                    self.effects.alarm_lights_off();
                }
                self.effects.open(relays.apply_light);
                self.effects.open(relays.door_lock);
                self.effects.open(relays.lock_indicator);
                self.enter(S::Idle, now);
            }
            (state, event) => {
                debug!(state = %state, event = ?event, "Workflow event ignored");
            }
        }
        Vec::new()
    }

    /// Fire the armed timer if it is due.
    pub fn on_timer(&mut self, now: Instant) -> Vec<EventMessage> {
        match self.deadline {
            Some(due) if due <= now => {}
            _ => return Vec::new(),
        }

        match self.state() {
            ApplyAmmoState::Applying => {
                info!("Still waiting for authorization");
                self.announce_request();
                self.deadline = Some(now + self.settings.auth_retry_interval);
            }
            ApplyAmmoState::DoorOpen | ApplyAmmoState::DoorOpenAlarmCancelled => {
                warn!(timeout_s = self.settings.door_open_timeout.as_secs(), "Door left open");
                self.enter(ApplyAmmoState::DoorOpenTimeout, now);
                self.effects.alarm_lights_on();
                self.effects.announce_both(DOOR_TIMEOUT_TEXT);
            }
            state => {
                debug!(state = %state, "Stale timer");
                self.deadline = None;
            }
        }
        Vec::new()
    }

    fn announce_request(&self) {
        self.effects.announce(Endpoint::Cabinet, APPLY_CABINET_TEXT);
        self.effects.announce(Endpoint::Control, APPLY_CONTROL_TEXT);
    }

    /// Close out the cycle and go back to idle.
    fn finish(&mut self, now: Instant) -> Vec<EventMessage> {
        let relays = *self.effects.relays();
        self.effects.alarm_lights_off();
        self.effects.open(relays.door_lock);
        self.effects.open(relays.lock_indicator);
        self.effects.open(relays.apply_light);
        self.effects.announce_both(COMPLETE_TEXT);
        self.effects.announce_both(CYCLE_ENDED_TEXT);
        self.enter(ApplyAmmoState::Idle, now);
        vec![EventMessage::new(BusinessEvent::OperationComplete)]
    }

    /// Every transition disarms the timer; states with one re-arm it.
    fn enter(&mut self, next: ApplyAmmoState, now: Instant) {
        self.deadline = None;
        match self.log.transition_to(next, now) {
            Ok(transition) => debug!(from = %transition.from, to = %transition.to, "Workflow transition"),
            Err(e) => debug!(error = %e, "Workflow transition ignored"),
        }
    }
}

enum ApplyCommand {
    Event(ApplyEvent),
    State(oneshot::Sender<ApplyAmmoState>),
}

/// Handle to a running workflow task.
#[derive(Clone)]
pub struct ApplyAmmoHandle {
    tx: mpsc::Sender<ApplyCommand>,
}

impl ApplyAmmoHandle {
    /// Spawn the workflow task. Notifications go to `parent`.
    pub fn spawn(core: ApplyAmmoCore, parent: mpsc::Sender<EventMessage>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let task = tokio::spawn(run(core, rx, parent));
        (Self { tx }, task)
    }

    pub async fn send(&self, event: ApplyEvent) -> Result<()> {
        self.tx
            .send(ApplyCommand::Event(event))
            .await
            .map_err(|_| MachineError::MailboxClosed("apply-ammo"))
    }

    pub async fn state(&self) -> Result<ApplyAmmoState> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ApplyCommand::State(reply))
            .await
            .map_err(|_| MachineError::MailboxClosed("apply-ammo"))?;
        rx.await.map_err(|_| MachineError::MailboxClosed("apply-ammo"))
    }
}

async fn run(mut core: ApplyAmmoCore, mut rx: mpsc::Receiver<ApplyCommand>, parent: mpsc::Sender<EventMessage>) {
    loop {
        let notifications = tokio::select! {
            biased;

            () = wait_until(core.deadline()) => core.on_timer(Instant::now()),

            command = rx.recv() => match command {
                Some(ApplyCommand::Event(event)) => core.handle(event, Instant::now()),
                Some(ApplyCommand::State(reply)) => {
                    let _ = reply.send(core.state());
                    Vec::new()
                }
                None => break,
            },
        };

        for message in notifications {
            if parent.send(message).await.is_err() {
                debug!("Workflow parent gone, notification dropped");
            }
        }
    }
    debug!("Workflow task stopped");
}
