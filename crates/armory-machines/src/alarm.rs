//! Alarm machine for key, vibration and connectivity alarms.
//!
//! Entering an alarm state switches the alarm lights on and announces the
//! cause. An alarm is cleared by the operator's cancel button, or silently
//! when connectivity comes back for a monitor alarm. Either way the parent
//! is told with `AlarmCancelled`.
//!
//! # Key alarms
//!
//! A key alarm can only be cancelled after the key was turned back: the
//! machine ignores `AlarmCancel` until it has seen `KeyReset` in the same
//! episode.
//!
//! # Valid Transitions
//!
//! - Idle → KeyAlarm / VibrationAlarm / MonitorAlarm → Idle
//! - VibrationAlarm / MonitorAlarm → KeyAlarm (key takes precedence)
//! - MonitorAlarm → VibrationAlarm
//! - Idle → Active → Acknowledged → Idle, Active → Idle

use std::fmt;

use armory_core::Endpoint;
use armory_core::constants::EVENT_CHANNEL_CAPACITY;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::event::{AnomalyReason, BusinessEvent, EventMessage};
use crate::history::{MachineState, TransitionLog};
use crate::ports::Effects;
use crate::{MachineError, Result};

const KEY_ALARM_TEXT: &str = "钥匙开门请核实";
const VIBRATION_ALARM_TEXT: &str = "柜体震动报警";
const KEY_RESET_TEXT: &str = "钥匙已复位，请取消报警";
const CANCEL_TEXT: &str = "取消报警";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmState {
    Idle,
    KeyAlarm,
    VibrationAlarm,
    MonitorAlarm,
    /// Generic alarm waiting for acknowledgment.
    Active,
    Acknowledged,
}

impl AlarmState {
    /// Whether one of the hardware triggered alarms is on.
    pub fn is_alarming(&self) -> bool {
        matches!(self, Self::KeyAlarm | Self::VibrationAlarm | Self::MonitorAlarm)
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::KeyAlarm => "key_alarm",
            Self::VibrationAlarm => "vibration_alarm",
            Self::MonitorAlarm => "monitor_alarm",
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
        };
        f.write_str(s)
    }
}

impl MachineState for AlarmState {
    fn can_transition_to(&self, next: &Self) -> bool {
        use AlarmState::*;
        matches!(
            (self, next),
            (Idle, KeyAlarm | VibrationAlarm | MonitorAlarm | Active)
                | (KeyAlarm, Idle)
                | (VibrationAlarm, Idle | KeyAlarm)
                | (MonitorAlarm, Idle | KeyAlarm | VibrationAlarm)
                | (Active, Acknowledged | Idle)
                | (Acknowledged, Idle)
        )
    }
}

/// Inputs of the alarm machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmEvent {
    KeyDetected,
    KeyReset,
    Vibration,
    Monitor { reason: AnomalyReason },
    AlarmCancel,
    /// Connectivity is back.
    Recover,
    AlarmDetected,
    Acknowledge,
    Resolve,
}

/// What triggered the current episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmTrigger {
    Key,
    Vibration,
    Monitor(AnomalyReason),
}

/// Decision logic of the alarm machine.
pub struct AlarmCore {
    effects: Effects,
    log: TransitionLog<AlarmState>,
    trigger: Option<AlarmTrigger>,
    key_reset: bool,
}

impl AlarmCore {
    pub fn new(effects: Effects, now: Instant) -> Self {
        Self {
            effects,
            log: TransitionLog::new(AlarmState::Idle, now),
            trigger: None,
            key_reset: false,
        }
    }

    pub fn state(&self) -> AlarmState {
        self.log.current()
    }

    pub fn history(&self) -> &TransitionLog<AlarmState> {
        &self.log
    }

    pub fn trigger(&self) -> Option<AlarmTrigger> {
        self.trigger
    }

    /// Whether the key was turned back during this key alarm.
    pub fn key_reset(&self) -> bool {
        self.key_reset
    }

    /// Handle one event, returning the notifications for the parent.
    pub fn handle(&mut self, event: AlarmEvent, now: Instant) -> Vec<EventMessage> {
        use AlarmEvent as E;
        use AlarmState as S;

        let state = self.state();
        match (state, event) {
            (S::Idle | S::VibrationAlarm | S::MonitorAlarm, E::KeyDetected) => {
                self.enter_key_alarm(now);
            }
            (S::Idle | S::MonitorAlarm, E::Vibration) => {
                self.enter_alarm(S::VibrationAlarm, AlarmTrigger::Vibration, now);
                self.announce_vibration();
            }
            (S::Idle, E::Monitor { reason }) => {
                self.enter_alarm(S::MonitorAlarm, AlarmTrigger::Monitor(reason), now);
                self.announce_monitor(reason);
            }

            (S::KeyAlarm | S::VibrationAlarm, E::Vibration) => self.announce_vibration(),
            (S::KeyAlarm | S::VibrationAlarm, E::Monitor { reason }) => self.announce_monitor(reason),
            (S::KeyAlarm | S::VibrationAlarm | S::MonitorAlarm, E::KeyReset) => {
                if state == S::KeyAlarm {
                    self.key_reset = true;
                }
                info!(state = %state, "Key reset");
                self.effects.announce_both(KEY_RESET_TEXT);
            }

            (S::KeyAlarm, E::AlarmCancel) if !self.key_reset => {
                info!("Cancel ignored until the key is reset");
            }
            (S::KeyAlarm | S::VibrationAlarm, E::AlarmCancel) => {
                info!(state = %state, "Alarm cancelled");
                self.effects.alarm_lights_off();
                self.effects.announce_both(CANCEL_TEXT);
                return self.back_to_idle(now);
            }
            (S::MonitorAlarm, E::AlarmCancel) => {
                info!("Monitor alarm cancelled");
                self.effects.alarm_lights_off();
                self.effects.announce(Endpoint::Control, CANCEL_TEXT);
                return self.back_to_idle(now);
            }
            (S::MonitorAlarm, E::Recover) => {
                info!("Connectivity recovered, monitor alarm cleared");
                self.effects.alarm_lights_off();
                return self.back_to_idle(now);
            }

            (S::Idle, E::AlarmDetected) => self.enter(S::Active, now),
            (S::Active, E::Acknowledge) => self.enter(S::Acknowledged, now),
            (S::Active | S::Acknowledged, E::Resolve) => self.enter(S::Idle, now),

            (state, event) => {
                debug!(state = %state, event = ?event, "Alarm event ignored");
            }
        }
        Vec::new()
    }

    fn enter_key_alarm(&mut self, now: Instant) {
        self.enter_alarm(AlarmState::KeyAlarm, AlarmTrigger::Key, now);
        self.key_reset = false;
        self.effects.announce_both(KEY_ALARM_TEXT);
        self.effects.alarm_lights_on();
    }

    fn enter_alarm(&mut self, next: AlarmState, trigger: AlarmTrigger, now: Instant) {
        self.trigger = Some(trigger);
        self.enter(next, now);
    }

    fn announce_vibration(&self) {
        self.effects.announce_both(VIBRATION_ALARM_TEXT);
        self.effects.alarm_lights_on();
    }

    /// Connectivity alarms are only spoken on the control side; the alarm
    /// lights switch on both boards.
    fn announce_monitor(&self, reason: AnomalyReason) {
        info!(%reason, "Monitor alarm");
        self.effects.announce(Endpoint::Control, reason.announcement());
        self.effects.alarm_lights_on();
    }

    fn back_to_idle(&mut self, now: Instant) -> Vec<EventMessage> {
        self.enter(AlarmState::Idle, now);
        self.trigger = None;
        self.key_reset = false;
        vec![EventMessage::new(BusinessEvent::AlarmCancelled)]
    }

    fn enter(&mut self, next: AlarmState, now: Instant) {
        match self.log.transition_to(next, now) {
            Ok(transition) => debug!(from = %transition.from, to = %transition.to, "Alarm transition"),
            Err(e) => debug!(error = %e, "Alarm transition ignored"),
        }
    }
}

enum AlarmCommand {
    Event(AlarmEvent),
    State(oneshot::Sender<AlarmState>),
}

/// Handle to a running alarm task.
#[derive(Clone)]
pub struct AlarmHandle {
    tx: mpsc::Sender<AlarmCommand>,
}

impl AlarmHandle {
    /// Spawn the alarm task. Notifications go to `parent`.
    pub fn spawn(core: AlarmCore, parent: mpsc::Sender<EventMessage>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let task = tokio::spawn(run(core, rx, parent));
        (Self { tx }, task)
    }

    pub async fn send(&self, event: AlarmEvent) -> Result<()> {
        self.tx
            .send(AlarmCommand::Event(event))
            .await
            .map_err(|_| MachineError::MailboxClosed("alarm"))
    }

    pub async fn state(&self) -> Result<AlarmState> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AlarmCommand::State(reply))
            .await
            .map_err(|_| MachineError::MailboxClosed("alarm"))?;
        rx.await.map_err(|_| MachineError::MailboxClosed("alarm"))
    }
}

async fn run(mut core: AlarmCore, mut rx: mpsc::Receiver<AlarmCommand>, parent: mpsc::Sender<EventMessage>) {
    while let Some(command) = rx.recv().await {
        match command {
            AlarmCommand::Event(event) => {
                for message in core.handle(event, Instant::now()) {
                    if parent.send(message).await.is_err() {
                        debug!("Alarm parent gone, notification dropped");
                    }
                }
            }
            AlarmCommand::State(reply) => {
                let _ = reply.send(core.state());
            }
        }
    }
    debug!("Alarm task stopped");
}
