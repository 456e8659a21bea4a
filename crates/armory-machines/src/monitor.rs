//! Monitor machine: turns raw board frames into business events.
//!
//! The monitor owns the [`RelayStatusAggregator`] and is the only consumer of
//! inbound frames. For each changed input it decides which business event
//! the change means and reports it to its parent. It also tracks whether both
//! boards are alive and raises an anomaly when one goes away.
//!
//! # Architecture
//!
//! ```text
//! TransportEvent stream ──> forward_transport_events ──> MonitorHandle
//!                                                           │
//!                                                     monitor task
//!                                                   (MonitorCore + timer)
//!                                                           │
//!                                              EventMessage ──> parent
//! ```
//!
//! # States
//!
//! - `Idle`: frames are ignored.
//! - `Waiting`: frames are decoded and the liveness check runs.
//! - `Error`: passed through whenever an anomaly is reported, then straight
//!   back to `Waiting`.
//!
//! # Liveness
//!
//! One [`LivenessStrategy`] applies to both boards. With
//! `ConnectionEvents` the transport status stream drives the connected
//! flags. With `FramePolling` a periodic check marks a board disconnected
//! when it has been silent for longer than the heartbeat interval, and its
//! next frame marks it connected again.

use std::fmt;
use std::time::Duration;

use armory_core::config::{ChannelMap, LivenessStrategy};
use armory_core::constants::EVENT_CHANNEL_CAPACITY;
use armory_core::{ChannelIndex, ConnectionStatus, ControllerConfig, Endpoint};
use armory_network::TransportEvent;
use armory_protocol::{CombinedRelayState, RelayStatusAggregator, RelayStatusReport, is_active_report_frame};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::event::{AnomalyReason, BusinessEvent, EventMessage};
use crate::history::{MachineState, TransitionLog};
use crate::timer::wait_until;
use crate::{MachineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorState {
    Idle,
    Waiting,
    Error,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Waiting => "waiting",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl MachineState for MonitorState {
    fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Waiting)
                | (Self::Waiting, Self::Idle)
                | (Self::Waiting, Self::Error)
                | (Self::Error, Self::Waiting)
        )
    }
}

/// Parameters fixed when the monitor starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub channels: ChannelMap,
    pub vibration_throttle: Duration,
    pub liveness: LivenessStrategy,
    pub check_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl MonitorSettings {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            channels: config.channels,
            vibration_throttle: config.timing.vibration_throttle(),
            liveness: config.monitor.liveness,
            check_interval: config.monitor.check_interval(),
            heartbeat_interval: config.monitor.heartbeat_interval(),
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

#[derive(Debug, Clone, Copy)]
struct Liveness {
    connected: bool,
    last_frame: Option<Instant>,
}

/// Decision logic of the monitor, free of any task or channel.
///
/// Every input returns the events to report, in order.
#[derive(Debug)]
pub struct MonitorCore {
    settings: MonitorSettings,
    log: TransitionLog<MonitorState>,
    aggregator: RelayStatusAggregator,
    last_vibration: Option<Instant>,
    links: [Liveness; 2],
    alarming: bool,
    started_at: Instant,
    next_check: Option<Instant>,
}

impl MonitorCore {
    /// Create an idle monitor.
    ///
    /// `cabinet` and `control` seed the connected flags from the manager's
    /// snapshot. Under frame polling both start connected and the first
    /// check decides.
    pub fn new(settings: MonitorSettings, cabinet: bool, control: bool, now: Instant) -> Self {
        let polling = settings.liveness == LivenessStrategy::FramePolling;
        let link = |connected: bool| Liveness {
            connected: connected || polling,
            last_frame: None,
        };
        Self {
            settings,
            log: TransitionLog::new(MonitorState::Idle, now),
            aggregator: RelayStatusAggregator::new(),
            last_vibration: None,
            links: [link(cabinet), link(control)],
            alarming: false,
            started_at: now,
            next_check: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.log.current()
    }

    pub fn history(&self) -> &TransitionLog<MonitorState> {
        &self.log
    }

    pub fn is_alarming(&self) -> bool {
        self.alarming
    }

    pub fn is_connected(&self, endpoint: Endpoint) -> bool {
        self.link(endpoint).connected
    }

    /// When the next liveness check is due, if one is armed.
    pub fn next_check(&self) -> Option<Instant> {
        self.next_check
    }

    /// Begin processing frames.
    ///
    /// A board that is already down when monitoring starts raises the
    /// anomaly right away.
    pub fn start(&mut self, now: Instant) -> Vec<EventMessage> {
        if !self.enter(MonitorState::Waiting, now) {
            return Vec::new();
        }
        self.started_at = now;
        if self.settings.liveness == LivenessStrategy::FramePolling {
            self.next_check = Some(now + self.settings.check_interval);
        }

        let mut events = Vec::new();
        if !self.all_connected() {
            events.push(self.connection_update());
            self.raise_anomaly(AnomalyReason::Connection, now, &mut events);
        }
        events
    }

    pub fn stop(&mut self, now: Instant) {
        if self.enter(MonitorState::Idle, now) {
            self.next_check = None;
        }
    }

    /// Decode one inbound frame and derive business events from it.
    pub fn handle_frame(&mut self, endpoint: Endpoint, payload: &[u8], now: Instant) -> Vec<EventMessage> {
        if !self.log.is(MonitorState::Waiting) {
            trace!(endpoint = %endpoint, state = %self.state(), "Frame ignored while not monitoring");
            return Vec::new();
        }

        let mut events = Vec::new();
        self.link_mut(endpoint).last_frame = Some(now);
        if self.settings.liveness == LivenessStrategy::FramePolling {
            self.set_connected(endpoint, true, AnomalyReason::Heartbeat, now, &mut events);
        }

        if !is_active_report_frame(payload) {
            debug!(endpoint = %endpoint, len = payload.len(), "Skipping frame that is not an active report");
            return events;
        }
        let Some(report) = RelayStatusReport::parse(payload) else {
            return events;
        };
        let Some(update) = self.aggregator.update(endpoint, &report) else {
            return events;
        };
        info!(endpoint = %endpoint, changes = %update.changes.join(", "), "Input state changed");

        self.derive_events(&update, now, &mut events);
        events
    }

    fn derive_events(&mut self, update: &CombinedRelayState, now: Instant, events: &mut Vec<EventMessage>) {
        let channels = self.settings.channels;
        let changed = |index: ChannelIndex| update.has_edge(index);
        let closed = |index: ChannelIndex| update.is_closed(index);
        let mut emit = |event: BusinessEvent| events.push(EventMessage::new(event));

        if changed(channels.apply) && closed(channels.apply) {
            emit(BusinessEvent::ApplyRequest);
        }
        if changed(channels.auth_pass) && closed(channels.auth_pass) {
            emit(BusinessEvent::AuthorizeRequest);
        }
        if changed(channels.auth_cancel) && closed(channels.auth_cancel) {
            emit(BusinessEvent::RefuseRequest);
        }
        if changed(channels.cabinet_door) {
            emit(BusinessEvent::CabinetLockChanged {
                is_closed: !self.sensor_active(closed(channels.cabinet_door)),
            });
        }
        if changed(channels.door_lock) {
            emit(BusinessEvent::DoorLockSwitchChanged {
                is_open: self.sensor_active(closed(channels.door_lock)),
            });
        }
        if changed(channels.key) {
            if self.sensor_active(closed(channels.key)) {
                emit(BusinessEvent::KeyDetected);
            } else {
                emit(BusinessEvent::KeyReset);
            }
        }
        if changed(channels.vibration) && closed(channels.vibration) {
            let throttled = self
                .last_vibration
                .is_some_and(|last| now.saturating_duration_since(last) <= self.settings.vibration_throttle);
            if throttled {
                debug!(channel = %channels.vibration, "Vibration within throttle window, dropped");
            } else {
                self.last_vibration = Some(now);
                emit(BusinessEvent::VibrationDetected);
            }
        }

        let cancel = channels.alarm_cancel;
        let owner = cancel.endpoint();
        if self.aggregator.has_active_report_trigger(cancel, owner, update) {
            self.aggregator.reset_channel_state(owner, cancel);
            emit(BusinessEvent::AlarmCancelToggled);
        }
    }

    /// Sensors wired normally-open read inverted.
    fn sensor_active(&self, raw: bool) -> bool {
        if self.settings.channels.invert_sensor_state { raw } else { !raw }
    }

    /// Apply a link status change from the transport layer.
    ///
    /// Ignored under frame polling.
    pub fn handle_status(&mut self, endpoint: Endpoint, status: ConnectionStatus, now: Instant) -> Vec<EventMessage> {
        let mut events = Vec::new();
        if self.settings.liveness != LivenessStrategy::ConnectionEvents {
            return events;
        }
        match status {
            ConnectionStatus::Connected => {
                self.set_connected(endpoint, true, AnomalyReason::Connection, now, &mut events);
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Error => {
                self.set_connected(endpoint, false, AnomalyReason::Connection, now, &mut events);
            }
            ConnectionStatus::Connecting => {}
        }
        events
    }

    /// Run the frame polling check if it is due.
    pub fn check_liveness(&mut self, now: Instant) -> Vec<EventMessage> {
        let mut events = Vec::new();
        match self.next_check {
            Some(due) if due <= now => {}
            _ => return events,
        }
        self.next_check = Some(now + self.settings.check_interval);

        for endpoint in Endpoint::ALL {
            let link = self.link(endpoint);
            let last = link.last_frame.unwrap_or(self.started_at);
            let silent = now.saturating_duration_since(last);
            if link.connected && silent > self.settings.heartbeat_interval {
                warn!(endpoint = %endpoint, silent_ms = silent.as_millis() as u64, "No frame within heartbeat interval");
                self.set_connected(endpoint, false, AnomalyReason::Heartbeat, now, &mut events);
            }
        }
        events
    }

    fn set_connected(
        &mut self,
        endpoint: Endpoint,
        connected: bool,
        reason: AnomalyReason,
        now: Instant,
        events: &mut Vec<EventMessage>,
    ) {
        if self.link(endpoint).connected == connected {
            return;
        }
        self.link_mut(endpoint).connected = connected;
        info!(endpoint = %endpoint, connected, "Endpoint connectivity changed");

        if !self.log.is(MonitorState::Waiting) {
            return;
        }
        events.push(self.connection_update());

        if !connected {
            self.raise_anomaly(reason, now, events);
        } else if self.alarming && self.all_connected() {
            self.alarming = false;
            info!("All endpoints connected again");
            events.push(EventMessage::new(BusinessEvent::MonitorRecover));
        }
    }

    fn raise_anomaly(&mut self, reason: AnomalyReason, now: Instant, events: &mut Vec<EventMessage>) {
        if self.alarming {
            return;
        }
        self.alarming = true;
        self.enter(MonitorState::Error, now);
        warn!(%reason, "Monitor anomaly");
        events.push(EventMessage::new(BusinessEvent::MonitorAnomaly { reason }));
        self.enter(MonitorState::Waiting, now);
    }

    fn connection_update(&self) -> EventMessage {
        EventMessage::new(BusinessEvent::MonitorConnectionUpdate {
            cabinet: self.is_connected(Endpoint::Cabinet),
            control: self.is_connected(Endpoint::Control),
        })
    }

    fn all_connected(&self) -> bool {
        self.links.iter().all(|link| link.connected)
    }

    fn link(&self, endpoint: Endpoint) -> &Liveness {
        &self.links[slot(endpoint)]
    }

    fn link_mut(&mut self, endpoint: Endpoint) -> &mut Liveness {
        &mut self.links[slot(endpoint)]
    }

    fn enter(&mut self, next: MonitorState, now: Instant) -> bool {
        match self.log.transition_to(next, now) {
            Ok(transition) => {
                debug!(from = %transition.from, to = %transition.to, "Monitor transition");
                true
            }
            Err(e) => {
                debug!(error = %e, "Monitor transition ignored");
                false
            }
        }
    }
}

fn slot(endpoint: Endpoint) -> usize {
    match endpoint {
        Endpoint::Cabinet => 0,
        Endpoint::Control => 1,
    }
}

enum MonitorCommand {
    Start,
    Stop,
    Frame { endpoint: Endpoint, payload: Bytes },
    Status { endpoint: Endpoint, status: ConnectionStatus },
    State(oneshot::Sender<MonitorState>),
}

/// Handle to a running monitor task.
///
/// Dropping every handle stops the task.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    /// Spawn the monitor task. Events are reported to `parent`.
    pub fn spawn(core: MonitorCore, parent: mpsc::Sender<EventMessage>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let task = tokio::spawn(run(core, rx, parent));
        (Self { tx }, task)
    }

    pub async fn start(&self) -> Result<()> {
        self.command(MonitorCommand::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.command(MonitorCommand::Stop).await
    }

    pub async fn frame(&self, endpoint: Endpoint, payload: Bytes) -> Result<()> {
        self.command(MonitorCommand::Frame { endpoint, payload }).await
    }

    pub async fn status(&self, endpoint: Endpoint, status: ConnectionStatus) -> Result<()> {
        self.command(MonitorCommand::Status { endpoint, status }).await
    }

    pub async fn state(&self) -> Result<MonitorState> {
        let (reply, rx) = oneshot::channel();
        self.command(MonitorCommand::State(reply)).await?;
        rx.await.map_err(|_| MachineError::MailboxClosed("monitor"))
    }

    async fn command(&self, command: MonitorCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| MachineError::MailboxClosed("monitor"))
    }
}

async fn run(mut core: MonitorCore, mut rx: mpsc::Receiver<MonitorCommand>, parent: mpsc::Sender<EventMessage>) {
    loop {
        let events = tokio::select! {
            biased;

            () = wait_until(core.next_check()) => core.check_liveness(Instant::now()),

            command = rx.recv() => {
                let Some(command) = command else { break };
                let now = Instant::now();
                match command {
                    MonitorCommand::Start => core.start(now),
                    MonitorCommand::Stop => {
                        core.stop(now);
                        Vec::new()
                    }
                    MonitorCommand::Frame { endpoint, payload } => core.handle_frame(endpoint, &payload, now),
                    MonitorCommand::Status { endpoint, status } => core.handle_status(endpoint, status, now),
                    MonitorCommand::State(reply) => {
                        let _ = reply.send(core.state());
                        Vec::new()
                    }
                }
            }
        };

        for message in events {
            debug!(event = ?message.event, priority = ?message.priority, "Monitor reporting");
            if parent.send(message).await.is_err() {
                debug!("Monitor parent gone, event dropped");
            }
        }
    }
    debug!("Monitor task stopped");
}

/// Feed a manager event stream into the monitor until either side closes.
///
/// Events from endpoint ids the monitor does not know are dropped.
pub async fn forward_transport_events(mut events: mpsc::Receiver<TransportEvent>, monitor: MonitorHandle) {
    while let Some(event) = events.recv().await {
        let Some(endpoint) = Endpoint::from_id(event.endpoint()) else {
            debug!(endpoint = event.endpoint(), "Event from unknown endpoint dropped");
            continue;
        };
        let delivered = match event {
            TransportEvent::Data { payload, .. } => monitor.frame(endpoint, payload).await,
            TransportEvent::Status { status, .. } => monitor.status(endpoint, status).await,
        };
        if delivered.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armory_protocol::encode_active_report;

    fn settings() -> MonitorSettings {
        MonitorSettings::default()
    }

    fn started(settings: MonitorSettings, now: Instant) -> MonitorCore {
        let mut core = MonitorCore::new(settings, true, true, now);
        assert!(core.start(now).is_empty());
        core
    }

    fn frame(input: u8) -> [u8; 9] {
        encode_active_report(0x01, 0x00, input, 0x00, 0x00)
    }

    fn kinds(events: &[EventMessage]) -> Vec<BusinessEvent> {
        events.iter().map(|message| message.event.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_ignored_while_idle() {
        let now = Instant::now();
        let mut core = MonitorCore::new(settings(), true, true, now);
        assert!(core.handle_frame(Endpoint::Cabinet, &frame(0x01), now).is_empty());
        assert_eq!(core.state(), MonitorState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_rising_edge() {
        let now = Instant::now();
        let mut core = started(settings(), now);

        let events = core.handle_frame(Endpoint::Cabinet, &frame(0b0000_0001), now);
        assert_eq!(kinds(&events), vec![BusinessEvent::ApplyRequest]);

        // Release: changed but open, nothing to report.
        assert!(core.handle_frame(Endpoint::Cabinet, &frame(0x00), now).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_buttons() {
        let now = Instant::now();
        let mut core = started(settings(), now);

        // auth_pass is combined 12, local 4 on the control board.
        let events = core.handle_frame(Endpoint::Control, &frame(0b0001_0000), now);
        assert_eq!(kinds(&events), vec![BusinessEvent::AuthorizeRequest]);

        // auth_cancel is combined 11, local 3.
        let events = core.handle_frame(Endpoint::Control, &frame(0b0001_1000), now);
        assert_eq!(kinds(&events), vec![BusinessEvent::RefuseRequest]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_door_and_lock_switches() {
        let now = Instant::now();
        let mut core = started(settings(), now);

        let events = core.handle_frame(Endpoint::Cabinet, &frame(0b0000_0110), now);
        assert_eq!(
            kinds(&events),
            vec![
                BusinessEvent::CabinetLockChanged { is_closed: true },
                BusinessEvent::DoorLockSwitchChanged { is_open: false },
            ]
        );

        let events = core.handle_frame(Endpoint::Cabinet, &frame(0x00), now);
        assert_eq!(
            kinds(&events),
            vec![
                BusinessEvent::CabinetLockChanged { is_closed: false },
                BusinessEvent::DoorLockSwitchChanged { is_open: true },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_door_and_lock_switches_respect_inversion() {
        let now = Instant::now();
        let mut inverted = settings();
        inverted.channels.invert_sensor_state = true;
        let mut core = started(inverted, now);

        let events = core.handle_frame(Endpoint::Cabinet, &frame(0b0000_0110), now);
        assert_eq!(
            kinds(&events),
            vec![
                BusinessEvent::CabinetLockChanged { is_closed: false },
                BusinessEvent::DoorLockSwitchChanged { is_open: true },
            ]
        );

        let events = core.handle_frame(Endpoint::Cabinet, &frame(0x00), now);
        assert_eq!(
            kinds(&events),
            vec![
                BusinessEvent::CabinetLockChanged { is_closed: true },
                BusinessEvent::DoorLockSwitchChanged { is_open: false },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_switch_respects_inversion() {
        let now = Instant::now();
        let mut core = started(settings(), now);
        assert_eq!(
            kinds(&core.handle_frame(Endpoint::Cabinet, &frame(0b0000_1000), now)),
            vec![BusinessEvent::KeyReset]
        );
        assert_eq!(
            kinds(&core.handle_frame(Endpoint::Cabinet, &frame(0x00), now)),
            vec![BusinessEvent::KeyDetected]
        );

        let mut inverted = settings();
        inverted.channels.invert_sensor_state = true;
        let mut core = started(inverted, now);
        let events = core.handle_frame(Endpoint::Cabinet, &frame(0b0000_1000), now);
        assert_eq!(kinds(&events), vec![BusinessEvent::KeyDetected]);
        assert_eq!(events[0].priority, crate::Priority::P1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vibration_throttle() {
        let start = Instant::now();
        let mut core = started(settings(), start);
        let mut detected = 0;

        for at_ms in [0u64, 3000, 5001] {
            let now = start + Duration::from_millis(at_ms);
            // Pulse the vibration input so every frame carries a rising edge.
            core.handle_frame(Endpoint::Cabinet, &frame(0x00), now);
            let events = core.handle_frame(Endpoint::Cabinet, &frame(0b0001_0000), now);
            detected += events
                .iter()
                .filter(|message| message.event == BusinessEvent::VibrationDetected)
                .count();
            if at_ms == 3000 {
                assert_eq!(detected, 1);
            }
        }
        assert_eq!(detected, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarm_cancel_button_rearms() {
        let now = Instant::now();
        let mut core = started(settings(), now);
        let pulse = frame(0b0000_0100);

        let events = core.handle_frame(Endpoint::Control, &pulse, now);
        assert_eq!(kinds(&events), vec![BusinessEvent::AlarmCancelToggled]);

        // Same frame again: the consumed trigger fires once more.
        let events = core.handle_frame(Endpoint::Control, &pulse, now);
        assert_eq!(kinds(&events), vec![BusinessEvent::AlarmCancelToggled]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_dropped() {
        let now = Instant::now();
        let mut core = started(settings(), now);
        assert!(core.handle_frame(Endpoint::Cabinet, &[0xCC, 0xDD, 0xA1], now).is_empty());
        assert!(core.handle_frame(Endpoint::Cabinet, &frame(0x01)[..8], now).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_and_recovery() {
        let now = Instant::now();
        let mut core = started(settings(), now);

        let events = core.handle_status(Endpoint::Control, ConnectionStatus::Error, now);
        assert_eq!(
            kinds(&events),
            vec![
                BusinessEvent::MonitorConnectionUpdate { cabinet: true, control: false },
                BusinessEvent::MonitorAnomaly { reason: AnomalyReason::Connection },
            ]
        );
        assert!(core.is_alarming());
        assert_eq!(core.state(), MonitorState::Waiting);
        let path: Vec<_> = core.history().last_transitions(2).iter().map(|t| t.to).collect();
        assert_eq!(path, vec![MonitorState::Error, MonitorState::Waiting]);

        // Second board lost while alarming: update only.
        let events = core.handle_status(Endpoint::Cabinet, ConnectionStatus::Disconnected, now);
        assert_eq!(
            kinds(&events),
            vec![BusinessEvent::MonitorConnectionUpdate { cabinet: false, control: false }]
        );

        assert!(core.handle_status(Endpoint::Cabinet, ConnectionStatus::Connecting, now).is_empty());
        core.handle_status(Endpoint::Cabinet, ConnectionStatus::Connected, now);
        let events = core.handle_status(Endpoint::Control, ConnectionStatus::Connected, now);
        assert_eq!(
            kinds(&events),
            vec![
                BusinessEvent::MonitorConnectionUpdate { cabinet: true, control: true },
                BusinessEvent::MonitorRecover,
            ]
        );
        assert!(!core.is_alarming());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_board_down_raises_anomaly() {
        let now = Instant::now();
        let mut core = MonitorCore::new(settings(), true, false, now);
        let events = core.start(now);
        assert_eq!(
            kinds(&events),
            vec![
                BusinessEvent::MonitorConnectionUpdate { cabinet: true, control: false },
                BusinessEvent::MonitorAnomaly { reason: AnomalyReason::Connection },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_polling_liveness() {
        let start = Instant::now();
        let mut polling = settings();
        polling.liveness = LivenessStrategy::FramePolling;
        let mut core = started(polling, start);
        assert_eq!(core.next_check(), Some(start + polling.check_interval));

        // Status events do not count under polling.
        assert!(core.handle_status(Endpoint::Cabinet, ConnectionStatus::Error, start).is_empty());

        let t1 = start + Duration::from_secs(30);
        core.handle_frame(Endpoint::Cabinet, &frame(0x00), t1);
        assert!(core.check_liveness(t1).is_empty());

        // Control has been silent since start; the next check is at 60 s.
        let t2 = start + Duration::from_secs(50);
        assert!(core.check_liveness(t2).is_empty(), "check not yet due");
        let t3 = start + Duration::from_secs(60 + 30);
        let events = core.check_liveness(t3);
        assert_eq!(
            kinds(&events),
            vec![
                BusinessEvent::MonitorConnectionUpdate { cabinet: true, control: false },
                BusinessEvent::MonitorAnomaly { reason: AnomalyReason::Heartbeat },
            ]
        );

        // A fresh frame reconnects and recovers.
        let events = core.handle_frame(Endpoint::Control, &frame(0x00), t3);
        assert_eq!(
            kinds(&events),
            vec![
                BusinessEvent::MonitorConnectionUpdate { cabinet: true, control: true },
                BusinessEvent::MonitorRecover,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_actor_reports_to_parent() {
        let (parent, mut inbox) = mpsc::channel(16);
        let core = MonitorCore::new(settings(), true, true, Instant::now());
        let (handle, _task) = MonitorHandle::spawn(core, parent);

        handle.start().await.unwrap();
        assert_eq!(handle.state().await.unwrap(), MonitorState::Waiting);

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(forward_transport_events(rx, handle.clone()));
        tx.send(TransportEvent::Data {
            endpoint: "cabinet".into(),
            kind: armory_core::TransportKind::Tcp,
            payload: Bytes::copy_from_slice(&frame(0b0000_0001)),
        })
        .await
        .unwrap();

        let message = inbox.recv().await.unwrap();
        assert_eq!(message.event, BusinessEvent::ApplyRequest);

        handle.stop().await.unwrap();
        assert_eq!(handle.state().await.unwrap(), MonitorState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_actor_runs_polling_timer() {
        let (parent, mut inbox) = mpsc::channel(16);
        let mut polling = settings();
        polling.liveness = LivenessStrategy::FramePolling;
        let core = MonitorCore::new(polling, true, true, Instant::now());
        let (handle, _task) = MonitorHandle::spawn(core, parent);
        handle.start().await.unwrap();

        tokio::time::advance(Duration::from_secs(90)).await;
        let first = inbox.recv().await.unwrap();
        assert!(matches!(first.event, BusinessEvent::MonitorConnectionUpdate { .. }));
        let second = inbox.recv().await.unwrap();
        assert_eq!(
            second.event,
            BusinessEvent::MonitorAnomaly { reason: AnomalyReason::Heartbeat }
        );
    }
}
