//! Side-effect capabilities handed to the machines.
//!
//! Machines never talk to transports or audio devices directly. They switch
//! relays through a [`CommandSink`] and speak through an [`Announcer`], both
//! injected at spawn time, which keeps every machine testable with the
//! recording doubles in [`crate::mock`].

use std::sync::Arc;

use armory_core::Endpoint;
use armory_core::config::{RelayLayout, RelayTarget};
use armory_hardware::HardwareManager;
use armory_protocol::{RelayAction, RelayCommand};
use bytes::Bytes;
use tracing::{debug, info, warn};

/// Fire-and-forget delivery of command bytes to a board.
pub trait CommandSink: Send + Sync {
    fn dispatch(&self, endpoint: Endpoint, payload: Bytes);
}

/// Voice output on either side of the cabinet.
pub trait Announcer: Send + Sync {
    fn announce(&self, target: Endpoint, text: &str);
}

/// Sends through the manager's paced queue.
///
/// Outcomes are awaited on a spawned task so a failing board is logged
/// without blocking the calling machine.
impl CommandSink for HardwareManager {
    fn dispatch(&self, endpoint: Endpoint, payload: Bytes) {
        let handle = match self.enqueue_to(endpoint.id(), payload) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Relay command rejected");
                return;
            }
        };

        tokio::spawn(async move {
            let command_id = handle.id();
            match handle.wait().await {
                Ok(outcome) => {
                    for (id, result) in outcome {
                        if let Err(e) = result {
                            warn!(endpoint = %id, %command_id, error = %e, "Relay command failed");
                        }
                    }
                }
                Err(e) => warn!(endpoint = %endpoint, %command_id, error = %e, "Relay command not sent"),
            }
        });
    }
}

/// Announcer that writes every announcement to the log.
///
/// Used by the daemon when no audio backend is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAnnouncer;

impl Announcer for TracingAnnouncer {
    fn announce(&self, target: Endpoint, text: &str) {
        info!(target_side = %target, text, "Voice announcement");
    }
}

/// Relay layout plus the two capabilities, shared by all machines.
#[derive(Clone)]
pub struct Effects {
    sink: Arc<dyn CommandSink>,
    announcer: Arc<dyn Announcer>,
    relays: RelayLayout,
}

impl Effects {
    pub fn new(sink: Arc<dyn CommandSink>, announcer: Arc<dyn Announcer>, relays: RelayLayout) -> Self {
        Self {
            sink,
            announcer,
            relays,
        }
    }

    pub fn relays(&self) -> &RelayLayout {
        &self.relays
    }

    /// Energize the relay behind `target`.
    pub fn close(&self, target: RelayTarget) {
        self.switch(target, RelayAction::Close);
    }

    /// Release the relay behind `target`.
    pub fn open(&self, target: RelayTarget) {
        self.switch(target, RelayAction::Open);
    }

    fn switch(&self, target: RelayTarget, action: RelayAction) {
        let command = RelayCommand::new(action, target.channel);
        debug!(endpoint = %target.endpoint, command = %command, "Relay command");
        self.sink.dispatch(target.endpoint, command.encode());
    }

    pub fn announce(&self, target: Endpoint, text: &str) {
        self.announcer.announce(target, text);
    }

    /// Same text on the cabinet side, then the control side.
    pub fn announce_both(&self, text: &str) {
        for side in Endpoint::ALL {
            self.announcer.announce(side, text);
        }
    }

    /// Both alarm lights on.
    pub fn alarm_lights_on(&self) {
        self.close(self.relays.cabinet_alarm);
        self.close(self.relays.control_alarm);
    }

    /// Both alarm lights off.
    pub fn alarm_lights_off(&self) {
        self.open(self.relays.cabinet_alarm);
        self.open(self.relays.control_alarm);
    }
}
