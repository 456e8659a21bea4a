//! State machines of the armory cabinet controller.
//!
//! Three machines cooperate, each running as its own tokio task that owns
//! its state and talks to the others only through messages:
//!
//! - [`monitor`] decodes board frames into [`BusinessEvent`]s and watches
//!   board connectivity.
//! - [`alarm`] handles key, vibration and connectivity alarms.
//! - [`apply_ammo`] runs the apply, authorize, open, close workflow.
//!
//! The [`orchestrator`] receives everything the machines report and routes
//! it by system state. Machines switch relays and speak through the
//! [`ports::Effects`] capabilities they are given at spawn time.
//!
//! Every machine is split into a synchronous core that takes the current
//! instant as an argument and an actor loop around it, so the decision logic
//! is tested directly and timers are tested with a paused tokio clock.

pub mod alarm;
pub mod apply_ammo;
pub mod error;
pub mod event;
pub mod history;
pub mod mock;
pub mod monitor;
pub mod orchestrator;
pub mod ports;
mod timer;

pub use alarm::{AlarmCore, AlarmEvent, AlarmHandle, AlarmState};
pub use apply_ammo::{ApplyAmmoCore, ApplyAmmoHandle, ApplyAmmoSettings, ApplyAmmoState, ApplyEvent};
pub use error::{MachineError, Result};
pub use event::{AnomalyReason, BusinessEvent, EventMessage, Priority};
pub use monitor::{MonitorCore, MonitorHandle, MonitorSettings, MonitorState, forward_transport_events};
pub use orchestrator::{OrchestratorHandle, SystemState, SystemStatus};
pub use ports::{Announcer, CommandSink, Effects, TracingAnnouncer};
