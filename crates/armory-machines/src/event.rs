//! Business events exchanged between the machines.
//!
//! The monitor turns hardware changes into [`BusinessEvent`]s and every
//! child machine reports back to its parent with the same type. Each event
//! travels inside an [`EventMessage`] carrying its [`Priority`], so a
//! receiver can serve safety events ahead of routine ones.

use std::fmt;

use serde::Serialize;

/// Delivery priority of an event.
///
/// Ordered so that `P1 < P2`: sorting a batch puts safety events first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Priority {
    /// Safety: key detected, vibration detected, monitor anomaly.
    P1,
    /// Everything else.
    P2,
}

/// Why the monitor raised an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyReason {
    /// A link reported a disconnect or an error.
    Connection,
    /// An endpoint went silent for longer than the heartbeat interval.
    Heartbeat,
    Network,
    Other,
}

impl AnomalyReason {
    /// Voice text announced when the anomaly raises an alarm.
    pub fn announcement(&self) -> &'static str {
        match self {
            Self::Connection => "设备连接异常",
            Self::Heartbeat => "设备心跳异常",
            Self::Network => "网络连接异常",
            Self::Other => "设备状态异常",
        }
    }
}

impl fmt::Display for AnomalyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connection => "connection",
            Self::Heartbeat => "heartbeat",
            Self::Network => "network",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Everything the machines tell each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusinessEvent {
    ApplyRequest,
    AuthorizeRequest,
    RefuseRequest,
    CabinetLockChanged { is_closed: bool },
    DoorLockSwitchChanged { is_open: bool },
    KeyDetected,
    KeyReset,
    VibrationDetected,
    AlarmCancelToggled,
    MonitorConnectionUpdate { cabinet: bool, control: bool },
    MonitorAnomaly { reason: AnomalyReason },
    MonitorRecover,
    OperationComplete,
    AlarmCancelled,
}

impl BusinessEvent {
    pub fn priority(&self) -> Priority {
        match self {
            Self::KeyDetected | Self::VibrationDetected | Self::MonitorAnomaly { .. } => {
                Priority::P1
            }
            _ => Priority::P2,
        }
    }
}

/// A business event tagged with its priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventMessage {
    pub priority: Priority,
    pub event: BusinessEvent,
}

impl EventMessage {
    pub fn new(event: BusinessEvent) -> Self {
        Self {
            priority: event.priority(),
            event,
        }
    }
}

impl From<BusinessEvent> for EventMessage {
    fn from(event: BusinessEvent) -> Self {
        Self::new(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(BusinessEvent::KeyDetected, Priority::P1)]
    #[case(BusinessEvent::VibrationDetected, Priority::P1)]
    #[case(BusinessEvent::MonitorAnomaly { reason: AnomalyReason::Heartbeat }, Priority::P1)]
    #[case(BusinessEvent::KeyReset, Priority::P2)]
    #[case(BusinessEvent::ApplyRequest, Priority::P2)]
    #[case(BusinessEvent::MonitorRecover, Priority::P2)]
    #[case(BusinessEvent::OperationComplete, Priority::P2)]
    fn test_priority(#[case] event: BusinessEvent, #[case] expected: Priority) {
        assert_eq!(EventMessage::new(event).priority, expected);
    }

    #[test]
    fn test_priority_order() {
        let mut batch = vec![
            EventMessage::new(BusinessEvent::ApplyRequest),
            EventMessage::new(BusinessEvent::KeyDetected),
            EventMessage::new(BusinessEvent::KeyReset),
        ];
        batch.sort_by_key(|message| message.priority);
        assert_eq!(batch[0].event, BusinessEvent::KeyDetected);
        assert_eq!(batch[1].event, BusinessEvent::ApplyRequest);
    }

    #[test]
    fn test_serialize_tagged() {
        let json = serde_json::to_value(BusinessEvent::CabinetLockChanged { is_closed: true }).unwrap();
        assert_eq!(json["type"], "cabinet_lock_changed");
        assert_eq!(json["is_closed"], true);
    }
}
