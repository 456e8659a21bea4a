use thiserror::Error;

/// Errors returned by the machines and their actor handles.
///
/// Business rule violations are not errors: an event a machine cannot handle
/// in its current state is logged and dropped.
#[derive(Debug, Error)]
pub enum MachineError {
    /// The actor task has stopped and no longer accepts messages.
    #[error("{0} mailbox closed")]
    MailboxClosed(&'static str),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

pub type Result<T> = std::result::Result<T, MachineError>;
