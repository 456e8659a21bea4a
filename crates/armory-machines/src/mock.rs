//! Recording doubles for the side-effect capabilities.
//!
//! Both record what the machines asked for so tests can assert on exact
//! relay commands and announcement texts.

use std::sync::{Mutex, MutexGuard, PoisonError};

use armory_core::{Endpoint, RelayChannel};
use armory_protocol::{RelayAction, RelayCommand, RelaySelector};
use bytes::Bytes;

use crate::ports::{Announcer, CommandSink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Command sink that keeps every dispatched payload.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(Endpoint, Bytes)>>,
}

impl RecordingSink {
    /// Raw payloads in dispatch order.
    pub fn payloads(&self) -> Vec<(Endpoint, Bytes)> {
        lock(&self.sent).clone()
    }

    /// Payloads decoded back into relay commands.
    ///
    /// Payloads that are not single-channel relay frames are skipped.
    pub fn commands(&self) -> Vec<(Endpoint, RelayCommand)> {
        lock(&self.sent)
            .iter()
            .filter_map(|(endpoint, payload)| decode(payload).map(|command| (*endpoint, command)))
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.sent).clear();
    }
}

impl CommandSink for RecordingSink {
    fn dispatch(&self, endpoint: Endpoint, payload: Bytes) {
        lock(&self.sent).push((endpoint, payload));
    }
}

fn decode(payload: &[u8]) -> Option<RelayCommand> {
    let [_, _, _, _, _, set, _, enable, ..] = *payload else {
        return None;
    };
    let selector = if enable == 0xFF {
        RelaySelector::All
    } else {
        let channel = enable.trailing_zeros() as u8 + 1;
        RelaySelector::Channel(RelayChannel::new(channel).ok()?)
    };
    let action = if set == 0 {
        RelayAction::Open
    } else {
        RelayAction::Close
    };
    let command = RelayCommand::new(action, selector);
    (command.encode().as_ref() == payload).then_some(command)
}

/// Announcer that keeps every announcement.
#[derive(Debug, Default)]
pub struct RecordingAnnouncer {
    texts: Mutex<Vec<(Endpoint, String)>>,
}

impl RecordingAnnouncer {
    pub fn texts(&self) -> Vec<(Endpoint, String)> {
        lock(&self.texts).clone()
    }

    /// Texts announced on one side, in order.
    pub fn texts_for(&self, side: Endpoint) -> Vec<String> {
        lock(&self.texts)
            .iter()
            .filter(|(target, _)| *target == side)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.texts).clear();
    }
}

impl Announcer for RecordingAnnouncer {
    fn announce(&self, target: Endpoint, text: &str) {
        lock(&self.texts).push((target, text.to_string()));
    }
}
