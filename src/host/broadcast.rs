use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorEvent {
    /// A load attempt finished, successfully or not.
    LoadFinished,
    /// The hosted instance was taken out of the session by a new load or a
    /// close. Editors built from it should be dropped.
    InstanceReleased,
}

/// Fans processor events out to every live subscriber. Subscribers whose
/// receiver was dropped are pruned on the next send.
#[derive(Default)]
pub struct ChangeBroadcaster {
    listeners: Mutex<Vec<Sender<ProcessorEvent>>>,
}

impl ChangeBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ProcessorEvent> {
        let (tx, rx) = mpsc::channel();
        match self.listeners.lock() {
            Ok(mut listeners) => listeners.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        rx
    }

    pub fn send(&self, event: ProcessorEvent) {
        let mut listeners = match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.retain(|tx| tx.send(event).is_ok());
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}
