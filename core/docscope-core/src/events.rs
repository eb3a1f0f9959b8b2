use crate::job::JobId;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A job was added, started, finished or removed.
    QueueChanged,
    /// A root scope was registered or removed.
    RootsChanged,
    /// The tree of a registered scope changed after an update.
    TreeChanged(PathBuf),
    JobFailed {
        job: JobId,
        directory: PathBuf,
        message: String,
    },
}

/// Fan-out of registry events to any number of receivers. Receivers that
/// have been dropped are forgotten on the next send.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<RegistryEvent>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> Receiver<RegistryEvent> {
        let (tx, rx) = channel();
        self.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: RegistryEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<RegistryEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
