//! Background worker thread
//!
//! A single named thread that runs the engine's background work (memtable
//! flushes and compactions) whenever it is scheduled. Requests are
//! coalesced by the engine's `bg_compaction_scheduled` flag, so the channel
//! rarely holds more than one message.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::Result;

enum WorkerMessage {
    Run,
    Shutdown,
}

pub(crate) struct BackgroundWorker {
    tx: Sender<WorkerMessage>,
    rx: Receiver<WorkerMessage>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundWorker {
    pub(crate) fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            tx,
            rx,
            handle: Mutex::new(None),
        }
    }

    /// Spawn the thread; `work` runs once per scheduled request
    pub(crate) fn start<F>(&self, name: &str, work: F) -> Result<()>
    where
        F: Fn() + Send + 'static,
    {
        let rx = self.rx.clone();
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            while let Ok(message) = rx.recv() {
                match message {
                    WorkerMessage::Run => work(),
                    WorkerMessage::Shutdown => break,
                }
            }
            tracing::debug!("Background worker exiting");
        })?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    pub(crate) fn schedule(&self) {
        // Only fails once the thread has exited
        let _ = self.tx.send(WorkerMessage::Run);
    }

    /// Stop the thread and wait for the job in progress to finish
    pub(crate) fn shutdown(&self) {
        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return;
        };
        let _ = self.tx.send(WorkerMessage::Shutdown);
        if handle.join().is_err() {
            tracing::error!("Background worker panicked");
        }
    }
}
