//! Background durability loop.
//!
//! A dedicated thread wakes every `interval` and runs a sync tick. The only
//! way to stop it is [`SyncLoop::stop`] (also run on drop), which signals the
//! thread and joins it, so no tick can start after `stop` returns.

use crate::error::RebufError;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to a running sync thread.
pub struct SyncLoop {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SyncLoop {
    /// Spawns the loop. `tick` runs once per interval until stopped.
    pub fn spawn<F>(interval: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() -> Result<(), RebufError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("rebuf-sync".to_string())
            .spawn(move || {
                tracing::debug!("sync loop started (interval={:?})", interval);
                loop {
                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(e) = tick() {
                                tracing::warn!("periodic sync failed: {}", e);
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("sync loop stopped");
            })?;

        Ok(Self {
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }

    /// Stops the loop and waits for the thread to exit. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            // A send error only means the thread already exited.
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("sync loop thread panicked");
            }
        }
    }
}

impl Drop for SyncLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
