//! Timer thread that completes accepted contracts once their move date passes.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Sender};
use tracing::{info, warn};

use crate::error::{MarketError, MarketResult};

use super::LifecycleManager;

/// Periodically runs [`LifecycleManager::complete_due`] on a background thread.
///
/// Stops and joins the thread on drop.
#[derive(Debug)]
pub struct CompletionScheduler {
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CompletionScheduler {
    /// Start the scheduler with the manager's configured interval.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::Internal` if the thread cannot be spawned.
    pub fn start(manager: LifecycleManager) -> MarketResult<Self> {
        let interval = manager.config().auto_complete_interval;
        Self::start_with_interval(manager, interval)
    }

    /// Start the scheduler with an explicit interval.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::Internal` if the thread cannot be spawned.
    pub fn start_with_interval(manager: LifecycleManager, interval: Duration) -> MarketResult<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("moveboard-auto-complete".to_string())
            .spawn(move || loop {
                let stop = select! {
                    recv(shutdown_rx) -> _ => true,
                    default(interval) => {
                        match manager.complete_due() {
                            Ok(done) if !done.is_empty() => {
                                info!(completed = done.len(), "past-due contracts completed");
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "auto-complete pass failed"),
                        }
                        false
                    }
                };
                if stop {
                    break;
                }
            })
            .map_err(|e| MarketError::internal(format!("failed to spawn auto-complete thread: {e}")))?;

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects the channel, which wakes the select.
        self.shutdown_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CompletionScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
