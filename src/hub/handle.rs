//! Caller side of a parked driver poll.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::contract::Contract;
use crate::id::SubscriptionId;

use super::registry::Registry;

/// A parked poll.
///
/// `wait` blocks until the poll is resolved by a matching contract or by its
/// deadline. Dropping an unresolved handle withdraws it from the hub without
/// resolving it.
#[derive(Debug)]
pub struct PollHandle {
    id: SubscriptionId,
    rx: Receiver<Vec<Contract>>,
    deadline: Instant,
    registry: Arc<Registry>,
}

impl PollHandle {
    pub(crate) fn new(
        id: SubscriptionId,
        rx: Receiver<Vec<Contract>>,
        deadline: Instant,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            id,
            rx,
            deadline,
            registry,
        }
    }

    /// The subscription id backing this handle.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Time left before the poll resolves empty.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Block until resolved. An empty list means the poll timed out.
    #[must_use]
    pub fn wait(self) -> Vec<Contract> {
        match self.rx.recv_timeout(self.remaining()) {
            Ok(found) => found,
            Err(RecvTimeoutError::Timeout) => {
                if self.registry.expire(self.id) {
                    Vec::new()
                } else {
                    // Lost the race: the winner removed the waiter and is about to send.
                    self.rx.recv().unwrap_or_default()
                }
            }
            Err(RecvTimeoutError::Disconnected) => Vec::new(),
        }
    }

    /// Non-blocking check for a result.
    #[must_use]
    pub fn try_result(&self) -> Option<Vec<Contract>> {
        match self.rx.try_recv() {
            Ok(found) => Some(found),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Withdraw the poll (e.g. the client disconnected).
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        // No-op if already resolved or expired.
        self.registry.withdraw(self.id);
    }
}
