//! Backoff timers for failed sends, one per operation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use stacky_logging::stacky_debug;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::OpId;

struct PendingTimer {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Timers {
    next_generation: u64,
    pending: HashMap<OpId, PendingTimer>,
}

/// Fires the op id on `due_tx` once its delay elapses unless cancelled first.
///
/// Scheduling again for the same op replaces the earlier timer.
#[derive(Clone)]
pub struct RetryScheduler {
    runtime: Handle,
    timers: Arc<Mutex<Timers>>,
    due_tx: UnboundedSender<OpId>,
}

impl RetryScheduler {
    pub fn new(runtime: Handle, due_tx: UnboundedSender<OpId>) -> Self {
        Self {
            runtime,
            timers: Arc::new(Mutex::new(Timers::default())),
            due_tx,
        }
    }

    pub fn schedule(&self, op_id: OpId, delay: Duration) {
        let token = CancellationToken::new();
        let generation = {
            let mut timers = self.lock();
            timers.next_generation += 1;
            let generation = timers.next_generation;
            if let Some(previous) = timers.pending.insert(
                op_id,
                PendingTimer {
                    generation,
                    token: token.clone(),
                },
            ) {
                previous.token.cancel();
            }
            generation
        };
        stacky_debug!("Retry for op {} scheduled in {:?}", op_id, delay);

        let timers = self.timers.clone();
        let due_tx = self.due_tx.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let still_current = {
                        let mut timers = timers.lock().unwrap_or_else(PoisonError::into_inner);
                        match timers.pending.get(&op_id) {
                            Some(timer) if timer.generation == generation => {
                                timers.pending.remove(&op_id);
                                true
                            }
                            _ => false,
                        }
                    };
                    if still_current {
                        let _ = due_tx.send(op_id);
                    }
                }
            }
        });
    }

    /// Returns whether a timer was pending.
    pub fn cancel(&self, op_id: OpId) -> bool {
        match self.lock().pending.remove(&op_id) {
            Some(timer) => {
                timer.token.cancel();
                stacky_debug!("Retry for op {} cancelled", op_id);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, op_id: OpId) -> bool {
        self.lock().pending.contains_key(&op_id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
