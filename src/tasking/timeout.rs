//! A leaf that succeeds after a delay.
//!
//! Each started timeout waits on its own thread for either the deadline or
//! the adapter going away. Dropping the adapter (the leaf was stopped)
//! releases the thread without reporting.

use crossbeam_channel::{RecvTimeoutError, Sender};
use std::time::Duration;

use crate::tasking::task::{DoneSender, TaskAdapter};
use crate::tasking::CustomTask;
use crate::{ttlog_error, ttlog_trace};

/// Binds a [`Duration`] to the task interface: `done(true)` once it
/// elapsed. A zero duration finishes inside `start()`.
#[derive(Default)]
pub struct TimeoutTaskAdapter {
    timeout: Duration,
    _cancel: Option<Sender<()>>,
}

impl TaskAdapter for TimeoutTaskAdapter {
    type Task = Duration;

    fn task(&self) -> &Duration {
        &self.timeout
    }

    fn task_mut(&mut self) -> &mut Duration {
        &mut self.timeout
    }

    fn start(&mut self, done: DoneSender) {
        if self.timeout.is_zero() {
            done.done(true);
            return;
        }

        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(0);
        self._cancel = Some(cancel_tx);
        let timeout = self.timeout;
        let spawned = std::thread::Builder::new()
            .name("tasktree-timeout".to_string())
            .spawn(move || match cancel_rx.recv_timeout(timeout) {
                Err(RecvTimeoutError::Timeout) => done.done(true),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    ttlog_trace!("Timeout of {:?} released early", timeout);
                    done.disarm();
                }
            });
        if let Err(e) = spawned {
            // The closure and its sender are dropped, which reports failure.
            ttlog_error!("Failed to spawn timeout thread: {}", e);
        }
    }
}

/// Declares a leaf that waits for the [`Duration`] set in its setup
/// handler.
pub type TimeoutTask = CustomTask<TimeoutTaskAdapter>;
