//! Control-to-audio hand-off of prepared processing units
//!
//! The control thread builds a unit (amp model, IR convolver) and stages it.
//! At the next block boundary the audio thread takes the newest staged unit
//! and swaps it into its active slot. Whatever the audio thread lets go of
//! travels back on a retire channel, so deallocation never happens on the
//! audio thread.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use tracing::debug;

/// Retired units queued before the control thread must collect them
pub const RETIRE_CAPACITY: usize = 8;

/// Units the audio thread can hold back while the retire queue is full.
/// One take retires at most two units and nothing is taken while any are
/// held, so this never grows past its initial allocation.
const HELD_CAPACITY: usize = 4;

/// Control-thread end of a staging slot
#[derive(Debug)]
pub struct Stager<T> {
    staged_tx: Sender<T>,
    staged_rx: Receiver<T>,
    retired_rx: Receiver<T>,
}

/// Audio-thread end of a staging slot
///
/// Units the retire queue could not accept are held here and retried
/// before anything new is taken, so the audio thread never frees one.
#[derive(Debug)]
pub struct StagedReceiver<T> {
    staged_rx: Receiver<T>,
    retired_tx: Sender<T>,
    held: Vec<T>,
}

/// Create a connected staging slot
pub fn staging_slot<T>() -> (Stager<T>, StagedReceiver<T>) {
    let (staged_tx, staged_rx) = channel::bounded(1);
    let (retired_tx, retired_rx) = channel::bounded(RETIRE_CAPACITY);
    (
        Stager {
            staged_tx,
            staged_rx: staged_rx.clone(),
            retired_rx,
        },
        StagedReceiver {
            staged_rx,
            retired_tx,
            held: Vec::with_capacity(HELD_CAPACITY),
        },
    )
}

impl<T> Stager<T> {
    /// Stage a unit, replacing one the audio thread has not taken yet
    ///
    /// Returns any unit superseded in the process so the caller drops it.
    pub fn stage(&self, mut value: T) -> Option<T> {
        let mut superseded = None;
        loop {
            match self.staged_tx.try_send(value) {
                Ok(()) => return superseded,
                Err(TrySendError::Full(back)) => {
                    value = back;
                    if let Ok(old) = self.staged_rx.try_recv() {
                        debug!("Superseding staged unit");
                        superseded = Some(old);
                    }
                }
                // Receiver gone: nothing will ever consume it
                Err(TrySendError::Disconnected(back)) => return Some(back),
            }
        }
    }

    /// Whether a staged unit is still waiting for the audio thread
    pub fn is_pending(&self) -> bool {
        !self.staged_rx.is_empty()
    }

    /// Drop every unit the audio thread has retired; returns how many
    pub fn collect_retired(&self) -> usize {
        self.retired_rx.try_iter().count()
    }
}

impl<T> StagedReceiver<T> {
    /// Take the staged unit, if any; never blocks
    ///
    /// Returns `None` while retired units are still held back.
    #[inline]
    pub fn take(&mut self) -> Option<T> {
        if !self.flush() {
            return None;
        }
        self.staged_rx.try_recv().ok()
    }

    /// Hand a unit back for deallocation on the control thread
    ///
    /// When the retire queue is full the unit is held and retried on the
    /// next `take` or `flush`.
    #[inline]
    pub fn retire(&mut self, value: T) {
        match self.retired_tx.try_send(value) {
            Ok(()) => {}
            Err(TrySendError::Full(back)) | Err(TrySendError::Disconnected(back)) => {
                self.held.push(back);
            }
        }
    }

    /// Retry held units; true when none remain
    pub fn flush(&mut self) -> bool {
        while let Some(value) = self.held.pop() {
            match self.retired_tx.try_send(value) {
                Ok(()) => {}
                Err(TrySendError::Full(back)) | Err(TrySendError::Disconnected(back)) => {
                    self.held.push(back);
                    return false;
                }
            }
        }
        true
    }

    /// Whether the control thread has staged a unit not taken yet
    pub fn is_pending(&self) -> bool {
        !self.staged_rx.is_empty()
    }

    /// Units waiting for room in the retire queue
    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Swap a staged unit into `active`, retiring the previous one
    ///
    /// Returns true when a new unit was installed.
    pub fn swap_into(&mut self, active: &mut T) -> bool {
        match self.take() {
            Some(next) => {
                let previous = std::mem::replace(active, next);
                self.retire(previous);
                true
            }
            None => false,
        }
    }
}
