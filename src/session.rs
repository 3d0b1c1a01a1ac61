//! Lifecycle of one transfer plus the pause/cancel controls the sync loop honors.

use crate::{Result, ShiftError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Idle,
    Scanning,
    Comparing,
    Ready,
    Syncing,
    Paused,
    Completed,
    Error,
    Cancelled,
}

impl TransferState {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::Idle => "idle",
            TransferState::Scanning => "scanning",
            TransferState::Comparing => "comparing",
            TransferState::Ready => "ready",
            TransferState::Syncing => "syncing",
            TransferState::Paused => "paused",
            TransferState::Completed => "completed",
            TransferState::Error => "error",
            TransferState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Error | TransferState::Cancelled)
    }

    pub fn can_transition_to(self, next: TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (Idle, Scanning) | (Idle, Syncing) => true,
            (Scanning, Comparing) | (Scanning, Error) | (Scanning, Cancelled) => true,
            (Comparing, Ready) | (Comparing, Error) | (Comparing, Cancelled) => true,
            (Ready, Scanning) | (Ready, Syncing) => true,
            (Syncing, Paused) | (Syncing, Completed) | (Syncing, Error) | (Syncing, Cancelled) => true,
            (Paused, Syncing) | (Paused, Error) | (Paused, Cancelled) => true,
            // Re-runs after a finished transfer
            (from, Scanning) | (from, Syncing) if from.is_terminal() => true,
            _ => false,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the sync loop checks between units of work.
pub trait SyncControl: Send + Sync {
    fn is_cancelled(&self) -> bool;

    /// Block while paused. Returns immediately once cancelled.
    fn wait_for_resume(&self);
}

/// Shared handle for one transfer. Pause, resume and cancel may be called from
/// any thread while a scan or sync runs on another.
pub struct TransferSession {
    state: Mutex<TransferState>,
    cancelled: AtomicBool,
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl Default for TransferSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferSession {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TransferState::Idle),
            cancelled: AtomicBool::new(false),
            paused: Mutex::new(false),
            resumed: Condvar::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TransferState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_paused(&self) -> MutexGuard<'_, bool> {
        self.paused.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> TransferState {
        *self.lock_state()
    }

    pub fn transition(&self, next: TransferState) -> Result<()> {
        let mut state = self.lock_state();
        if !state.can_transition_to(next) {
            return Err(ShiftError::InvalidStateTransition {
                from: state.to_string(),
                to: next.to_string(),
            });
        }
        debug!("Transfer state {} -> {}", *state, next);

        // A new run starts with fresh controls
        if matches!(next, TransferState::Scanning | TransferState::Syncing) && *state != TransferState::Paused {
            self.cancelled.store(false, Ordering::SeqCst);
            *self.lock_paused() = false;
        }
        *state = next;
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.transition(TransferState::Paused)?;
        *self.lock_paused() = true;
        info!("Transfer paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.transition(TransferState::Syncing)?;
        *self.lock_paused() = false;
        self.resumed.notify_all();
        info!("Transfer resumed");
        Ok(())
    }

    /// Request cancellation. The running sync stops at the next batch or file.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Taking the lock orders this with a waiter's check
        let _paused = self.lock_paused();
        self.resumed.notify_all();
        info!("Transfer cancellation requested");
    }
}

impl SyncControl for TransferSession {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn wait_for_resume(&self) {
        let mut paused = self.lock_paused();
        while *paused && !self.is_cancelled() {
            paused = self
                .resumed
                .wait(paused)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}
