// Read-only status shared with whatever reports it (console, LED, web page).

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerPhase {
    Idle,
    Checking,
    UpdateAvailable,
    Installing,
    /// Image committed, control is being handed to the new firmware.
    Restarting,
}

impl SchedulerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerPhase::Idle => "idle",
            SchedulerPhase::Checking => "checking",
            SchedulerPhase::UpdateAvailable => "update-available",
            SchedulerPhase::Installing => "installing",
            SchedulerPhase::Restarting => "restarting",
        }
    }
}

/// How much an installed image was checked before it was activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrustLevel {
    HashVerified,
    /// Only the byte count was checked; the release published no hash.
    SizeOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CheckOutcome {
    UpToDate,
    Installed { version: String, trust: TrustLevel },
    /// A release this device rolled back from; not installed again.
    Skipped { version: String },
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub phase: SchedulerPhase,
    pub progress: u8,
    pub last_error: Option<String>,
    pub last_outcome: Option<CheckOutcome>,
    pub checks: u32,
}

#[derive(Debug)]
struct StatusInner {
    phase: SchedulerPhase,
    last_error: Option<String>,
    last_outcome: Option<CheckOutcome>,
    checks: u32,
}

/// Cheap to clone; all clones observe the same state.
#[derive(Debug, Clone)]
pub struct UpdateStatus {
    inner: Arc<Mutex<StatusInner>>,
    progress: Arc<AtomicU8>,
}

impl Default for UpdateStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatusInner {
                phase: SchedulerPhase::Idle,
                last_error: None,
                last_outcome: None,
                checks: 0,
            })),
            progress: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.lock();
        StatusSnapshot {
            phase: inner.phase,
            progress: self.progress(),
            last_error: inner.last_error.clone(),
            last_outcome: inner.last_outcome.clone(),
            checks: inner.checks,
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.lock().phase
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub(crate) fn set_phase(&self, phase: SchedulerPhase) {
        self.lock().phase = phase;
    }

    pub(crate) fn set_progress(&self, percent: u8) {
        self.progress.store(percent.min(100), Ordering::Relaxed);
    }

    pub(crate) fn record(&self, outcome: CheckOutcome, error: Option<String>) {
        let mut inner = self.lock();
        inner.checks = inner.checks.wrapping_add(1);
        inner.last_outcome = Some(outcome);
        if error.is_some() {
            inner.last_error = error;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatusInner> {
        // A panic while holding the lock cannot leave the fields inconsistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
