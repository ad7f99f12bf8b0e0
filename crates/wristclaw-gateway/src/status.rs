// SPDX-License-Identifier: Apache-2.0
//! `StatusSink` — the ambient "user-visible failure" surface
//! (`running / lastError / lastStartAt / lastStopAt`), extended with
//! the inbound/outbound timestamps the monitor's event handlers update
//! directly. The enclosing plugin (out of scope) reads a [`StatusSnapshot`]
//! to report account health.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub running: bool,
    pub last_error: Option<String>,
    pub last_start_at: Option<DateTime<Utc>>,
    pub last_stop_at: Option<DateTime<Utc>>,
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
}

/// Shared, lock-guarded status cell one `Monitor` owns and its session loop
/// updates at every named touchpoint.
#[derive(Default)]
pub struct StatusSink {
    inner: Mutex<StatusSnapshot>,
}

impl StatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.lock().expect("status sink mutex poisoned").clone()
    }

    pub fn mark_started(&self) {
        let mut s = self.lock();
        s.running = true;
        s.last_start_at = Some(Utc::now());
        s.last_error = None;
    }

    pub fn mark_stopped(&self) {
        let mut s = self.lock();
        s.running = false;
        s.last_stop_at = Some(Utc::now());
    }

    pub fn mark_error(&self, message: impl Into<String>) {
        self.lock().last_error = Some(message.into());
    }

    pub fn mark_inbound(&self) {
        self.lock().last_inbound_at = Some(Utc::now());
    }

    pub fn mark_outbound(&self) {
        self.lock().last_outbound_at = Some(Utc::now());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatusSnapshot> {
        self.inner.lock().expect("status sink mutex poisoned")
    }
}
