//! Connection pool bookkeeping for troubleshooting.
//!
//! The pool reports connect, checkout, checkin, close and timeout events
//! through [`PoolEventHandler`]; sessions add resets. Nothing here
//! changes pool behaviour.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use r2d2::event::{AcquireEvent, CheckinEvent, CheckoutEvent, HandleEvent, ReleaseEvent, TimeoutEvent};
use serde::Serialize;

/// Recent events kept for [`PoolSnapshot`]
pub const RECENT_EVENTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolEventKind {
    Connect,
    Checkout,
    Checkin,
    /// a session rolled back and handed back its connection
    Reset,
    Close,
    Timeout,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolEvent {
    pub kind: PoolEventKind,
    pub connection_id: Option<u64>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolCounters {
    pub connects: u64,
    pub checkouts: u64,
    pub checkins: u64,
    pub resets: u64,
    pub closes: u64,
    pub timeouts: u64,
}

#[derive(Debug, Default)]
struct DiagnosticsState {
    counters: PoolCounters,
    recent: VecDeque<PoolEvent>,
}

#[derive(Debug, Default)]
pub struct PoolDiagnostics {
    state: Mutex<DiagnosticsState>,
}

impl PoolDiagnostics {
    pub fn record(&self, kind: PoolEventKind, connection_id: Option<u64>) {
        let mut state = self.lock();
        let counters = &mut state.counters;
        match kind {
            PoolEventKind::Connect => counters.connects += 1,
            PoolEventKind::Checkout => counters.checkouts += 1,
            PoolEventKind::Checkin => counters.checkins += 1,
            PoolEventKind::Reset => counters.resets += 1,
            PoolEventKind::Close => counters.closes += 1,
            PoolEventKind::Timeout => counters.timeouts += 1,
        }
        if state.recent.len() == RECENT_EVENTS {
            state.recent.pop_front();
        }
        state.recent.push_back(PoolEvent { kind, connection_id, at: Utc::now() });
    }

    pub fn counters(&self) -> PoolCounters {
        self.lock().counters
    }

    pub fn recent(&self) -> Vec<PoolEvent> {
        self.lock().recent.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, DiagnosticsState> {
        // counters stay meaningful even if a recording thread panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub capacity: u32,
    pub connections: u32,
    pub idle: u32,
    pub checked_out: u32,
    pub counters: PoolCounters,
    pub recent: Vec<PoolEvent>,
}

/// Forwards r2d2 pool events into [`PoolDiagnostics`]
#[derive(Debug)]
pub struct PoolEventHandler {
    diagnostics: Arc<PoolDiagnostics>,
}

impl PoolEventHandler {
    pub fn new(diagnostics: Arc<PoolDiagnostics>) -> PoolEventHandler {
        PoolEventHandler { diagnostics }
    }
}

impl HandleEvent for PoolEventHandler {
    fn handle_acquire(&self, event: AcquireEvent) {
        debug!("Pool opened connection {}", event.connection_id());
        self.diagnostics.record(PoolEventKind::Connect, Some(event.connection_id()));
    }

    fn handle_release(&self, event: ReleaseEvent) {
        debug!("Pool closed connection {} after {:?}", event.connection_id(), event.age());
        self.diagnostics.record(PoolEventKind::Close, Some(event.connection_id()));
    }

    fn handle_checkout(&self, event: CheckoutEvent) {
        self.diagnostics.record(PoolEventKind::Checkout, Some(event.connection_id()));
    }

    fn handle_timeout(&self, event: TimeoutEvent) {
        warn!("Timed out after {:?} waiting for a database connection", event.timeout());
        self.diagnostics.record(PoolEventKind::Timeout, None);
    }

    fn handle_checkin(&self, event: CheckinEvent) {
        self.diagnostics.record(PoolEventKind::Checkin, Some(event.connection_id()));
    }
}
