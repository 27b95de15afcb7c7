//! Matching counters. Export is left to the process that embeds the core.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct DispatchTelemetry {
    matches: AtomicU64,
    unmatched: AtomicU64,
    offers_delivered: AtomicU64,
    offers_failed: AtomicU64,
    persistence_failures: AtomicU64,
    eta_fallbacks: AtomicU64,
}

/// Point-in-time copy of [`DispatchTelemetry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub matches: u64,
    pub unmatched: u64,
    pub offers_delivered: u64,
    pub offers_failed: u64,
    pub persistence_failures: u64,
    pub eta_fallbacks: u64,
}

impl DispatchTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_match(&self) {
        self.matches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unmatched(&self) {
        self.unmatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_offer(&self, delivered: bool) {
        let counter = if delivered {
            &self.offers_delivered
        } else {
            &self.offers_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eta_fallback(&self) {
        self.eta_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            matches: self.matches.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            offers_delivered: self.offers_delivered.load(Ordering::Relaxed),
            offers_failed: self.offers_failed.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            eta_fallbacks: self.eta_fallbacks.load(Ordering::Relaxed),
        }
    }
}
