//! Per-mode rate-limit records with priority propagation.
//!
//! ```text
//! ┌─────────────┐  server says 4008 / 429   ┌──────────────────┐
//! │  Unblocked  │ ────────────────────────► │  Blocked(until)  │
//! └─────────────┘                           └──────────────────┘
//!        ▲                                           │
//!        └───────────────── now ≥ until ─────────────┘
//! ```

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::DiscoveryMode;

/// The rate-limit table shared by every mode
#[derive(Debug, Default)]
pub struct RateLimiter {
    records: HashMap<DiscoveryMode, DateTime<Utc>>,
}

impl RateLimiter {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that `mode` was told to wait until `until`.
    ///
    /// An existing later deadline for the same mode is kept.
    pub fn record(&mut self, mode: DiscoveryMode, until: DateTime<Utc>) {
        self.records
            .entry(mode)
            .and_modify(|existing| *existing = (*existing).max(until))
            .or_insert(until);
    }

    /// The latest still-future retry time over `mode` and every mode with
    /// equal or higher priority.
    pub fn effective_retry_after(
        &self,
        mode: DiscoveryMode,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.records
            .iter()
            .filter(|(m, _)| m.priority() >= mode.priority())
            .map(|(_, until)| *until)
            .filter(|until| *until > now)
            .max()
    }

    /// Drop records that have already expired
    pub fn prune(&mut self, now: DateTime<Utc>) {
        self.records.retain(|_, until| *until > now);
    }
}
