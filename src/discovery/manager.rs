//! # Discovery Manager
//!
//! The entry point applications hold (usually behind an `Arc`).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          MANAGER STATE                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  parking_lot::Mutex<ManagerState>      never held across an await      │
//! │    ├── RateLimiter                     mode ──► retry_after             │
//! │    └── UndiscoverableCache             e164 ──► time cached             │
//! │                                                                         │
//! │  tokio::sync::Mutex<()>                contact intersection queue       │
//! │                                                                         │
//! │  Arc<dyn PersistentState>              sync cursor (intersection only)  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! State is only mutated after the server has answered, so dropping a
//! `look_up` future mid-flight leaves everything as it was.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{
    AccessKeyProvider, DiscoveryConfig, DiscoveryMode, DiscoveryOperation, RateLimiter,
    UndiscoverableCache,
};
use crate::connection::ConnectionFactory;
use crate::e164::E164;
use crate::error::{Error, Result};
use crate::protocol::DiscoveryResult;
use crate::storage::PersistentState;

struct ManagerState {
    rate_limits: RateLimiter,
    undiscoverable: UndiscoverableCache,
}

/// Schedules discovery lookups across calling modes
pub struct DiscoveryManager {
    connection_factory: Arc<dyn ConnectionFactory>,
    persistent_state: Arc<dyn PersistentState>,
    access_keys: Option<Arc<dyn AccessKeyProvider>>,
    config: DiscoveryConfig,
    state: Mutex<ManagerState>,
    intersection_queue: tokio::sync::Mutex<()>,
}

impl DiscoveryManager {
    /// Create a manager
    pub fn new(
        connection_factory: Arc<dyn ConnectionFactory>,
        persistent_state: Arc<dyn PersistentState>,
        config: DiscoveryConfig,
    ) -> Self {
        let undiscoverable = UndiscoverableCache::new(config.undiscoverable_ttl);
        Self {
            connection_factory,
            persistent_state,
            access_keys: None,
            config,
            state: Mutex::new(ManagerState {
                rate_limits: RateLimiter::new(),
                undiscoverable,
            }),
            intersection_queue: tokio::sync::Mutex::new(()),
        }
    }

    /// Attach access key pairs to every request
    pub fn with_access_key_provider(mut self, provider: Arc<dyn AccessKeyProvider>) -> Self {
        self.access_keys = Some(provider);
        self
    }

    /// The active configuration
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Look up `e164s` for `mode`.
    ///
    /// Returns the registered subset. Numbers with no account are simply
    /// absent from the result.
    pub async fn look_up(
        &self,
        e164s: BTreeSet<E164>,
        mode: DiscoveryMode,
    ) -> Result<BTreeSet<DiscoveryResult>> {
        if e164s.is_empty() {
            return Ok(BTreeSet::new());
        }

        let policy = mode.policy();

        let to_lookup = if policy.filters_undiscoverable {
            let now = crate::time::now();
            let remaining = {
                let mut state = self.state.lock();
                state.undiscoverable.prune(now);
                state.undiscoverable.filter(&e164s, now)
            };
            if remaining.len() < e164s.len() {
                tracing::debug!(
                    "Skipping {} numbers cached as undiscoverable",
                    e164s.len() - remaining.len()
                );
            }
            remaining
        } else {
            e164s
        };

        if to_lookup.is_empty() {
            return Ok(BTreeSet::new());
        }

        self.check_rate_limit(mode)?;

        let _queued = if policy.serialized {
            match self.intersection_queue.try_lock() {
                Ok(guard) => Some(guard),
                Err(_) => {
                    tracing::debug!("Waiting for in-flight contact intersection");
                    let guard = self.intersection_queue.lock().await;
                    // The request ahead of us may have been rate limited.
                    self.check_rate_limit(mode)?;
                    Some(guard)
                }
            }
        } else {
            None
        };

        let mut operation =
            DiscoveryOperation::new(to_lookup.clone(), self.connection_factory.clone())
                .with_compatibility_mode(self.config.compatibility_mode)
                .with_default_retry_after(self.config.default_retry_after);
        if policy.uses_persistent_state {
            operation = operation.with_persistent_state(self.persistent_state.clone());
        }
        if let Some(provider) = &self.access_keys {
            operation = operation.with_access_keys(provider.clone());
        }

        match operation.perform().await {
            Ok(results) => {
                let results: BTreeSet<DiscoveryResult> = results.into_iter().collect();
                tracing::info!(
                    "Discovered {} of {} numbers ({:?})",
                    results.len(),
                    to_lookup.len(),
                    mode
                );

                if policy.filters_undiscoverable {
                    let found: BTreeSet<E164> = results.iter().map(|r| r.e164).collect();
                    let mut state = self.state.lock();
                    state.undiscoverable.remove_all(&found);
                    state
                        .undiscoverable
                        .insert_all(to_lookup.difference(&found), crate::time::now());
                }

                Ok(results)
            }
            Err(Error::RateLimited { retry_after }) => {
                tracing::warn!("Discovery rate limited until {} ({:?})", retry_after, mode);
                self.state.lock().rate_limits.record(mode, retry_after);
                Err(Error::RateLimited { retry_after })
            }
            Err(Error::InvalidToken) => {
                if policy.uses_persistent_state {
                    self.persistent_state.reset();
                }
                Err(Error::InvalidToken)
            }
            Err(e) => {
                tracing::warn!("Discovery failed ({:?}): {}", mode, e);
                Err(e)
            }
        }
    }

    /// Parse raw number strings and look up the valid ones.
    ///
    /// Invalid strings are logged and skipped.
    pub async fn look_up_phone_numbers<I, S>(
        &self,
        numbers: I,
        mode: DiscoveryMode,
    ) -> Result<BTreeSet<DiscoveryResult>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut e164s = BTreeSet::new();
        for raw in numbers {
            match E164::parse(raw.as_ref()) {
                Ok(e164) => {
                    e164s.insert(e164);
                }
                Err(e) => tracing::warn!("Skipping unparseable number: {}", e),
            }
        }
        self.look_up(e164s, mode).await
    }

    /// When `mode` may next reach the server, if it is currently blocked
    pub fn rate_limited_until(&self, mode: DiscoveryMode) -> Option<DateTime<Utc>> {
        if !mode.policy().rate_limit_gated {
            return None;
        }
        self.state
            .lock()
            .rate_limits
            .effective_retry_after(mode, crate::time::now())
    }

    /// Forget every number cached as undiscoverable
    pub fn clear_undiscoverable_cache(&self) {
        self.state.lock().undiscoverable.clear();
    }

    /// Forget one number cached as undiscoverable, e.g. after it messaged us
    pub fn forget_undiscoverable(&self, e164: &E164) {
        if self.state.lock().undiscoverable.forget(e164) {
            tracing::debug!("Removed {} from undiscoverable cache", e164);
        }
    }

    fn check_rate_limit(&self, mode: DiscoveryMode) -> Result<()> {
        if !mode.policy().rate_limit_gated {
            return Ok(());
        }

        let now = crate::time::now();
        let mut state = self.state.lock();
        state.rate_limits.prune(now);
        match state.rate_limits.effective_retry_after(mode, now) {
            Some(retry_after) => {
                tracing::info!("Refusing {:?} lookup, rate limited until {}", mode, retry_after);
                Err(Error::RateLimited { retry_after })
            }
            None => Ok(()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
