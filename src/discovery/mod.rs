//! # Contact Discovery
//!
//! Scheduling policy around the two-round enclave exchange: which calls
//! share a sync cursor, which are serialized, which are pre-emptively
//! refused because the server recently rate limited a peer mode.
//!
//! ## Request Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       DISCOVERY REQUEST FLOW                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  look_up(numbers, mode)                                                 │
//! │     │                                                                   │
//! │     ├─► UndiscoverableCache::filter      (OutgoingMessage only)         │
//! │     │      nothing left? ──► Ok(empty), no network                      │
//! │     │                                                                   │
//! │     ├─► RateLimiter::effective_retry_after(mode)                        │
//! │     │      future? ──► Err(RateLimited), no network                     │
//! │     │                                                                   │
//! │     ├─► intersection queue               (ContactIntersection only)     │
//! │     │                                                                   │
//! │     └─► DiscoveryOperation::perform                                     │
//! │            │                                                            │
//! │            ├── Ok(results)     ──► update cache                         │
//! │            ├── RateLimited     ──► record[mode] = retry_after           │
//! │            └── InvalidToken    ──► PersistentState::reset()             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modes
//!
//! ```text
//! ┌─────────────────────┬──────────┬────────────┬──────────────┬──────────┐
//! │ mode                │ cursor   │ serialized │ undiscov.    │ gated    │
//! ├─────────────────────┼──────────┼────────────┼──────────────┼──────────┤
//! │ OneOffUserRequest   │ no       │ no         │ no           │ no       │
//! │ OutgoingMessage     │ no       │ no         │ yes          │ yes      │
//! │ ContactIntersection │ yes      │ yes        │ no           │ yes      │
//! └─────────────────────┴──────────┴────────────┴──────────────┴──────────┘
//! ```
//!
//! Priority runs top to bottom. A rate limit recorded for a mode blocks
//! that mode and every lower-priority mode, never a higher one.

mod manager;
mod operation;
mod rate_limit;
mod undiscoverable;

pub use manager::DiscoveryManager;
pub use operation::DiscoveryOperation;
pub use rate_limit::RateLimiter;
pub use undiscoverable::UndiscoverableCache;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::{Aci, DEFAULT_RETRY_AFTER, UUID_LEN};

/// Why a lookup is being made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoveryMode {
    /// The user explicitly asked about a number
    OneOffUserRequest,
    /// Resolving recipients before sending a message
    OutgoingMessage,
    /// Background sync of the whole address book
    ContactIntersection,
}

/// What a [`DiscoveryMode`] is allowed to touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePolicy {
    /// Reads and writes the shared sync cursor
    pub uses_persistent_state: bool,
    /// At most one call in flight at a time
    pub serialized: bool,
    /// Consults and feeds the undiscoverable cache
    pub filters_undiscoverable: bool,
    /// Refused locally while a rate limit applies
    pub rate_limit_gated: bool,
}

impl DiscoveryMode {
    /// Every mode, highest priority first
    pub const ALL: [DiscoveryMode; 3] = [
        DiscoveryMode::OneOffUserRequest,
        DiscoveryMode::OutgoingMessage,
        DiscoveryMode::ContactIntersection,
    ];

    /// Rate-limit priority; higher is less restricted
    pub fn priority(self) -> u8 {
        match self {
            DiscoveryMode::OneOffUserRequest => 2,
            DiscoveryMode::OutgoingMessage => 1,
            DiscoveryMode::ContactIntersection => 0,
        }
    }

    /// The policy row for this mode
    pub fn policy(self) -> ModePolicy {
        match self {
            DiscoveryMode::OneOffUserRequest => ModePolicy {
                uses_persistent_state: false,
                serialized: false,
                filters_undiscoverable: false,
                rate_limit_gated: false,
            },
            DiscoveryMode::OutgoingMessage => ModePolicy {
                uses_persistent_state: false,
                serialized: false,
                filters_undiscoverable: true,
                rate_limit_gated: true,
            },
            DiscoveryMode::ContactIntersection => ModePolicy {
                uses_persistent_state: true,
                serialized: true,
                filters_undiscoverable: false,
                rate_limit_gated: true,
            },
        }
    }
}

/// Discovery configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Retry delay when a rate-limit close carries no usable body
    pub default_retry_after: Duration,
    /// Ask the server for ACIs even without matching access keys
    pub compatibility_mode: bool,
    /// How long a number stays in the undiscoverable cache (None = until seen)
    pub undiscoverable_ttl: Option<Duration>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            default_retry_after: DEFAULT_RETRY_AFTER,
            compatibility_mode: true,
            undiscoverable_ttl: None,
        }
    }
}

/// Source of `(ACI, unidentified access key)` pairs for known accounts.
///
/// The server only returns an ACI for a number when the client proves it
/// already knows that account, unless compatibility mode is on.
pub trait AccessKeyProvider: Send + Sync {
    /// Pairs to attach to the next request
    fn aci_access_key_pairs(&self) -> Vec<(Aci, [u8; UUID_LEN])>;
}

/// Encode access key pairs as concatenated 32-byte `ACI ∥ UAK` records
pub(crate) fn encode_aci_uak_pairs(pairs: &[(Aci, [u8; UUID_LEN])]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pairs.len() * 2 * UUID_LEN);
    for (aci, uak) in pairs {
        out.extend_from_slice(&aci.service_id_binary());
        out.extend_from_slice(uak);
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_priorities_are_ordered() {
        let priorities: Vec<u8> = DiscoveryMode::ALL.iter().map(|m| m.priority()).collect();
        assert_eq!(priorities, vec![2, 1, 0]);
    }

    #[test]
    fn test_policy_table() {
        let one_off = DiscoveryMode::OneOffUserRequest.policy();
        assert!(!one_off.uses_persistent_state);
        assert!(!one_off.rate_limit_gated);

        let outgoing = DiscoveryMode::OutgoingMessage.policy();
        assert!(outgoing.filters_undiscoverable);
        assert!(!outgoing.serialized);

        let intersection = DiscoveryMode::ContactIntersection.policy();
        assert!(intersection.uses_persistent_state);
        assert!(intersection.serialized);
        assert!(!intersection.filters_undiscoverable);
    }

    #[test]
    fn test_default_config() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.default_retry_after, Duration::from_secs(60));
        assert!(config.compatibility_mode);
        assert!(config.undiscoverable_ttl.is_none());
    }

    #[test]
    fn test_encode_aci_uak_pairs() {
        let aci = Aci(Uuid::from_bytes([7; 16]));
        let encoded = encode_aci_uak_pairs(&[(aci, [9; 16])]);
        assert_eq!(encoded.len(), 32);
        assert_eq!(&encoded[..16], &aci.service_id_binary());
        assert_eq!(&encoded[16..], &[9; 16]);
    }
}
