//! # Umbra Contact Discovery
//!
//! Private contact discovery client. Given a set of phone numbers, learns
//! which belong to registered accounts by talking to an enclave-backed
//! discovery service, without revealing the address book to the operator.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CONTACT DISCOVERY MODULES                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌───────────────────────────────────────────────────────────────────┐ │
//! │  │                       DiscoveryManager                            │ │
//! │  │  - mode policy       - rate-limit table    - undiscoverable cache │ │
//! │  │  - contact intersection queue                                     │ │
//! │  └─────────────────────────────────┬─────────────────────────────────┘ │
//! │                                    │                                    │
//! │                                    ▼                                    │
//! │  ┌───────────────────────────────────────────────────────────────────┐ │
//! │  │                      DiscoveryOperation                           │ │
//! │  │  token round ──► token ack ──► result frames ──► store cursor     │ │
//! │  └──────┬────────────────────┬────────────────────────┬──────────────┘ │
//! │         │                    │                        │                │
//! │         ▼                    ▼                        ▼                │
//! │  ┌─────────────┐   ┌──────────────────┐   ┌────────────────────────┐  │
//! │  │  Protocol   │   │   Connection     │   │       Storage          │  │
//! │  │             │   │                  │   │                        │  │
//! │  │ - protobuf  │   │ - factory trait  │   │ - PersistentState      │  │
//! │  │ - records   │   │ - request/reply  │   │ - memory / SQLite      │  │
//! │  │ - close map │   │ - (attestation   │   │                        │  │
//! │  │ - E164 codec│   │    lives outside)│   │                        │  │
//! │  └─────────────┘   └──────────────────┘   └────────────────────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`e164`] - Phone number type and fixed-width wire encoding
//! - [`protocol`] - Protobuf frames, result records, close-code mapping
//! - [`connection`] - Transport contract to the enclave
//! - [`storage`] - Sync cursor persistence
//! - [`discovery`] - Operation, manager, and scheduling policy
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use umbra_contact_discovery::{DiscoveryConfig, DiscoveryManager, DiscoveryMode};
//! use umbra_contact_discovery::storage::SqlitePersistentState;
//!
//! let manager = DiscoveryManager::new(
//!     Arc::new(my_transport),
//!     Arc::new(SqlitePersistentState::open("discovery.db")?),
//!     DiscoveryConfig::default(),
//! );
//!
//! let found = manager
//!     .look_up_phone_numbers(["+15550001111"], DiscoveryMode::OutgoingMessage)
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod connection;
pub mod discovery;
pub mod e164;
pub mod error;
pub mod protocol;
pub mod storage;
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use connection::{ConnectionError, ConnectionFactory, DiscoveryConnection};
pub use discovery::{
    AccessKeyProvider, DiscoveryConfig, DiscoveryManager, DiscoveryMode, DiscoveryOperation,
    ModePolicy,
};
pub use e164::E164;
pub use error::{Error, Result};
pub use protocol::{Aci, DiscoveryResult, Pni};
pub use storage::{MemoryPersistentState, PersistentState, SyncCursor};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of the library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TESTS
// ============================================================================
