//! # Sync Cursor Storage
//!
//! Durable home of the resync token and the numbers the server already
//! knows under it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SYNC CURSOR LIFECYCLE                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   (absent) ──── first successful exchange ────► { token₁, prev₁ }      │
//! │                                                        │                │
//! │                       successful exchange              │                │
//! │          { tokenₙ₊₁, prevₙ ∪ newₙ } ◄──────────────────┘                │
//! │                        │                                                │
//! │                        │  server close 4101 (invalid token)             │
//! │                        ▼                                                │
//! │                    (absent)  ──► next call resyncs everything           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Token and numbers are always written together. A store that finds its
//! own contents unreadable returns `None` from `load`, which costs quota
//! on the next request but never sends a token with the wrong number set.

#[cfg(not(target_arch = "wasm32"))]
mod sqlite;

#[cfg(not(target_arch = "wasm32"))]
pub use sqlite::SqlitePersistentState;

use parking_lot::RwLock;
use std::collections::BTreeSet;

use crate::e164::E164;
use crate::error::Result;

/// The persisted resync state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncCursor {
    /// Opaque server token
    pub token: Vec<u8>,
    /// Numbers the server has synchronized under `token`
    pub prev_e164s: BTreeSet<E164>,
}

/// Storage for the [`SyncCursor`]
pub trait PersistentState: Send + Sync {
    /// Load the cursor, or `None` if absent or unreadable
    fn load(&self) -> Option<SyncCursor>;

    /// Replace the stored cursor atomically
    fn store(&self, cursor: &SyncCursor) -> Result<()>;

    /// Forget the cursor; the next `load` returns `None`
    fn reset(&self);
}

/// In-memory cursor storage (for development/testing and ephemeral clients)
#[derive(Debug, Default)]
pub struct MemoryPersistentState {
    cursor: RwLock<Option<SyncCursor>>,
}

impl MemoryPersistentState {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentState for MemoryPersistentState {
    fn load(&self) -> Option<SyncCursor> {
        self.cursor.read().clone()
    }

    fn store(&self, cursor: &SyncCursor) -> Result<()> {
        *self.cursor.write() = Some(cursor.clone());
        tracing::info!(
            "Saved discovery token and {} synchronized e164s",
            cursor.prev_e164s.len()
        );
        Ok(())
    }

    fn reset(&self) {
        tracing::warn!("Resetting discovery token");
        *self.cursor.write() = None;
    }
}

// ============================================================================
// TESTS
// ============================================================================
