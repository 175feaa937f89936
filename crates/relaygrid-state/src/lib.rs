//! relaygrid-state — shared data model and snapshot persistence.
//!
//! Holds the types that cross crate boundaries (node status snapshots,
//! persisted node records, archived task records) and the
//! [`SnapshotStore`] used to write them to disk.
//!
//! # Persistence
//!
//! Every persisted table is a single pretty-printed JSON document that is
//! rewritten in full on mutation. Writes go to a sibling temp file which is
//! then renamed over the target, so a crash mid-write leaves the previous
//! snapshot intact. A missing file loads as "empty".

pub mod error;
pub mod snapshot;
pub mod types;

pub use error::{StateError, StateResult};
pub use snapshot::SnapshotStore;
pub use types::*;

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
