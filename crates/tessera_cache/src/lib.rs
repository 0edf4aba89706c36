//! Persisted work graphs.
//!
//! This crate frames encoded work graphs into versioned, checksummed entry
//! files and decides, on load, whether an entry is a hit, a miss or invalid.
//! Invalid entries are removed so the next run rebuilds the plan.

#![warn(missing_docs)]

pub mod entry;
pub mod error;
pub mod index;
pub mod plan;

pub use entry::{EntryHeader, EntryStore};
pub use error::CacheError;
pub use index::{CacheIndex, IndexEntry};
pub use plan::{
    decode_plan, encode_plan, CacheOutcome, PlanCache, PLAN_EXT, PLAN_SUBDIR, STREAM_TRAILER,
};
