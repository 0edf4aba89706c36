//! Shared foundational types used across the tessera configuration cache.
//!
//! This crate provides content hashing for artifact integrity checks, the
//! colon-separated [`Path`] used to identify builds, projects and tasks, and
//! the [`InternalError`] raised when an engine invariant is broken.

#![warn(missing_docs)]

pub mod hash;
pub mod path;
pub mod result;

pub use hash::ContentHash;
pub use path::{Path, PathError};
pub use result::InternalError;
