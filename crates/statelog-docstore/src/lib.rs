//! # statelog docstore
//!
//! Document stores that sit behind the [`DocumentBackend`] seam.
//!
//! ## Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of statelog.**
//!
//! Users should depend on the main `statelog` crate instead, which provides
//! the stable public API. This crate's API may change without notice between
//! minor versions.
//!
//! ---
//!
//! - **memory**: collection kept in a `BTreeMap` ordered by `(id, ts)`
//! - **file**: the same index, rebuilt on open from an append-only log of
//!   checksummed batch frames
//! - **connector**: picks a backend from a `mem://` or `file://` URL
//!
//! [`DocumentBackend`]: statelog_core::DocumentBackend

use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub mod codec;
pub mod connector;
pub mod file;
pub mod memory;

pub use connector::{DefaultConnector, Location};
pub use file::FileBackend;
pub use memory::{CollectionData, MemoryBackend, MemoryConnector};

/// Sync mode for file-backed collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncMode {
    /// Call fsync after every batch (strongest durability)
    #[default]
    Sync,
    /// No fsync (fastest, unsafe for power loss)
    None,
}

impl FromStr for SyncMode {
    type Err = statelog_core::Error;

    fn from_str(s: &str) -> statelog_core::Result<Self> {
        match s {
            "sync" | "full" => Ok(SyncMode::Sync),
            "none" | "off" => Ok(SyncMode::None),
            other => Err(statelog_core::Error::Config(format!(
                "unknown sync mode: {}",
                other
            ))),
        }
    }
}
