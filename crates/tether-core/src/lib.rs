//! # tether-core
//!
//! Core library for Tether: configuration, working-directory lifecycle,
//! and the refresh engine that keeps a local Git mirror aligned with its
//! source repository.
//!
//! The engine is generic over the transport capability from
//! [`tether_git`], so embedders and tests can substitute their own.

pub mod config;
pub mod error;
pub mod sync;
pub mod workdir;

#[cfg(test)]
mod test_mocks;

pub use config::{Config, normalize_uri};
pub use error::{Error, Result};
pub use sync::Synchronizer;
pub use workdir::Workdir;
