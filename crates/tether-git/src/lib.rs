//! # tether-git
//!
//! Git transport adapter for Tether, built on git2-rs. Wraps clone, open,
//! fetch, checkout, merge, reset, and status behind a small capability
//! surface the synchronizer consumes through traits, and resolves the
//! credentials attached to every remote operation.

mod credentials;
mod error;
mod repository;
mod traits;

pub use credentials::{CredentialSource, Credentials, TransportConfig};
pub use error::{Error, Result};
pub use git2::Oid;
pub use repository::{GitBackend, Repository};
pub use traits::{
    BranchScope, FetchOutcome, GitRepository, GitTransport, MergeOutcome, WorktreeStatus,
};
