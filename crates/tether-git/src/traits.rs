//! Trait abstractions for transport operations.
//!
//! This module defines the capability surface the synchronizer consumes:
//! [`GitTransport`] acquires repository handles, [`GitRepository`] operates
//! on one. Both are traits so tests can substitute spies without touching a
//! real repository.

use std::collections::BTreeSet;
use std::path::Path;

use git2::Oid;

use crate::Result;

/// Scope selector for [`GitRepository::branch_refs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchScope {
    /// Local branches only.
    Local,
    /// Local and remote-tracking branches.
    All,
}

/// Outcome of a fetch from origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Number of tracking refs the fetch updated.
    pub updated_refs: usize,
}

/// Outcome of merging `origin/<label>` into the current branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing to merge; local already contains the remote tip.
    UpToDate,
    /// The local branch was fast-forwarded to the remote tip.
    FastForwarded,
    /// A merge commit joined diverged histories.
    Merged,
    /// The merge stopped on conflicts; the working tree holds the markers.
    Conflicted,
}

impl MergeOutcome {
    /// Whether the merge left the working tree in a usable state.
    #[must_use]
    pub const fn is_successful(self) -> bool {
        !matches!(self, Self::Conflicted)
    }
}

impl std::fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::UpToDate => "already up to date",
            Self::FastForwarded => "fast-forwarded",
            Self::Merged => "merged",
            Self::Conflicted => "conflicted",
        };
        f.write_str(text)
    }
}

/// Working-tree status snapshot, one bucket per kind of change.
///
/// Buckets follow the index/worktree split: `added`, `changed`, and
/// `removed` are staged; `missing`, `modified`, and `untracked` live only
/// in the worktree; `conflicting` entries carry merge markers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorktreeStatus {
    /// Staged new files.
    pub added: BTreeSet<String>,
    /// Staged modifications.
    pub changed: BTreeSet<String>,
    /// Staged deletions.
    pub removed: BTreeSet<String>,
    /// Files deleted in the worktree but still tracked.
    pub missing: BTreeSet<String>,
    /// Tracked files modified in the worktree.
    pub modified: BTreeSet<String>,
    /// Files with unresolved merge conflicts.
    pub conflicting: BTreeSet<String>,
    /// Files git does not track.
    pub untracked: BTreeSet<String>,
}

impl WorktreeStatus {
    /// A tree is clean when every bucket is empty.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.added.is_empty()
            && self.changed.is_empty()
            && self.removed.is_empty()
            && self.missing.is_empty()
            && self.modified.is_empty()
            && self.conflicting.is_empty()
            && self.untracked.is_empty()
    }

    /// Union of all buckets, sorted; what a dirty-tree warning names.
    #[must_use]
    pub fn dirty_files(&self) -> BTreeSet<String> {
        let mut files = BTreeSet::new();
        for bucket in [
            &self.added,
            &self.changed,
            &self.removed,
            &self.missing,
            &self.modified,
            &self.conflicting,
            &self.untracked,
        ] {
            files.extend(bucket.iter().cloned());
        }
        files
    }
}

/// Acquisition side of the transport: produce repository handles.
pub trait GitTransport {
    /// Handle type produced by this transport.
    type Repo: GitRepository;

    /// Clone `url` into `target`, returning a handle to the fresh copy.
    ///
    /// # Errors
    /// Returns an error when the transfer or checkout fails; the target
    /// directory may be left partially populated.
    fn clone_repository(&self, url: &str, target: &Path) -> Result<Self::Repo>;

    /// Open an existing repository at `path`.
    ///
    /// # Errors
    /// Returns an error when `path` holds no repository.
    fn open_repository(&self, path: &Path) -> Result<Self::Repo>;
}

/// Per-handle repository operations consumed by the synchronizer.
#[allow(clippy::missing_errors_doc)]
pub trait GitRepository {
    // === Remote ===

    /// Fetch all refs and tags from origin.
    fn fetch_origin(&self) -> Result<FetchOutcome>;

    /// URL of the origin remote, if one is configured.
    fn origin_url(&self) -> Option<String>;

    // === Refs and checkout ===

    /// Full ref names of branches in the given scope.
    fn branch_refs(&self, scope: BranchScope) -> Result<Vec<String>>;

    /// Check out a branch or tag. With `create_tracking`, first create a
    /// local branch tracking `origin/<label>`.
    fn checkout(&self, label: &str, create_tracking: bool) -> Result<()>;

    /// Merge `origin/<label>` into the current branch.
    fn merge_origin(&self, label: &str) -> Result<MergeOutcome>;

    /// Hard-reset the current branch to `refs/remotes/origin/<label>`,
    /// returning the revision reset to.
    fn reset_hard_to_origin(&self, label: &str) -> Result<Oid>;

    // === Working tree ===

    /// Take a status snapshot of the working tree.
    fn status(&self) -> Result<WorktreeStatus>;

    /// Object id HEAD currently points at.
    fn head_revision(&self) -> Result<Oid>;

    /// Path to the working directory, when the repository has one.
    fn workdir(&self) -> Option<&Path>;
}
