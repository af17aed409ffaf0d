//! Repository wrapper implementing the transport capability on git2.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use git2::{AutotagOption, BranchType, FetchOptions, ObjectType, Oid, ResetType, StatusOptions};

use crate::credentials::TransportConfig;
use crate::error::{Error, Result};
use crate::traits::{
    BranchScope, FetchOutcome, GitRepository, GitTransport, MergeOutcome, WorktreeStatus,
};

/// Remote every synchronized copy talks to.
const ORIGIN: &str = "origin";

/// High-level wrapper around a git repository.
///
/// Carries the transport configuration it was opened with, so fetches use
/// the same credentials and deadline as the original clone.
pub struct Repository {
    inner: git2::Repository,
    transport: TransportConfig,
}

impl Repository {
    /// Open the repository at exactly `path`.
    ///
    /// No parent-directory discovery: the synchronizer manages a specific
    /// directory and must not pick up an enclosing repository.
    ///
    /// # Errors
    /// Returns error if `path` holds no repository.
    pub fn open(path: impl AsRef<Path>, transport: TransportConfig) -> Result<Self> {
        let inner = git2::Repository::open(path)?;
        Ok(Self { inner, transport })
    }

    /// Clone `url` into `target`.
    ///
    /// # Errors
    /// Returns error if the transfer fails, the deadline fires, or the
    /// initial checkout fails. The target directory may be left partially
    /// populated; the caller owns its cleanup.
    pub fn clone_from(
        url: &str,
        target: impl AsRef<Path>,
        transport: TransportConfig,
    ) -> Result<Self> {
        let mut options = FetchOptions::new();
        options.remote_callbacks(transport.remote_callbacks());
        options.download_tags(AutotagOption::All);

        let inner = git2::build::RepoBuilder::new()
            .fetch_options(options)
            .clone(url, target.as_ref())
            .map_err(|e| transfer_error(&transport, e))?;

        Ok(Self { inner, transport })
    }

    /// Get the path to the working directory, if the repository has one.
    #[must_use]
    pub fn workdir(&self) -> Option<&Path> {
        self.inner.workdir()
    }

    /// Get the path to the .git directory.
    #[must_use]
    pub fn git_dir(&self) -> &Path {
        self.inner.path()
    }

    // === Remote operations ===

    /// Fetch all refs and tags from origin with the configured credentials
    /// and deadline.
    ///
    /// # Errors
    /// Returns `RemoteNotFound` if no origin is configured, `Timeout` if
    /// the watchdog cancelled the transfer, or the underlying git2 error.
    pub fn fetch_origin(&self) -> Result<FetchOutcome> {
        let mut remote = self
            .inner
            .find_remote(ORIGIN)
            .map_err(|_| Error::RemoteNotFound(ORIGIN.into()))?;

        let updated = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&updated);

        let mut callbacks = self.transport.remote_callbacks();
        callbacks.update_tips(move |_refname, _old, _new| {
            counter.fetch_add(1, Ordering::Relaxed);
            true
        });

        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);
        options.download_tags(AutotagOption::All);

        remote
            .fetch(&[] as &[&str], Some(&mut options), None)
            .map_err(|e| transfer_error(&self.transport, e))?;

        Ok(FetchOutcome {
            updated_refs: updated.load(Ordering::Relaxed),
        })
    }

    /// URL of the origin remote, if one is configured.
    #[must_use]
    pub fn origin_url(&self) -> Option<String> {
        self.inner
            .find_remote(ORIGIN)
            .ok()
            .and_then(|remote| remote.url().map(String::from))
    }

    // === Refs and checkout ===

    /// Full ref names of branches in the given scope, e.g.
    /// `refs/heads/master` or `refs/remotes/origin/master`.
    ///
    /// # Errors
    /// Returns error if branch listing fails.
    pub fn branch_refs(&self, scope: BranchScope) -> Result<Vec<String>> {
        let filter = match scope {
            BranchScope::Local => Some(BranchType::Local),
            BranchScope::All => None,
        };

        let mut names = Vec::new();
        for entry in self.inner.branches(filter)? {
            let (branch, _) = entry?;
            if let Some(name) = branch.get().name() {
                names.push(name.to_owned());
            }
        }

        Ok(names)
    }

    /// Check out a branch or tag by name.
    ///
    /// With `create_tracking`, a local branch tracking `origin/<label>` is
    /// created first; use it when the label exists only on the remote.
    /// Branches become the symbolic HEAD; tags and raw ids detach it.
    ///
    /// # Errors
    /// Returns `RefNotFound` if the label resolves to nothing, or the
    /// underlying git2 error (including checkout conflicts).
    pub fn checkout(&self, label: &str, create_tracking: bool) -> Result<()> {
        if create_tracking {
            self.create_tracking_branch(label)?;
        }

        let (object, reference) = self.inner.revparse_ext(label).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                Error::RefNotFound(label.into())
            } else {
                Error::Git2(e)
            }
        })?;
        let commit = object.peel(ObjectType::Commit)?;

        self.inner.checkout_tree(&commit, None)?;
        match reference {
            Some(gitref) if gitref.is_branch() => {
                let name = gitref
                    .name()
                    .ok_or_else(|| Error::RefNotFound(label.into()))?;
                self.inner.set_head(name)?;
            }
            _ => self.inner.set_head_detached(commit.id())?,
        }

        Ok(())
    }

    /// Merge `origin/<label>` into the current branch.
    ///
    /// Fast-forwards when possible; otherwise attempts a real merge and
    /// commits it. A conflicted merge leaves the markers in the tree and
    /// reports [`MergeOutcome::Conflicted`] instead of failing.
    ///
    /// # Errors
    /// Returns `RefNotFound` if origin has no such branch, or the
    /// underlying git2 error (including a checkout blocked by local edits).
    pub fn merge_origin(&self, label: &str) -> Result<MergeOutcome> {
        let refname = format!("refs/remotes/{ORIGIN}/{label}");
        let reference = self.inner.find_reference(&refname).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                Error::RefNotFound(refname.clone())
            } else {
                Error::Git2(e)
            }
        })?;
        let annotated = self.inner.reference_to_annotated_commit(&reference)?;

        let (analysis, _) = self.inner.merge_analysis(&[&annotated])?;
        if analysis.is_up_to_date() {
            return Ok(MergeOutcome::UpToDate);
        }
        if analysis.is_fast_forward() {
            return self.fast_forward(&annotated, label);
        }
        self.true_merge(&annotated, label)
    }

    /// Hard-reset the current branch to `refs/remotes/origin/<label>`.
    ///
    /// Discards all index and working-tree changes.
    ///
    /// # Errors
    /// Returns `RefNotFound` if origin has no such branch.
    pub fn reset_hard_to_origin(&self, label: &str) -> Result<Oid> {
        let refname = format!("refs/remotes/{ORIGIN}/{label}");
        let reference = self.inner.find_reference(&refname).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                Error::RefNotFound(refname.clone())
            } else {
                Error::Git2(e)
            }
        })?;
        let commit = reference.peel_to_commit()?;

        self.inner
            .reset(commit.as_object(), ResetType::Hard, None)?;

        Ok(commit.id())
    }

    // === Working tree ===

    /// Take a status snapshot, bucketed the way `git status` reports it.
    ///
    /// # Errors
    /// Returns error if the status query fails.
    pub fn status(&self) -> Result<WorktreeStatus> {
        let mut options = StatusOptions::new();
        options.include_untracked(true).recurse_untracked_dirs(true);

        let statuses = self.inner.statuses(Some(&mut options))?;
        let mut snapshot = WorktreeStatus::default();

        for entry in statuses.iter() {
            let Some(path) = entry.path() else { continue };
            let status = entry.status();

            if status.is_index_new() {
                snapshot.added.insert(path.to_owned());
            }
            if status.is_index_modified() {
                snapshot.changed.insert(path.to_owned());
            }
            if status.is_index_deleted() {
                snapshot.removed.insert(path.to_owned());
            }
            if status.is_wt_deleted() {
                snapshot.missing.insert(path.to_owned());
            }
            if status.is_wt_modified() {
                snapshot.modified.insert(path.to_owned());
            }
            if status.is_conflicted() {
                snapshot.conflicting.insert(path.to_owned());
            }
            if status.is_wt_new() {
                snapshot.untracked.insert(path.to_owned());
            }
        }

        Ok(snapshot)
    }

    /// Object id HEAD currently points at.
    ///
    /// # Errors
    /// Returns error on an unborn or broken HEAD.
    pub fn head_revision(&self) -> Result<Oid> {
        self.inner
            .head()?
            .target()
            .ok_or_else(|| Error::RefNotFound("HEAD".into()))
    }

    // === Internals ===

    fn create_tracking_branch(&self, label: &str) -> Result<()> {
        let remote_name = format!("{ORIGIN}/{label}");
        let remote_branch = self
            .inner
            .find_branch(&remote_name, BranchType::Remote)
            .map_err(|_| Error::RefNotFound(remote_name.clone()))?;
        let commit = remote_branch.get().peel_to_commit()?;

        let mut branch = self.inner.branch(label, &commit, false)?;
        branch.set_upstream(Some(&remote_name))?;

        Ok(())
    }

    fn fast_forward(
        &self,
        target: &git2::AnnotatedCommit<'_>,
        label: &str,
    ) -> Result<MergeOutcome> {
        let refname = format!("refs/heads/{label}");
        let mut reference = self.inner.find_reference(&refname)?;
        reference.set_target(target.id(), &format!("fast-forward to {}", target.id()))?;
        self.inner.set_head(&refname)?;
        // Safe checkout: local edits that collide abort the merge instead
        // of being clobbered
        self.inner.checkout_head(None)?;

        Ok(MergeOutcome::FastForwarded)
    }

    fn true_merge(
        &self,
        target: &git2::AnnotatedCommit<'_>,
        label: &str,
    ) -> Result<MergeOutcome> {
        self.inner.merge(&[target], None, None)?;

        let mut index = self.inner.index()?;
        if index.has_conflicts() {
            return Ok(MergeOutcome::Conflicted);
        }

        let tree_id = index.write_tree_to(&self.inner)?;
        let tree = self.inner.find_tree(tree_id)?;
        let head_commit = self.inner.head()?.peel_to_commit()?;
        let merged_commit = self.inner.find_commit(target.id())?;
        let signature = self.commit_signature()?;
        let message = format!("Merge remote-tracking branch '{ORIGIN}/{label}'");

        self.inner.commit(
            Some("HEAD"),
            &signature,
            &signature,
            &message,
            &tree,
            &[&head_commit, &merged_commit],
        )?;
        self.inner.cleanup_state()?;

        Ok(MergeOutcome::Merged)
    }

    fn commit_signature(&self) -> Result<git2::Signature<'static>> {
        self.inner
            .signature()
            .or_else(|_| git2::Signature::now("tether", "tether@localhost"))
            .map_err(Error::from)
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("path", &self.git_dir())
            .finish()
    }
}

impl GitRepository for Repository {
    fn fetch_origin(&self) -> Result<FetchOutcome> {
        self.fetch_origin()
    }

    fn origin_url(&self) -> Option<String> {
        self.origin_url()
    }

    fn branch_refs(&self, scope: BranchScope) -> Result<Vec<String>> {
        self.branch_refs(scope)
    }

    fn checkout(&self, label: &str, create_tracking: bool) -> Result<()> {
        self.checkout(label, create_tracking)
    }

    fn merge_origin(&self, label: &str) -> Result<MergeOutcome> {
        self.merge_origin(label)
    }

    fn reset_hard_to_origin(&self, label: &str) -> Result<Oid> {
        self.reset_hard_to_origin(label)
    }

    fn status(&self) -> Result<WorktreeStatus> {
        self.status()
    }

    fn head_revision(&self) -> Result<Oid> {
        self.head_revision()
    }

    fn workdir(&self) -> Option<&Path> {
        self.workdir()
    }
}

/// Default transport backed by git2.
#[derive(Debug, Clone, Default)]
pub struct GitBackend {
    config: TransportConfig,
}

impl GitBackend {
    /// Create a backend with the given transport configuration.
    #[must_use]
    pub const fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

impl GitTransport for GitBackend {
    type Repo = Repository;

    fn clone_repository(&self, url: &str, target: &Path) -> Result<Repository> {
        Repository::clone_from(url, target, self.config.clone())
    }

    fn open_repository(&self, path: &Path) -> Result<Repository> {
        Repository::open(path, self.config.clone())
    }
}

/// Map a cancelled transfer to `Timeout`; everything else passes through.
fn transfer_error(transport: &TransportConfig, error: git2::Error) -> Error {
    match transport.timeout {
        Some(timeout) if error.code() == git2::ErrorCode::User => Error::Timeout(timeout),
        _ => Error::Git2(error),
    }
}
