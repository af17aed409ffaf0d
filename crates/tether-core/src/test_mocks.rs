//! Scripted transport doubles for synchronizer tests.
//!
//! The mock records every call against shared state, so tests can assert
//! how the engine drove the transport without touching a real repository.
//! Handles materialize a `.git` marker on clone, which is all the engine
//! probes for.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tether_git::{
    BranchScope, Error as GitError, FetchOutcome, GitRepository, GitTransport, MergeOutcome, Oid,
    Result as GitResult, WorktreeStatus,
};

/// Shared script and call log behind every handle the mock hands out.
pub struct MockState {
    head: Mutex<Oid>,
    branch_refs: Mutex<Vec<String>>,
    tags: Mutex<Vec<String>>,
    origin_url: Mutex<Option<String>>,
    /// Status script, consumed one entry per query; the last entry sticks.
    statuses: Mutex<Vec<WorktreeStatus>>,
    status_cursor: AtomicUsize,
    merge_outcome: Mutex<MergeOutcome>,
    fetch_updates: AtomicUsize,
    fail_clone: AtomicBool,
    fail_fetch: AtomicBool,
    fail_merge: AtomicBool,
    fail_status: AtomicBool,
    clone_calls: AtomicUsize,
    open_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    merge_calls: AtomicUsize,
    reset_calls: AtomicUsize,
    checkouts: Mutex<Vec<(String, bool)>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            head: Mutex::new(Oid::zero()),
            branch_refs: Mutex::new(Vec::new()),
            tags: Mutex::new(Vec::new()),
            origin_url: Mutex::new(None),
            statuses: Mutex::new(Vec::new()),
            status_cursor: AtomicUsize::new(0),
            merge_outcome: Mutex::new(MergeOutcome::UpToDate),
            fetch_updates: AtomicUsize::new(0),
            fail_clone: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            fail_merge: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
            clone_calls: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            merge_calls: AtomicUsize::new(0),
            reset_calls: AtomicUsize::new(0),
            checkouts: Mutex::new(Vec::new()),
        }
    }
}

impl MockState {
    pub fn clone_calls(&self) -> usize {
        self.clone_calls.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn merge_calls(&self) -> usize {
        self.merge_calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) -> usize {
        self.reset_calls.load(Ordering::SeqCst)
    }

    /// Every checkout attempt as `(label, create_tracking)`, in order.
    pub fn checkouts(&self) -> Vec<(String, bool)> {
        self.checkouts.lock().unwrap().clone()
    }
}

/// Scripted [`GitTransport`] with consuming `with_`/`failing_` builders.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle onto the shared call log, valid after `self` moves into the
    /// synchronizer.
    pub fn spy(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }

    pub fn with_head(self, hex: &str) -> Self {
        *self.state.head.lock().unwrap() = Oid::from_str(hex).unwrap();
        self
    }

    pub fn with_branch_ref(self, name: &str) -> Self {
        self.state.branch_refs.lock().unwrap().push(name.to_owned());
        self
    }

    pub fn with_tag(self, name: &str) -> Self {
        self.state.tags.lock().unwrap().push(name.to_owned());
        self
    }

    pub fn with_origin_url(self, url: &str) -> Self {
        *self.state.origin_url.lock().unwrap() = Some(url.to_owned());
        self
    }

    pub fn with_clean_status(self) -> Self {
        self.state
            .statuses
            .lock()
            .unwrap()
            .push(WorktreeStatus::default());
        self
    }

    pub fn with_dirty_status(self, modified: &[&str]) -> Self {
        let mut status = WorktreeStatus::default();
        status
            .modified
            .extend(modified.iter().map(|&file| file.to_owned()));
        self.state.statuses.lock().unwrap().push(status);
        self
    }

    pub fn with_merge_outcome(self, outcome: MergeOutcome) -> Self {
        *self.state.merge_outcome.lock().unwrap() = outcome;
        self
    }

    pub fn with_fetch_updates(self, count: usize) -> Self {
        self.state.fetch_updates.store(count, Ordering::SeqCst);
        self
    }

    pub fn failing_clone(self) -> Self {
        self.state.fail_clone.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_fetch(self) -> Self {
        self.state.fail_fetch.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_merge(self) -> Self {
        self.state.fail_merge.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_status(self) -> Self {
        self.state.fail_status.store(true, Ordering::SeqCst);
        self
    }
}

impl GitTransport for MockTransport {
    type Repo = MockRepo;

    fn clone_repository(&self, _url: &str, target: &Path) -> GitResult<Self::Repo> {
        self.state.clone_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_clone.load(Ordering::SeqCst) {
            return Err(GitError::Git2(git2::Error::from_str(
                "scripted clone failure",
            )));
        }
        fs::create_dir_all(target.join(".git"))
            .map_err(|error| GitError::Git2(git2::Error::from_str(&error.to_string())))?;
        Ok(MockRepo {
            state: Arc::clone(&self.state),
            path: target.to_path_buf(),
        })
    }

    fn open_repository(&self, path: &Path) -> GitResult<Self::Repo> {
        self.state.open_calls.fetch_add(1, Ordering::SeqCst);
        if !path.join(".git").exists() {
            return Err(GitError::Git2(git2::Error::from_str("not a repository")));
        }
        Ok(MockRepo {
            state: Arc::clone(&self.state),
            path: path.to_path_buf(),
        })
    }
}

/// Handle produced by [`MockTransport`]; every operation answers from the
/// shared script.
pub struct MockRepo {
    state: Arc<MockState>,
    path: PathBuf,
}

impl GitRepository for MockRepo {
    fn fetch_origin(&self) -> GitResult<FetchOutcome> {
        self.state.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_fetch.load(Ordering::SeqCst) {
            return Err(GitError::Git2(git2::Error::from_str(
                "scripted fetch failure",
            )));
        }
        Ok(FetchOutcome {
            updated_refs: self.state.fetch_updates.load(Ordering::SeqCst),
        })
    }

    fn origin_url(&self) -> Option<String> {
        self.state.origin_url.lock().unwrap().clone()
    }

    fn branch_refs(&self, scope: BranchScope) -> GitResult<Vec<String>> {
        let refs = self.state.branch_refs.lock().unwrap();
        Ok(match scope {
            BranchScope::Local => refs
                .iter()
                .filter(|name| name.starts_with("refs/heads/"))
                .cloned()
                .collect(),
            BranchScope::All => refs.clone(),
        })
    }

    fn checkout(&self, label: &str, create_tracking: bool) -> GitResult<()> {
        self.state
            .checkouts
            .lock()
            .unwrap()
            .push((label.to_owned(), create_tracking));
        let suffix = format!("/{label}");
        let known_branch = self
            .state
            .branch_refs
            .lock()
            .unwrap()
            .iter()
            .any(|name| name.ends_with(&suffix));
        let known_tag = self.state.tags.lock().unwrap().iter().any(|tag| tag == label);
        if known_branch || known_tag {
            Ok(())
        } else {
            Err(GitError::RefNotFound(label.to_owned()))
        }
    }

    fn merge_origin(&self, _label: &str) -> GitResult<MergeOutcome> {
        self.state.merge_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_merge.load(Ordering::SeqCst) {
            return Err(GitError::Git2(git2::Error::from_str(
                "scripted merge failure",
            )));
        }
        Ok(*self.state.merge_outcome.lock().unwrap())
    }

    fn reset_hard_to_origin(&self, _label: &str) -> GitResult<Oid> {
        self.state.reset_calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.state.head.lock().unwrap())
    }

    fn status(&self) -> GitResult<WorktreeStatus> {
        if self.state.fail_status.load(Ordering::SeqCst) {
            return Err(GitError::Git2(git2::Error::from_str(
                "scripted status failure",
            )));
        }
        let statuses = self.state.statuses.lock().unwrap();
        if statuses.is_empty() {
            return Ok(WorktreeStatus::default());
        }
        let cursor = self.state.status_cursor.fetch_add(1, Ordering::SeqCst);
        let index = cursor.min(statuses.len() - 1);
        Ok(statuses[index].clone())
    }

    fn head_revision(&self) -> GitResult<Oid> {
        Ok(*self.state.head.lock().unwrap())
    }

    fn workdir(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
