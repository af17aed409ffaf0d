//! Refresh engine keeping a local mirror aligned with its source.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tether_git::{
    BranchScope, CredentialSource, Credentials, GitBackend, GitRepository, GitTransport,
    TransportConfig,
};

use crate::config::{Config, normalize_uri};
use crate::error::{Error, Result};
use crate::workdir::Workdir;

/// Keeps a local copy of a Git repository aligned with its source.
///
/// [`refresh`](Self::refresh) checks out a branch or tag, pulls it up to
/// date when that is safe, and reports the revision the working directory
/// ends up at. The type is generic over the transport so tests can script
/// one; production code goes through [`Synchronizer::from_config`], which
/// wires up the git2 backend.
///
/// All methods take `&self`; the working directory is resolved once under
/// an internal lock, and from-scratch clones are serialized on the same
/// lock so racing first refreshes do the work only once.
pub struct Synchronizer<T: GitTransport> {
    config: Config,
    transport: T,
    workdir: Mutex<Option<Workdir>>,
}

impl Synchronizer<GitBackend> {
    /// Build a synchronizer on the git2 backend, resolving credentials
    /// from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingUri`] if no remote URI is configured.
    pub fn from_config(config: Config) -> Result<Self> {
        let credentials = Credentials::resolve(
            config.username.as_deref(),
            config.password.as_ref(),
            config.passphrase.as_ref(),
        );
        Self::with_backend(config, credentials)
    }

    /// Like [`Self::from_config`], but with a caller-supplied credential
    /// source that takes precedence over the configured settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingUri`] if no remote URI is configured.
    pub fn from_config_with_credentials(
        config: Config,
        provider: Arc<dyn CredentialSource>,
    ) -> Result<Self> {
        Self::with_backend(config, Credentials::Provider(provider))
    }

    fn with_backend(config: Config, credentials: Credentials) -> Result<Self> {
        let transport = GitBackend::new(TransportConfig {
            credentials,
            timeout: config.timeout_duration(),
            strict_host_keys: config.strict_host_key_checking,
        });
        Self::new(config, transport)
    }
}

impl<T: GitTransport> Synchronizer<T> {
    /// Build a synchronizer on an explicit transport.
    ///
    /// The configured URI is normalized before first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingUri`] if no remote URI is configured.
    pub fn new(mut config: Config, transport: T) -> Result<Self> {
        if config.uri.trim().is_empty() {
            return Err(Error::MissingUri);
        }
        config.uri = normalize_uri(&config.uri);
        Ok(Self {
            config,
            transport,
            workdir: Mutex::new(None),
        })
    }

    /// The configuration this synchronizer was built with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Prepare the mirror at application startup.
    ///
    /// When `clone_on_start` is set and the source is remote, any stale
    /// local state is discarded, a fresh clone is taken, and the result is
    /// re-opened to verify it is usable. Otherwise this only resolves the
    /// working directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Synchronization`] if the eager clone or its
    /// re-open fails.
    pub fn bootstrap(&self) -> Result<()> {
        let mut state = self.state();
        let workdir = Self::establish(&self.config, &mut state)?;

        if !self.config.clone_on_start || workdir.is_local_source() {
            return Ok(());
        }

        let cloned = self.copy_from_scratch(workdir)?;
        drop(cloned);

        let reopened = self
            .transport
            .open_repository(workdir.path())
            .map_err(|error| Error::sync(&self.config.uri, error))?;
        drop(reopened);

        Ok(())
    }

    /// Synchronize the working directory to `label` and report the
    /// revision it ends up at, as a hex object id.
    ///
    /// Fetch, merge, and reset problems degrade to warnings and leave the
    /// last good local state in place. The call fails only when the label
    /// is unknown or the local copy cannot be acquired at all.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchLabel`] when no branch or tag matches
    /// `label`, and [`Error::Synchronization`] for fatal acquisition or
    /// checkout failures.
    pub fn refresh(&self, label: &str) -> Result<String> {
        let repo = self.acquire()?;
        self.synchronize(&repo, label)
    }

    /// [`Self::refresh`] with the configured default label.
    ///
    /// # Errors
    ///
    /// Same as [`Self::refresh`].
    pub fn refresh_default(&self) -> Result<String> {
        self.refresh(&self.config.label)
    }

    /// Directory consumers read files from after a refresh: the resolved
    /// source path for `file:` URIs, the base directory otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Synchronization`] if the directory cannot be
    /// resolved, and [`Error::MissingRepository`] for a `file:` URI that
    /// holds no repository.
    pub fn working_directory(&self) -> Result<PathBuf> {
        let mut state = self.state();
        let workdir = Self::establish(&self.config, &mut state)?;
        Ok(workdir.path().to_path_buf())
    }

    fn state(&self) -> MutexGuard<'_, Option<Workdir>> {
        self.workdir.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One-shot working directory resolution, called under the instance
    /// lock. `file:` sources must already contain repository metadata.
    fn establish<'a>(config: &Config, state: &'a mut Option<Workdir>) -> Result<&'a Workdir> {
        let workdir = match state.take() {
            Some(workdir) => workdir,
            None => {
                let workdir =
                    Workdir::establish(config).map_err(|error| Error::sync(&config.uri, error))?;
                if workdir.is_local_source() && !workdir.has_repository() {
                    return Err(Error::MissingRepository(workdir.path().to_path_buf()));
                }
                workdir
            }
        };
        Ok(state.insert(workdir))
    }

    /// Open the existing copy, or take one from scratch. The instance lock
    /// is held throughout, so racing first refreshes clone only once.
    fn acquire(&self) -> Result<T::Repo> {
        let mut state = self.state();
        let workdir = Self::establish(&self.config, &mut state)?;

        if workdir.has_repository() {
            return self
                .transport
                .open_repository(workdir.path())
                .map_err(|error| Error::sync(&self.config.uri, error));
        }

        self.copy_from_scratch(workdir)
    }

    /// Delete whatever the base directory holds, then clone. A failed
    /// clone deletes the directory again so a retry starts from nothing.
    fn copy_from_scratch(&self, workdir: &Workdir) -> Result<T::Repo> {
        workdir
            .delete_base_if_exists()
            .map_err(|error| Error::sync(&self.config.uri, error))?;
        workdir
            .create_base()
            .map_err(|error| Error::sync(&self.config.uri, error))?;

        match self.transport.clone_repository(&self.config.uri, workdir.path()) {
            Ok(repo) => Ok(repo),
            Err(error) => {
                if let Err(cleanup) = workdir.delete_base_if_exists() {
                    warn_with_cause(
                        &format!(
                            "could not clean up base directory after failed clone of '{}'",
                            self.config.uri
                        ),
                        &cleanup,
                    );
                }
                Err(Error::sync(&self.config.uri, error))
            }
        }
    }

    fn synchronize(&self, repo: &T::Repo, label: &str) -> Result<String> {
        if self.should_pull(repo) {
            self.fetch(repo, label);
            self.checkout(repo, label)?;
            if self.is_branch(repo, label)? {
                self.merge(repo, label);
                if let Some(files) = self.dirty_files(repo) {
                    log::warn!(
                        "local copy is dirty or ahead of origin, resetting to origin/{label}: {}",
                        joined(&files)
                    );
                    self.reset_hard(repo, label);
                }
            }
        } else {
            self.checkout(repo, label)?;
        }

        let revision = repo
            .head_revision()
            .map_err(|error| Error::sync(&self.config.uri, error))?;
        Ok(revision.to_string())
    }

    /// Pull when the tree is clean and an origin is configured. A dirty
    /// tree blocks pulling unless `force_pull` is set, in which case the
    /// post-merge reset discards the local edits.
    fn should_pull(&self, repo: &T::Repo) -> bool {
        let dirty = self.dirty_files(repo);
        let origin = repo.origin_url();

        if let Some(files) = dirty {
            if self.config.force_pull {
                log::info!("dirty files found: {}", joined(&files));
                return true;
            }
            log::warn!(
                "cannot pull from remote '{}', the working tree is not clean: {}",
                origin.as_deref().unwrap_or("origin"),
                joined(&files)
            );
            return false;
        }
        origin.is_some()
    }

    /// Fetch from origin. Failures are non-fatal and leave the local state
    /// as "nothing new arrived".
    fn fetch(&self, repo: &T::Repo, label: &str) {
        match repo.fetch_origin() {
            Ok(outcome) if outcome.updated_refs > 0 => {
                log::info!(
                    "fetched origin for '{label}': {} ref updates",
                    outcome.updated_refs
                );
            }
            Ok(_) => {}
            Err(error) => warn_with_cause(
                &format!(
                    "could not fetch from remote '{}' for '{label}'",
                    self.config.uri
                ),
                &error,
            ),
        }
    }

    /// Check out `label`, creating a tracking branch first when the label
    /// exists only on the remote.
    fn checkout(&self, repo: &T::Repo, label: &str) -> Result<()> {
        let create_tracking = self.is_branch(repo, label)? && !self.is_local_branch(repo, label)?;
        repo.checkout(label, create_tracking)
            .map_err(|error| match error {
                tether_git::Error::RefNotFound(_) => Error::NoSuchLabel(label.to_owned()),
                other => Error::sync(&self.config.uri, other),
            })
    }

    /// Merge `origin/<label>` into the checked-out branch. A failed or
    /// conflicted merge is reported and left for the reset step.
    fn merge(&self, repo: &T::Repo, label: &str) {
        match repo.merge_origin(label) {
            Ok(outcome) if !outcome.is_successful() => {
                log::warn!("merge of origin/{label} finished {outcome}");
            }
            Ok(_) => {}
            Err(error) => {
                warn_with_cause(&format!("could not merge origin/{label}"), &error);
            }
        }
    }

    fn reset_hard(&self, repo: &T::Repo, label: &str) {
        match repo.reset_hard_to_origin(label) {
            Ok(revision) => log::info!("reset '{label}' to {revision}"),
            Err(error) => {
                warn_with_cause(&format!("could not reset '{label}' to origin/{label}"), &error);
            }
        }
    }

    fn is_branch(&self, repo: &T::Repo, label: &str) -> Result<bool> {
        self.contains_branch(repo, label, BranchScope::All)
    }

    fn is_local_branch(&self, repo: &T::Repo, label: &str) -> Result<bool> {
        self.contains_branch(repo, label, BranchScope::Local)
    }

    /// A label names a branch when any ref in scope ends with `/<label>`.
    fn contains_branch(&self, repo: &T::Repo, label: &str, scope: BranchScope) -> Result<bool> {
        let refs = repo
            .branch_refs(scope)
            .map_err(|error| Error::sync(&self.config.uri, error))?;
        let suffix = format!("/{label}");
        Ok(refs.iter().any(|name| name.ends_with(&suffix)))
    }

    /// Dirty-file set, `None` for a clean tree. Status failures are logged
    /// and treated as dirty.
    fn dirty_files(&self, repo: &T::Repo) -> Option<BTreeSet<String>> {
        match repo.status() {
            Ok(status) => {
                if status.is_clean() {
                    None
                } else {
                    Some(status.dirty_files())
                }
            }
            Err(error) => {
                warn_with_cause("could not read working tree status, treating it as dirty", &error);
                Some(BTreeSet::new())
            }
        }
    }
}

/// Warn with the message, then surface the cause chain at debug level.
fn warn_with_cause(message: &str, error: &dyn std::error::Error) {
    log::warn!("{message}: {error}");
    if log::log_enabled!(log::Level::Debug) {
        let mut source = error.source();
        while let Some(cause) = source {
            log::debug!("caused by: {cause}");
            source = cause.source();
        }
    }
}

fn joined(files: &BTreeSet<String>) -> String {
    if files.is_empty() {
        return "(unknown)".to_owned();
    }
    files
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
