//! Credential resolution and per-operation transport configuration.
//!
//! Everything the remote side of a clone or fetch needs travels in a
//! [`TransportConfig`]: which credentials to offer, how long a transfer may
//! run, and whether host certificates are verified. The synchronizer never
//! inspects which credential kind is in use; it hands the config to the
//! backend once and forgets about it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use git2::{CertificateCheckStatus, Cred, CredentialType, RemoteCallbacks};
use secrecy::{ExposeSecret, SecretString};

/// Producer of transport credentials, for embedders that manage their own
/// secret material (keychains, vaults, short-lived tokens).
///
/// An injected source takes precedence over any username/password or
/// passphrase configuration.
pub trait CredentialSource: Send + Sync {
    /// Produce a credential for `url`, honoring the types in `allowed`.
    ///
    /// # Errors
    /// Returns a git2 error when no suitable credential can be produced;
    /// the transport surfaces it as an authentication failure.
    fn credential(
        &self,
        url: &str,
        username: Option<&str>,
        allowed: CredentialType,
    ) -> std::result::Result<Cred, git2::Error>;
}

/// Credential configuration resolved once per transport.
#[derive(Clone, Default)]
pub enum Credentials {
    /// Explicitly injected producer.
    Provider(Arc<dyn CredentialSource>),

    /// Username and password, for HTTPS or password-authenticated SSH.
    UserPass {
        /// Account name presented to the remote.
        username: String,
        /// Matching password, exposed only at the callback boundary.
        password: SecretString,
    },

    /// Passphrase unlocking the default SSH key (`~/.ssh/id_ed25519`,
    /// falling back to `~/.ssh/id_rsa`).
    SshPassphrase(SecretString),

    /// No explicit configuration: try the SSH agent for SSH remotes and the
    /// configured git credential helper for HTTPS, like the git CLI would.
    #[default]
    Chain,
}

impl Credentials {
    /// Resolve credentials from plain configuration values.
    ///
    /// A username/password pair beats a passphrase; with neither configured
    /// the default chain applies. Injecting a [`CredentialSource`] happens
    /// at the call site instead and beats all of these.
    #[must_use]
    pub fn resolve(
        username: Option<&str>,
        password: Option<&SecretString>,
        passphrase: Option<&SecretString>,
    ) -> Self {
        match (username, password, passphrase) {
            (Some(username), Some(password), _) => Self::UserPass {
                username: username.to_owned(),
                password: password.clone(),
            },
            (_, _, Some(passphrase)) => Self::SshPassphrase(passphrase.clone()),
            _ => Self::Chain,
        }
    }

    /// Produce one credential attempt for the transport callback.
    fn produce(
        &self,
        url: &str,
        username: Option<&str>,
        allowed: CredentialType,
    ) -> std::result::Result<Cred, git2::Error> {
        match self {
            Self::Provider(source) => source.credential(url, username, allowed),
            Self::UserPass { username, password } => {
                if allowed.is_username() {
                    return Cred::username(username);
                }
                Cred::userpass_plaintext(username, password.expose_secret())
            }
            Self::SshPassphrase(passphrase) => {
                let username = username.unwrap_or("git");
                if allowed.is_username() {
                    return Cred::username(username);
                }
                if allowed.is_ssh_key() {
                    return match default_ssh_key() {
                        Some(key) => {
                            Cred::ssh_key(username, None, &key, Some(passphrase.expose_secret()))
                        }
                        None => Cred::ssh_key_from_agent(username),
                    };
                }
                Cred::default()
            }
            Self::Chain => {
                let username = username.unwrap_or("git");
                if allowed.is_username() {
                    return Cred::username(username);
                }
                if allowed.is_ssh_key() {
                    return Cred::ssh_key_from_agent(username);
                }
                if allowed.is_user_pass_plaintext() {
                    let config = git2::Config::open_default()?;
                    return Cred::credential_helper(&config, url, Some(username));
                }
                Cred::default()
            }
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provider(_) => f.write_str("Provider"),
            Self::UserPass { username, .. } => f
                .debug_struct("UserPass")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::SshPassphrase(_) => f.write_str("SshPassphrase"),
            Self::Chain => f.write_str("Chain"),
        }
    }
}

/// First default SSH key present on disk, if any.
fn default_ssh_key() -> Option<PathBuf> {
    let ssh_dir = dirs::home_dir()?.join(".ssh");
    ["id_ed25519", "id_rsa"]
        .into_iter()
        .map(|name| ssh_dir.join(name))
        .find(|path| path.exists())
}

/// Transport-level configuration attached to every clone and fetch.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Credentials offered to the remote.
    pub credentials: Credentials,

    /// Per-operation deadline; `None` waits indefinitely.
    pub timeout: Option<Duration>,

    /// Verify TLS certificates and SSH host keys. Disabling accepts
    /// whatever host the remote presents.
    pub strict_host_keys: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            timeout: None,
            strict_host_keys: true,
        }
    }
}

impl TransportConfig {
    /// Assemble the remote callbacks for one operation: credential
    /// production, host-key policy, and the transfer watchdog.
    ///
    /// The watchdog cancels the transfer once the elapsed wall time passes
    /// the deadline; git2 reports that cancellation as a callback error,
    /// which [`crate::Error::Timeout`] recognizes.
    #[must_use]
    pub fn remote_callbacks(&self) -> RemoteCallbacks<'static> {
        let mut callbacks = RemoteCallbacks::new();

        let credentials = self.credentials.clone();
        callbacks.credentials(move |url, username, allowed| {
            credentials.produce(url, username, allowed)
        });

        if !self.strict_host_keys {
            callbacks.certificate_check(|_certificate, _host| {
                Ok(CertificateCheckStatus::CertificateOk)
            });
        }

        if let Some(timeout) = self.timeout {
            let started = Instant::now();
            callbacks.transfer_progress(move |_progress| started.elapsed() <= timeout);
        }

        callbacks
    }
}
