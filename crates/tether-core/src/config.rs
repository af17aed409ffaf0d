//! Mirror configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::error::Result;

/// Scheme prefix marking an on-disk source repository.
const FILE_URI_PREFIX: &str = "file:";

/// Settings for one mirrored repository.
///
/// Built literally by the embedding application or loaded from a TOML
/// file. The synchronizer captures it once at construction and does not
/// watch it for changes afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// URI of the repository to mirror.
    #[serde(default)]
    pub uri: String,
    /// Directory holding the local copy. A temp directory is generated
    /// when unset.
    #[serde(default)]
    pub basedir: Option<PathBuf>,
    /// Branch or tag checked out when a refresh names no label.
    #[serde(default = "default_label")]
    pub label: String,
    /// Account name for the remote.
    #[serde(default)]
    pub username: Option<String>,
    /// Password matching `username`.
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Passphrase for the default SSH key.
    #[serde(default)]
    pub passphrase: Option<SecretString>,
    /// Pull even when the working tree is dirty. Local edits are discarded
    /// by the post-merge hard reset.
    #[serde(default)]
    pub force_pull: bool,
    /// Clone eagerly at bootstrap instead of on the first refresh.
    #[serde(default = "default_clone_on_start")]
    pub clone_on_start: bool,
    /// Verify TLS certificates and SSH host keys.
    #[serde(default = "default_strict_host_key_checking")]
    pub strict_host_key_checking: bool,
    /// Network operation deadline in seconds. Zero disables it.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Name prefix for generated temp directories.
    #[serde(default = "default_temp_dir_prefix")]
    pub temp_dir_prefix: String,
}

fn default_label() -> String {
    "master".to_owned()
}

const fn default_clone_on_start() -> bool {
    true
}

const fn default_strict_host_key_checking() -> bool {
    true
}

const fn default_timeout() -> u64 {
    5
}

fn default_temp_dir_prefix() -> String {
    "tether".to_owned()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            uri: String::new(),
            basedir: None,
            label: default_label(),
            username: None,
            password: None,
            passphrase: None,
            force_pull: false,
            clone_on_start: default_clone_on_start(),
            strict_host_key_checking: default_strict_host_key_checking(),
            timeout: default_timeout(),
            temp_dir_prefix: default_temp_dir_prefix(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. An absent file yields the
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Configured deadline as a duration, `None` when disabled.
    #[must_use]
    pub const fn timeout_duration(&self) -> Option<Duration> {
        if self.timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout))
        }
    }

    /// Whether the URI names an on-disk repository rather than a remote.
    #[must_use]
    pub fn is_local_source(&self) -> bool {
        self.uri.starts_with(FILE_URI_PREFIX)
    }

    /// Filesystem path of a `file:` URI, `None` for remote URIs.
    ///
    /// Proper `file://` URLs are resolved through [`Url`] so percent
    /// escapes and authority parts are handled; the shorthand forms
    /// `file:/abs/path` and `file:./relative` are taken literally.
    #[must_use]
    pub fn local_source_path(&self) -> Option<PathBuf> {
        let rest = self.uri.strip_prefix(FILE_URI_PREFIX)?;
        if rest.starts_with("//") {
            if let Ok(url) = Url::parse(&self.uri) {
                if let Ok(path) = url.to_file_path() {
                    return Some(path);
                }
            }
        }
        Some(PathBuf::from(rest))
    }
}

/// Normalize a remote URI: strip trailing slashes, and give bare
/// `scheme://host` URIs a root path so they stay valid remote names.
#[must_use]
pub fn normalize_uri(uri: &str) -> String {
    let mut uri = uri.to_owned();
    while uri.ends_with('/') {
        uri.pop();
    }
    if let Some(index) = uri.find("://") {
        if index > 0 && !uri[index + 3..].contains('/') {
            uri.push('/');
        }
    }
    uri
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn default_values() {
        let config = Config::default();

        assert!(config.uri.is_empty());
        assert!(config.basedir.is_none());
        assert_eq!(config.label, "master");
        assert!(!config.force_pull);
        assert!(config.clone_on_start);
        assert!(config.strict_host_key_checking);
        assert_eq!(config.timeout, 5);
        assert_eq!(config.temp_dir_prefix, "tether");
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let temp = TempDir::new().unwrap();

        let config = Config::load(temp.path().join("tether.toml")).unwrap();

        assert!(config.uri.is_empty());
        assert_eq!(config.label, "master");
    }

    #[test]
    fn load_parses_fields_and_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tether.toml");
        std::fs::write(
            &path,
            r#"
uri = "https://example.com/config.git"
label = "release"
force_pull = true
timeout = 30
password = "hunter2"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();

        assert_eq!(config.uri, "https://example.com/config.git");
        assert_eq!(config.label, "release");
        assert!(config.force_pull);
        assert_eq!(config.timeout, 30);
        assert_eq!(config.password.unwrap().expose_secret(), "hunter2");
        assert!(config.clone_on_start);
        assert!(config.strict_host_key_checking);
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tether.toml");
        std::fs::write(&path, "uri = [not toml").unwrap();

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn normalize_strips_trailing_slashes() {
        assert_eq!(
            normalize_uri("https://example.com/repo.git///"),
            "https://example.com/repo.git"
        );
        assert_eq!(normalize_uri("git://localhost/foo/"), "git://localhost/foo");
    }

    #[test]
    fn normalize_gives_bare_hosts_a_root_path() {
        assert_eq!(normalize_uri("git://localhost"), "git://localhost/");
        assert_eq!(normalize_uri("git://localhost//"), "git://localhost/");
    }

    #[test]
    fn normalize_leaves_other_uris_alone() {
        assert_eq!(normalize_uri("file:./local/repo"), "file:./local/repo");
        assert_eq!(normalize_uri("/srv/git/repo"), "/srv/git/repo");
        assert_eq!(
            normalize_uri("ssh://git@example.com/repo"),
            "ssh://git@example.com/repo"
        );
    }

    #[test]
    fn local_source_path_resolves_file_uris() {
        let full = Config {
            uri: "file:///srv/git/repo".to_owned(),
            ..Config::default()
        };
        assert_eq!(full.local_source_path(), Some(PathBuf::from("/srv/git/repo")));

        let shorthand = Config {
            uri: "file:/srv/git/repo".to_owned(),
            ..Config::default()
        };
        assert_eq!(
            shorthand.local_source_path(),
            Some(PathBuf::from("/srv/git/repo"))
        );

        let relative = Config {
            uri: "file:./local/repo".to_owned(),
            ..Config::default()
        };
        assert!(relative.is_local_source());
        assert_eq!(
            relative.local_source_path(),
            Some(PathBuf::from("./local/repo"))
        );
    }

    #[test]
    fn remote_uris_have_no_local_source() {
        let config = Config {
            uri: "https://example.com/repo.git".to_owned(),
            ..Config::default()
        };

        assert!(!config.is_local_source());
        assert!(config.local_source_path().is_none());
    }

    #[test]
    fn timeout_zero_disables_deadline() {
        let config = Config {
            timeout: 0,
            ..Config::default()
        };

        assert!(config.timeout_duration().is_none());
        assert_eq!(
            Config::default().timeout_duration(),
            Some(Duration::from_secs(5))
        );
    }
}
