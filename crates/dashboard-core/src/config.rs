use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000/api";
pub const DEFAULT_LOGIN_URL: &str = "http://127.0.0.1:3000/api/auth/login";

/// Locates the per-user directory holding durable client storage.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Attempt to discover the persistent configuration directory, creating it if needed.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("app", "dashboard", "dashboard")
            .ok_or(ConfigError::MissingProjectDirs)?;
        Self::from_root(dirs.config_dir().to_path_buf())
    }

    /// Use an explicit root directory, creating it with user-only permissions.
    pub fn from_root(root: PathBuf) -> Result<Self, ConfigError> {
        fs::create_dir_all(&root).map_err(ConfigError::CreateDir)?;
        set_user_only_permissions(&root)?;
        Ok(Self { root })
    }

    /// Directory that namespaces storage for the given profile.
    pub fn storage_dir(&self, profile: &str) -> PathBuf {
        self.root.join(profile)
    }
}

/// Endpoints the client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base: Url,
    pub login_url: Url,
}

impl ClientConfig {
    pub fn with_api_base(mut self, api_base: Url) -> Self {
        self.api_base = api_base;
        self
    }

    pub fn with_login_url(mut self, login_url: Url) -> Self {
        self.login_url = login_url;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: Url::parse(DEFAULT_API_URL).expect("valid default API URL"),
            login_url: Url::parse(DEFAULT_LOGIN_URL).expect("valid default login URL"),
        }
    }
}

fn set_user_only_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let metadata = fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o700);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Errors that can occur when working with configuration directories.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory for dashboard")]
    MissingProjectDirs,
    #[error("failed to create configuration directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn storage_dir_is_namespaced_by_profile() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("cfg");
        let locator = ConfigLocator::from_root(root.clone()).unwrap();
        let path = locator.storage_dir("default");
        assert!(path.ends_with("cfg/default"));
        assert!(root.exists());
    }

    #[cfg(unix)]
    #[test]
    fn root_is_user_only() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("cfg");
        ConfigLocator::from_root(root.clone()).unwrap();
        let mode = fs::metadata(&root).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn client_config_overrides() {
        let config = ClientConfig::default()
            .with_api_base(Url::parse("https://admin.example.com/api").unwrap());
        assert_eq!(config.api_base.as_str(), "https://admin.example.com/api");
        assert_eq!(config.login_url.as_str(), DEFAULT_LOGIN_URL);
    }
}
