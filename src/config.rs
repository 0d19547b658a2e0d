//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub authenticator: AuthenticatorConfig,
}

/// On-disk layout
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for all wallet data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Registry file name, relative to `data_dir`
    #[serde(default = "default_registry_file")]
    pub registry_file: String,

    /// Handle cache directory, relative to `data_dir`
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Authenticator credentials directory, relative to `data_dir`
    #[serde(default = "default_credentials_dir")]
    pub credentials_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            registry_file: default_registry_file(),
            cache_dir: default_cache_dir(),
            credentials_dir: default_credentials_dir(),
        }
    }
}

impl StorageConfig {
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join(&self.registry_file)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.cache_dir)
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join(&self.credentials_dir)
    }
}

/// Wallet naming, password and unlock policy
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Minimum display name length in characters
    #[serde(default = "default_min_name_length")]
    pub min_name_length: usize,

    /// Substrings a display name may not contain (case-insensitive)
    #[serde(default = "default_reserved_name_tokens")]
    pub reserved_name_tokens: Vec<String>,

    /// Minimum password length in characters
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,

    /// Seconds an unlock stays valid, 0 = until locked
    #[serde(default)]
    pub unlock_ttl_secs: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            min_name_length: default_min_name_length(),
            reserved_name_tokens: default_reserved_name_tokens(),
            min_password_length: default_min_password_length(),
            unlock_ttl_secs: 0,
        }
    }
}

impl WalletConfig {
    /// Unlock lifetime, `None` when unlocks never expire
    pub fn unlock_ttl(&self) -> Option<Duration> {
        (self.unlock_ttl_secs > 0).then(|| Duration::from_secs(self.unlock_ttl_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticatorConfig {
    /// Allow passkey-protected wallets
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Relying party id credentials are bound to
    #[serde(default = "default_rp_id")]
    pub rp_id: String,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rp_id: default_rp_id(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from(".sigpass")
}

fn default_registry_file() -> String {
    "registry.json".to_string()
}

fn default_cache_dir() -> String {
    "cache".to_string()
}

fn default_credentials_dir() -> String {
    "credentials".to_string()
}

fn default_min_name_length() -> usize {
    3
}

fn default_reserved_name_tokens() -> Vec<String> {
    vec!["error".to_string()]
}

fn default_min_password_length() -> usize {
    6
}

fn default_true() -> bool {
    true
}

fn default_rp_id() -> String {
    "localhost".to_string()
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (SIGPASS__WALLET__MIN_NAME_LENGTH=4)
            .add_source(
                config::Environment::with_prefix("SIGPASS")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("wallet.reserved_name_tokens")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.wallet.min_name_length == 0 {
            anyhow::bail!("min_name_length must be at least 1");
        }

        if self.wallet.min_password_length == 0 {
            anyhow::bail!("min_password_length must be at least 1");
        }

        if self
            .wallet
            .reserved_name_tokens
            .iter()
            .any(|token| token.is_empty())
        {
            anyhow::bail!("reserved_name_tokens cannot contain an empty token");
        }

        if self.authenticator.rp_id.trim().is_empty() {
            anyhow::bail!("authenticator.rp_id cannot be empty");
        }

        for (key, value) in [
            ("registry_file", &self.storage.registry_file),
            ("cache_dir", &self.storage.cache_dir),
            ("credentials_dir", &self.storage.credentials_dir),
        ] {
            if value.is_empty() || Path::new(value).is_absolute() {
                anyhow::bail!("storage.{} must be a relative path, got {:?}", key, value);
            }
        }

        if self.wallet.min_password_length < 8 {
            tracing::warn!(
                "min_password_length is {} - short passwords are weak against offline guessing",
                self.wallet.min_password_length
            );
        }

        Ok(())
    }

    /// Get configuration for display (home directory abbreviated)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Storage:
    data_dir: {}
    registry: {}
    cache: {}
    credentials: {}
  Wallet:
    min_name_length: {}
    reserved_name_tokens: {:?}
    min_password_length: {}
    unlock_ttl: {}
  Authenticator:
    enabled: {}
    rp_id: {}
"#,
            mask_home(&self.storage.data_dir),
            self.storage.registry_file,
            self.storage.cache_dir,
            self.storage.credentials_dir,
            self.wallet.min_name_length,
            self.wallet.reserved_name_tokens,
            self.wallet.min_password_length,
            match self.wallet.unlock_ttl_secs {
                0 => "until locked".to_string(),
                secs => format!("{}s", secs),
            },
            self.authenticator.enabled,
            self.authenticator.rp_id,
        )
    }
}

/// Replace the home directory prefix with `~`
fn mask_home(path: &Path) -> String {
    match std::env::var_os("HOME").map(PathBuf::from) {
        Some(home) if !home.as_os_str().is_empty() => match path.strip_prefix(&home) {
            Ok(rest) => format!("~/{}", rest.display()),
            Err(_) => path.display().to_string(),
        },
        _ => path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.data_dir, PathBuf::from(".sigpass"));
        assert_eq!(
            config.storage.registry_path(),
            PathBuf::from(".sigpass/registry.json")
        );
        assert_eq!(config.wallet.min_name_length, 3);
        assert_eq!(config.wallet.reserved_name_tokens, vec!["error".to_string()]);
        assert_eq!(config.wallet.min_password_length, 6);
        assert_eq!(config.wallet.unlock_ttl(), None);
        assert!(config.authenticator.enabled);
        assert_eq!(config.authenticator.rp_id, "localhost");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sigpass.toml");
        std::fs::write(
            &path,
            r#"
[storage]
data_dir = "/tmp/sigpass-test"

[wallet]
min_name_length = 5
unlock_ttl_secs = 900

[authenticator]
enabled = false
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/sigpass-test"));
        assert_eq!(config.storage.registry_file, "registry.json");
        assert_eq!(config.wallet.min_name_length, 5);
        assert_eq!(config.wallet.min_password_length, 6);
        assert_eq!(config.wallet.unlock_ttl(), Some(Duration::from_secs(900)));
        assert!(!config.authenticator.enabled);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.wallet.min_name_length, 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.wallet.min_name_length = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.storage.registry_file = "/etc/registry.json".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.wallet.reserved_name_tokens.push(String::new());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.authenticator.rp_id = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_masked_display() {
        let display = Config::default().masked_display();
        assert!(display.contains("rp_id: localhost"));
        assert!(display.contains("unlock_ttl: until locked"));
    }
}
