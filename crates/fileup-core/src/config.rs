use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use dirs::config_dir;
use serde::{Deserialize, Serialize};

use crate::request::WarningSpec;

const CONFIG_DIR_NAME: &str = "fileup";
const CONFIG_FILE_NAME: &str = "config.toml";
const CURRENT_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_USER_AGENT: &str = concat!("fileup/", env!("CARGO_PKG_VERSION"));

/// Result returned by [`load_config`], capturing the source and any non-fatal issues.
#[derive(Debug, Clone)]
pub struct ConfigLoadResult {
    pub config: FileConfig,
    pub warnings: Vec<String>,
    pub source: ConfigSource,
}

/// Indicates where the configuration was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// No persisted configuration was found or usable; defaults were synthesized.
    Default,
    /// Configuration was read from `config.toml`.
    File,
}

/// Errors that can occur when persisting configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML serialization error: {0}")]
    Ser(#[from] toml::ser::Error),
}

/// Disk-backed configuration schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "FileConfig::schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub upload: UploadPreferences,
    #[serde(default)]
    pub fetch: FetchPreferences,
    #[serde(default)]
    pub repository: RepositoryPreferences,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            upload: UploadPreferences::default(),
            fetch: FetchPreferences::default(),
            repository: RepositoryPreferences::default(),
        }
    }
}

impl FileConfig {
    const fn schema_version() -> u32 {
        CURRENT_SCHEMA_VERSION
    }
}

/// Defaults for upload requests; CLI flags override each field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadPreferences {
    /// Zero uploads each file in one piece.
    #[serde(default)]
    pub chunk_size: u64,
    #[serde(default)]
    pub ignore_warnings: WarningSpec,
    #[serde(default)]
    pub abort_on: WarningSpec,
    #[serde(default)]
    pub keep_filename: bool,
    #[serde(default = "UploadPreferences::default_verify_description")]
    pub verify_description: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

impl Default for UploadPreferences {
    fn default() -> Self {
        Self {
            chunk_size: 0,
            ignore_warnings: WarningSpec::default(),
            abort_on: WarningSpec::default(),
            keep_filename: false,
            verify_description: Self::default_verify_description(),
            comment: None,
        }
    }
}

impl UploadPreferences {
    const fn default_verify_description() -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchPreferences {
    #[serde(default = "FetchPreferences::default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Unset retries short reads until the download completes.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for FetchPreferences {
    fn default() -> Self {
        Self {
            user_agent: Self::default_user_agent(),
            timeout_secs: None,
            max_attempts: None,
        }
    }
}

impl FetchPreferences {
    fn default_user_agent() -> String {
        DEFAULT_USER_AGENT.to_string()
    }
}

/// Settings for the directory-backed repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryPreferences {
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub shared: Option<String>,
    #[serde(default)]
    pub allowed_extensions: Option<Vec<String>>,
    #[serde(default = "RepositoryPreferences::default_user")]
    pub user: String,
    #[serde(default = "RepositoryPreferences::default_rights")]
    pub rights: Vec<String>,
    #[serde(default)]
    pub uploads_disabled: bool,
}

impl Default for RepositoryPreferences {
    fn default() -> Self {
        Self {
            root: None,
            shared: None,
            allowed_extensions: None,
            user: Self::default_user(),
            rights: Self::default_rights(),
            uploads_disabled: false,
        }
    }
}

impl RepositoryPreferences {
    fn default_user() -> String {
        std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "uploader".to_string())
    }

    fn default_rights() -> Vec<String> {
        vec![crate::repository::UPLOAD_RIGHT.to_string()]
    }

    /// Root directory with `~` expanded; defaults to `<data dir>/fileup/repository`.
    pub fn resolved_root(&self) -> PathBuf {
        match self.root.as_deref().map(str::trim).filter(|root| !root.is_empty()) {
            Some(root) => PathBuf::from(shellexpand::tilde(root).to_string()),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(CONFIG_DIR_NAME)
                .join("repository"),
        }
    }

    pub fn resolved_shared(&self) -> Option<PathBuf> {
        self.shared
            .as_deref()
            .map(str::trim)
            .filter(|shared| !shared.is_empty())
            .map(|shared| PathBuf::from(shellexpand::tilde(shared).to_string()))
    }
}

/// Path to the configuration directory.
pub fn config_directory() -> PathBuf {
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Path to `config.toml`.
pub fn config_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}

/// Load the configuration, falling back to defaults when it is missing or unreadable.
pub fn load_config() -> ConfigLoadResult {
    let path = config_path();
    if !path.exists() {
        return ConfigLoadResult {
            config: FileConfig::default(),
            warnings: Vec::new(),
            source: ConfigSource::Default,
        };
    }

    match fs::read_to_string(&path) {
        Ok(raw) => parse_config(&raw),
        Err(err) => ConfigLoadResult {
            config: FileConfig::default(),
            warnings: vec![format!(
                "Failed to read {}: {}. Falling back to defaults.",
                CONFIG_FILE_NAME, err
            )],
            source: ConfigSource::Default,
        },
    }
}

/// Parse and sanitize raw TOML.
pub fn parse_config(raw: &str) -> ConfigLoadResult {
    match toml::from_str::<FileConfig>(raw) {
        Ok(config) => {
            let (config, warnings) = sanitize_config(config);
            ConfigLoadResult {
                config,
                warnings,
                source: ConfigSource::File,
            }
        }
        Err(err) => ConfigLoadResult {
            config: FileConfig::default(),
            warnings: vec![format!(
                "Failed to parse {} as TOML: {}. Falling back to defaults.",
                CONFIG_FILE_NAME, err
            )],
            source: ConfigSource::Default,
        },
    }
}

/// Persist the configuration to disk.
pub fn save_config(config: &FileConfig) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let serialized = toml::to_string_pretty(config)?;
    fs::write(path, serialized)?;
    Ok(())
}

fn sanitize_config(mut config: FileConfig) -> (FileConfig, Vec<String>) {
    let mut warnings = Vec::new();

    if config.schema_version != CURRENT_SCHEMA_VERSION {
        warnings.push(format!(
            "Unknown config schema_version {}; expected {}. Values were loaded as-is.",
            config.schema_version, CURRENT_SCHEMA_VERSION
        ));
        config.schema_version = CURRENT_SCHEMA_VERSION;
    }

    if let Some(extensions) = config.repository.allowed_extensions.take() {
        let mut seen = BTreeSet::new();
        let mut cleaned = Vec::new();
        for raw in extensions {
            let normalized = raw.trim().trim_start_matches('.').to_ascii_lowercase();
            if normalized.is_empty() {
                warnings.push("Ignoring empty entry in repository.allowed_extensions.".to_string());
                continue;
            }
            if seen.insert(normalized.clone()) {
                cleaned.push(normalized);
            }
        }
        config.repository.allowed_extensions = Some(cleaned);
    }

    if config.fetch.max_attempts == Some(0) {
        warnings.push("fetch.max_attempts = 0 is not usable; retrying without a limit.".to_string());
        config.fetch.max_attempts = None;
    }

    if config.fetch.user_agent.trim().is_empty() {
        warnings.push("fetch.user_agent is empty; using the default.".to_string());
        config.fetch.user_agent = DEFAULT_USER_AGENT.to_string();
    }

    if let (WarningSpec::Codes(ignored), WarningSpec::Codes(aborted)) =
        (&config.upload.ignore_warnings, &config.upload.abort_on)
    {
        for code in ignored.iter().filter(|code| aborted.contains(*code)) {
            warnings.push(format!(
                "Warning code '{code}' is both ignored and aborted on; abort takes precedence."
            ));
        }
    }

    (config, warnings)
}
