use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
#[cfg(unix)]
use tokio::fs::File;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

const CONFIG_FILE_NAME: &str = "config.toml";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level roombridge configuration, loaded from `config.toml`.
///
/// Resolution order: `ROOMBRIDGE_CONFIG_DIR` env → `~/.roombridge/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding config.toml - computed, not serialized
    #[serde(skip)]
    pub config_dir: PathBuf,
    /// Path to config.toml - computed, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Remote agent runtime endpoint and credentials (`[runtime]`).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Conversation mapping store (`[store]`).
    #[serde(default)]
    pub store: StoreConfig,

    /// Busy-conversation retry policy (`[retry]`).
    #[serde(default)]
    pub retry: RetryConfig,

    /// Idle mapping cleanup (`[cleanup]`).
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

// ── Runtime ──────────────────────────────────────────────────────

/// Remote agent runtime configuration (`[runtime]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Client implementation. Only `"http"` is supported.
    #[serde(default = "default_runtime_kind")]
    pub kind: String,
    /// Base URL of the runtime API, e.g. `https://agents.example.com`.
    #[serde(default)]
    pub base_url: String,
    /// Bearer token. Overridden by `ROOMBRIDGE_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-call deadline for remote calls, in seconds. Default: `30`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Memory block labels isolated per conversation when one is created.
    #[serde(default)]
    pub isolation_labels: Vec<String>,
    /// Ask the runtime to stream replies as server-sent events.
    #[serde(default)]
    pub streaming: bool,
}

fn default_runtime_kind() -> String {
    "http".into()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kind: default_runtime_kind(),
            base_url: String::new(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            isolation_labels: Vec::new(),
            streaming: false,
        }
    }
}

// ── Store ────────────────────────────────────────────────────────

/// Conversation mapping store configuration (`[store]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `"sqlite"` (default) or `"memory"`.
    #[serde(default = "default_store_backend")]
    pub backend: String,
    /// SQLite database path. Relative paths resolve against the config directory.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// How long a writer waits on a locked database, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("conversations.db")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

// ── Retry ────────────────────────────────────────────────────────

/// Retry policy for sends into a busy conversation (`[retry]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    8_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

// ── Cleanup ──────────────────────────────────────────────────────

/// Idle mapping cleanup (`[cleanup]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Mappings idle for longer than this many days are deleted.
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: u32,
    /// Seconds between passes when the sweeper runs as a loop.
    #[serde(default = "default_cleanup_interval_secs")]
    pub interval_secs: u64,
}

fn default_stale_after_days() -> u32 {
    30
}

fn default_cleanup_interval_secs() -> u64 {
    3_600
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            stale_after_days: default_stale_after_days(),
            interval_secs: default_cleanup_interval_secs(),
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let config_dir = default_config_dir().unwrap_or_else(|_| PathBuf::from(".roombridge"));

        Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
            runtime: RuntimeConfig::default(),
            store: StoreConfig::default(),
            retry: RetryConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ConfigResolutionSource {
    EnvConfigDir,
    DefaultConfigDir,
}

impl ConfigResolutionSource {
    const fn as_str(self) -> &'static str {
        match self {
            Self::EnvConfigDir => "ROOMBRIDGE_CONFIG_DIR",
            Self::DefaultConfigDir => "default",
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".roombridge"))
}

fn resolve_config_dir() -> Result<(PathBuf, ConfigResolutionSource)> {
    if let Ok(custom_config_dir) = std::env::var("ROOMBRIDGE_CONFIG_DIR") {
        let custom_config_dir = custom_config_dir.trim();
        if !custom_config_dir.is_empty() {
            return Ok((
                PathBuf::from(custom_config_dir),
                ConfigResolutionSource::EnvConfigDir,
            ));
        }
    }

    Ok((default_config_dir()?, ConfigResolutionSource::DefaultConfigDir))
}

impl Config {
    /// Resolve the config directory, load (or create) `config.toml`, apply env
    /// overrides and validate.
    pub async fn load_or_init() -> Result<Self> {
        let (config_dir, resolution_source) = resolve_config_dir()?;

        let (mut config, initialized) = Self::load_or_init_in(&config_dir).await?;
        config.apply_env_overrides();
        config.resolve_paths();
        config.validate()?;

        tracing::info!(
            path = %config.config_path.display(),
            store = %config.store.path.display(),
            source = resolution_source.as_str(),
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    /// Read `config.toml` from `config_dir`, writing defaults first if it does
    /// not exist. Returns the config and whether it was freshly created.
    pub async fn load_or_init_in(config_dir: &Path) -> Result<(Self, bool)> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        fs::create_dir_all(config_dir).await.with_context(|| {
            format!("Failed to create config directory: {}", config_dir.display())
        })?;

        if config_path.exists() {
            // Warn if config file is world-readable (may contain API keys)
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = fs::metadata(&config_path).await {
                    if meta.permissions().mode() & 0o004 != 0 {
                        tracing::warn!(
                            "Config file {:?} is world-readable (mode {:o}). \
                             Consider restricting with: chmod 600 {:?}",
                            config_path,
                            meta.permissions().mode() & 0o777,
                            config_path,
                        );
                    }
                }
            }

            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_dir = config_dir.to_path_buf();
            config.config_path = config_path;
            Ok((config, false))
        } else {
            let mut config = Config::default();
            config.config_dir = config_dir.to_path_buf();
            config.config_path = config_path.clone();
            config.save().await?;

            // Restrict permissions on newly created config file (may contain API keys)
            #[cfg(unix)]
            {
                use std::{fs::Permissions, os::unix::fs::PermissionsExt};
                let _ = fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
            }

            Ok((config, true))
        }
    }

    /// Anchor a relative store path at the config directory.
    pub fn resolve_paths(&mut self) {
        if self.store.path.is_relative() {
            self.store.path = self.config_dir.join(&self.store.path);
        }
    }

    /// Validate configuration values that would cause runtime failures.
    ///
    /// Runtime credentials are checked when the runtime client is built, so
    /// store-only commands work without them.
    pub fn validate(&self) -> Result<()> {
        if self.runtime.kind.trim().is_empty() {
            anyhow::bail!("runtime.kind must not be empty");
        }
        if self.runtime.request_timeout_secs == 0 {
            anyhow::bail!("runtime.request_timeout_secs must be greater than 0");
        }
        for (i, label) in self.runtime.isolation_labels.iter().enumerate() {
            if label.trim().is_empty() {
                anyhow::bail!("runtime.isolation_labels[{i}] must not be empty");
            }
        }

        if !matches!(self.store.backend.as_str(), "sqlite" | "memory") {
            anyhow::bail!(
                "store.backend '{}' is not supported. Supported values: sqlite, memory",
                self.store.backend
            );
        }
        if self.store.backend == "sqlite" && self.store.path.as_os_str().is_empty() {
            anyhow::bail!("store.path must not be empty for the sqlite backend");
        }

        if self.retry.base_delay_ms == 0 {
            anyhow::bail!("retry.base_delay_ms must be greater than 0");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            anyhow::bail!(
                "retry.base_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
                self.retry.base_delay_ms,
                self.retry.max_delay_ms
            );
        }

        if self.cleanup.stale_after_days == 0 {
            anyhow::bail!("cleanup.stale_after_days must be greater than 0");
        }
        if self.cleanup.interval_secs == 0 {
            anyhow::bail!("cleanup.interval_secs must be greater than 0");
        }

        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(key) = non_empty("ROOMBRIDGE_API_KEY") {
            self.runtime.api_key = Some(key.trim().to_string());
        }

        if let Some(url) = non_empty("ROOMBRIDGE_BASE_URL") {
            self.runtime.base_url = url.trim().to_string();
        }

        if let Some(path) = non_empty("ROOMBRIDGE_DB_PATH") {
            self.store.path = PathBuf::from(path.trim());
        }

        if let Some(raw) = non_empty("ROOMBRIDGE_STALE_DAYS") {
            match raw.trim().parse::<u32>() {
                Ok(days) => self.cleanup.stale_after_days = days,
                Err(_) => tracing::warn!(
                    value = %raw,
                    "Ignoring ROOMBRIDGE_STALE_DAYS: expected a whole number of days"
                ),
            }
        }
    }

    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;

        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or(CONFIG_FILE_NAME);
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir).await?;
        Ok(())
    }
}

async fn sync_directory(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = File::open(path)
            .await
            .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
        dir.sync_all()
            .await
            .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}
