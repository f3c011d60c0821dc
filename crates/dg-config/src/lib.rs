//! Configuration for the dg diagram pipeline.
//!
//! Parses `dg.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! The host configuration is the highest-precedence option source: anything
//! fixed here cannot be overridden by document-supplied attributes (the
//! resolver in `dg-diagrams` enforces this). The file carries:
//!
//! - `cache` / `cache-dir`: artifact cache opt-in and location. When no
//!   directory is configured and the platform cache-home variable
//!   (`XDG_CACHE_HOME`) does not resolve, caching is force-disabled.
//! - `jobs` / `timeout-secs`: worker bound and per-render wall-clock budget.
//! - `[engine.<lang>]` tables: per-language renderer settings, including
//!   arbitrary pass-through keys for the renderer itself. `engine.<lang> =
//!   false` disables a language outright.
//!
//! String values in path-like fields support `${VAR}` and `~` expansion.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "dg.toml";

/// Platform cache-home environment variable consulted for the default
/// cache directory.
pub const CACHE_HOME_VAR: &str = "XDG_CACHE_HOME";

/// Subdirectory of the cache home used when `cache-dir` is not set.
const CACHE_SUBDIR: &str = "dg";

/// Default worker bound for parallel rendering.
const DEFAULT_JOBS: usize = 4;

/// Default per-render wall-clock budget.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Pipeline configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache opt-in (default off).
    cache: Option<bool>,
    /// Cache directory override (raw string from TOML).
    #[serde(rename = "cache-dir")]
    cache_dir: Option<String>,
    /// Worker bound for parallel rendering.
    jobs: Option<usize>,
    /// Per-render timeout in seconds.
    #[serde(rename = "timeout-secs")]
    timeout_secs: Option<u64>,
    /// Per-language engine settings.
    pub engine: BTreeMap<String, EngineSetting>,

    /// Resolved cache settings (set after loading).
    #[serde(skip)]
    pub cache_resolved: CacheSettings,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let mut config = Self {
            cache: None,
            cache_dir: None,
            jobs: None,
            timeout_secs: None,
            engine: BTreeMap::new(),
            cache_resolved: CacheSettings::default(),
            config_path: None,
        };
        config.resolve_cache();
        config
    }
}

/// A per-language engine entry: either a bare toggle or a settings table.
///
/// `engine.plantuml = false` disables the language; a `[engine.plantuml]`
/// table configures it.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EngineSetting {
    Toggle(bool),
    Table(EngineTable),
}

/// Engine settings table for one language.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineTable {
    /// Allowed output formats: mime type (or short name) → enabled.
    #[serde(rename = "mime-type", alias = "mime_type")]
    pub mime_type: BTreeMap<String, bool>,
    /// Inline option marker, or `false` to disable inline parsing.
    #[serde(rename = "line-comment-start", alias = "line_comment_start")]
    pub line_comment_start: Option<CommentSetting>,
    /// Renderer executable path.
    pub execpath: Option<String>,
    /// Pluggable renderer implementation identifier.
    pub package: Option<String>,
    /// Arbitrary pass-through key/values for the renderer.
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

/// `line-comment-start` accepts a marker string or `false` (disabled).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CommentSetting {
    Toggle(bool),
    Marker(String),
}

impl CommentSetting {
    /// The effective marker, with `default` filling in for a bare `true`.
    /// `None` means inline parsing is disabled.
    #[must_use]
    pub fn marker<'a>(&'a self, default: &'a str) -> Option<&'a str> {
        match self {
            Self::Toggle(false) => None,
            Self::Toggle(true) => Some(default),
            Self::Marker(m) => Some(m.as_str()),
        }
    }
}

/// Resolved cache settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSettings {
    /// Whether the artifact cache is active for this run.
    pub enabled: bool,
    /// Cache root directory, when one could be resolved.
    pub dir: Option<PathBuf>,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path, e.g. `cache-dir`.
        field: String,
        /// Error message, e.g. `${VAR} not set`.
        message: String,
    },
}

impl Config {
    /// Load configuration from a file.
    ///
    /// If `config_path` is provided, loads from that file. Otherwise searches
    /// for `dg.toml` in the current directory and parents, falling back to
    /// defaults when none is found.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit `config_path` does not exist or if
    /// parsing or validation fails.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            return Self::load_from_file(path);
        }
        match Self::discover_config() {
            Some(discovered) => Self::load_from_file(&discovered),
            None => Ok(Self::default()),
        }
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error on parse, expansion, or validation failure.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        config.expand_env_vars()?;
        config.validate()?;
        config.resolve_cache();
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Search for the config file in the current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Whether a language is enabled at the host level.
    ///
    /// Absent languages are enabled with defaults; `engine.<lang> = false`
    /// disables one.
    #[must_use]
    pub fn engine_enabled(&self, language: &str) -> bool {
        !matches!(self.engine.get(language), Some(EngineSetting::Toggle(false)))
    }

    /// The settings table for a language, when one was configured.
    #[must_use]
    pub fn engine_table(&self, language: &str) -> Option<&EngineTable> {
        match self.engine.get(language) {
            Some(EngineSetting::Table(table)) => Some(table),
            _ => None,
        }
    }

    /// Worker bound for parallel rendering.
    #[must_use]
    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or(DEFAULT_JOBS)
    }

    /// Per-render wall-clock budget.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout_secs.map_or(DEFAULT_TIMEOUT, Duration::from_secs)
    }

    /// Expand `${VAR}` / `~` references in path-like string values.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(raw) = &self.cache_dir {
            self.cache_dir = Some(expand(raw, "cache-dir")?);
        }
        for (language, setting) in &mut self.engine {
            if let EngineSetting::Table(table) = setting
                && let Some(raw) = &table.execpath
            {
                table.execpath = Some(expand(raw, &format!("engine.{language}.execpath"))?);
            }
        }
        Ok(())
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` on out-of-range or empty values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs == Some(0) {
            return Err(ConfigError::Validation("jobs must be greater than 0".to_owned()));
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "timeout-secs must be greater than 0".to_owned(),
            ));
        }
        for (language, setting) in &self.engine {
            let EngineSetting::Table(table) = setting else {
                continue;
            };
            if table.execpath.as_deref() == Some("") {
                return Err(ConfigError::Validation(format!(
                    "engine.{language}.execpath cannot be empty"
                )));
            }
            if table.package.as_deref() == Some("") {
                return Err(ConfigError::Validation(format!(
                    "engine.{language}.package cannot be empty"
                )));
            }
        }
        Ok(())
    }

    /// Resolve the effective cache settings.
    ///
    /// Caching requires both an opt-in (`cache = true`) and a resolvable
    /// directory: the explicit `cache-dir`, or `$XDG_CACHE_HOME/dg`. With
    /// no resolvable directory the cache is force-disabled.
    fn resolve_cache(&mut self) {
        let dir = match &self.cache_dir {
            Some(raw) => Some(PathBuf::from(raw)),
            None => std::env::var_os(CACHE_HOME_VAR)
                .filter(|v| !v.is_empty())
                .map(|home| PathBuf::from(home).join(CACHE_SUBDIR)),
        };

        let requested = self.cache.unwrap_or(false);
        let enabled = match (&dir, requested) {
            (Some(_), true) => true,
            (None, true) => {
                tracing::warn!(
                    "cache requested but no cache-dir configured and {CACHE_HOME_VAR} is unset; \
                     caching disabled"
                );
                false
            }
            (_, false) => false,
        };

        self.cache_resolved = CacheSettings { enabled, dir };
    }
}

/// Expand environment variables and a leading tilde in a config string.
fn expand(raw: &str, field: &str) -> Result<String, ConfigError> {
    shellexpand::full(raw)
        .map(|expanded| expanded.into_owned())
        .map_err(|e| ConfigError::EnvVar {
            field: field.to_owned(),
            message: e.to_string(),
        })
}
