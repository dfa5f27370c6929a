//! Configuration with layered resolution using figment.
//!
//! Resolution order (highest priority last):
//! 1. User config: `~/.config/eav-migrate/config.toml` (XDG) or platform config dir
//! 2. Project config: `eav-migrate.toml`
//! 3. Environment variables: `EAV_MIGRATE_*`, sections split on `__`
//!
//! CLI flags are applied on top of the resolved values by the `migrate` command.
//!
//! # Example
//!
//! ```toml
//! [source]
//! mode = "rest"
//! base_url = "https://legacy.example.com/rest"
//! token = "integration-token"
//! store_priority = [1, 0]
//!
//! [target]
//! backend = "http"
//! base_url = "https://commerce.example.com"
//! api_key = "sk_live_..."
//! sales_channel_id = "sc_01H..."
//!
//! [media]
//! source_dir = "/srv/legacy/pub/media/catalog/product"
//! static_dir = "/srv/target/static"
//! static_base_url = "https://commerce.example.com/static"
//! ```
//!
//! The same keys can be given as environment variables, e.g.
//! `EAV_MIGRATE_TARGET__API_KEY` or `EAV_MIGRATE_SOURCE__BASE_URL`.

use std::ops::Deref;
use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::ResourceKind;

/// Boxed wrapper for figment::Error to reduce Result size on the stack.
#[derive(Debug)]
pub struct ConfigError(Box<figment::Error>);

impl Deref for ConfigError {
    type Target = figment::Error;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self(Box::new(err))
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub run: RunConfig,
}

/// How the legacy platform is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Paginated REST search endpoints.
    #[default]
    Rest,
    /// Direct queries against the entity and attribute tables.
    Relational,
}

/// Which target write path to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Probe module, then service, then HTTP; first accepted wins.
    #[default]
    Auto,
    /// Force the in-process module API.
    Module,
    /// Force the in-process legacy service API.
    Service,
    /// Force the remote HTTP admin API.
    Http,
}

/// Legacy platform connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub mode: SourceMode,
    /// REST base URL, e.g. `https://legacy.example.com/rest/default`.
    pub base_url: Option<String>,
    /// Integration bearer token for the REST API.
    pub token: Option<String>,
    /// PostgreSQL connection string for relational mode.
    pub database_url: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Store ids, most preferred first. Unlisted stores rank last.
    #[serde(default = "default_store_priority")]
    pub store_priority: Vec<i64>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Skip products that are only sold as variants of a parent.
    #[serde(default = "default_true")]
    pub skip_not_visible: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            mode: SourceMode::default(),
            base_url: None,
            token: None,
            database_url: None,
            page_size: default_page_size(),
            store_priority: default_store_priority(),
            request_timeout_secs: default_timeout_secs(),
            skip_not_visible: true,
        }
    }
}

/// Target platform settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub backend: BackendMode,
    pub base_url: Option<String>,
    /// Bearer token for the admin API.
    pub token: Option<String>,
    /// Secret API key; sent as HTTP Basic auth with an empty password.
    pub api_key: Option<String>,
    /// Sales channel every migrated product is linked to.
    pub sales_channel_id: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            backend: BackendMode::default(),
            base_url: None,
            token: None,
            api_key: None,
            sales_channel_id: None,
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Media origin and destination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Local directory holding the legacy product images.
    pub source_dir: Option<PathBuf>,
    /// Public base URL of the legacy product images.
    pub source_base_url: Option<String>,
    /// Target static asset directory that copied images land in.
    pub static_dir: Option<PathBuf>,
    /// Externally served base URL of `static_dir`.
    pub static_base_url: Option<String>,
}

/// Options for a single migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_resources")]
    pub resources: Vec<ResourceKind>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_currency")]
    pub currency_code: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub verbose: bool,
    /// JSON file the id mappings are loaded from and saved to.
    pub state_file: Option<PathBuf>,
    /// Attributes concatenated into variant titles, in preference order.
    #[serde(default = "default_display_attributes")]
    pub display_attributes: Vec<String>,
    #[serde(default = "default_max_retries")]
    pub max_rate_limit_retries: u32,
    #[serde(default = "default_rate_limit_step_ms")]
    pub rate_limit_step_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            resources: default_resources(),
            concurrency: default_concurrency(),
            currency_code: default_currency(),
            dry_run: false,
            verbose: false,
            state_file: None,
            display_attributes: default_display_attributes(),
            max_rate_limit_retries: default_max_retries(),
            rate_limit_step_ms: default_rate_limit_step_ms(),
        }
    }
}

fn default_page_size() -> u32 {
    100
}

fn default_store_priority() -> Vec<i64> {
    vec![0]
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_resources() -> Vec<ResourceKind> {
    ResourceKind::ALL.to_vec()
}

fn default_concurrency() -> usize {
    4
}

fn default_currency() -> String {
    "usd".to_string()
}

/// Display attribute preference order used when no override is configured.
pub fn default_display_attributes() -> Vec<String> {
    ["size", "color", "colour", "material", "style"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_retries() -> u32 {
    5
}

fn default_rate_limit_step_ms() -> u64 {
    1000
}

impl Config {
    /// Load config with layered resolution (user → project → env).
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment().extract().map_err(ConfigError::from)
    }

    /// The layered provider stack, exposed so tests can extend it.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            // Layer 1: User config (lowest priority)
            .merge(Toml::file(Self::user_config_path()))
            // Layer 2: Project config
            .merge(Toml::file("eav-migrate.toml"))
            // Layer 3: Environment variables (highest priority)
            .merge(Env::prefixed("EAV_MIGRATE_").split("__"))
    }

    /// User config path: ~/.config/eav-migrate/config.toml (XDG) or platform config dir.
    fn user_config_path() -> PathBuf {
        if let Some(home) = dirs::home_dir() {
            let xdg_path = home.join(".config").join("eav-migrate").join("config.toml");
            if xdg_path.exists() {
                return xdg_path;
            }
        }
        dirs::config_dir()
            .map(|p| p.join("eav-migrate").join("config.toml"))
            .unwrap_or_default()
    }

    /// Checks the source credentials for the configured mode.
    ///
    /// Called before any network or database I/O so a misconfigured run
    /// fails without touching either system.
    pub fn validate_source(&self) -> Result<(), AppError> {
        match self.source.mode {
            SourceMode::Rest => {
                if is_blank(&self.source.base_url) {
                    return Err(AppError::MissingCredentials(
                        "source.base_url is required in rest mode".into(),
                    ));
                }
                if is_blank(&self.source.token) {
                    return Err(AppError::MissingCredentials(
                        "source.token is required in rest mode".into(),
                    ));
                }
            }
            SourceMode::Relational => {
                if is_blank(&self.source.database_url) {
                    return Err(AppError::MissingCredentials(
                        "source.database_url is required in relational mode".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Checks the HTTP admin API credentials.
    pub fn validate_http_target(&self) -> Result<(), AppError> {
        if is_blank(&self.target.base_url) {
            return Err(AppError::MissingCredentials(
                "target.base_url is required for the http backend".into(),
            ));
        }
        if is_blank(&self.target.token) && is_blank(&self.target.api_key) {
            return Err(AppError::MissingCredentials(
                "target.token or target.api_key is required for the http backend".into(),
            ));
        }
        Ok(())
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}
