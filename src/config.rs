use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dbsc: DbscConfig,
    #[serde(default)]
    pub cookie: CookieConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

/// Which key-value backend holds challenges, cookie bindings and credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
}

/// One entry of the registration `scope_specification` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRule {
    #[serde(rename = "type")]
    pub rule_type: String,
    pub domain: String,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbscConfig {
    /// Path advertised in `Sec-Session-Registration`, relative to the start endpoint.
    #[serde(default = "default_registration_path")]
    pub registration_path: String,
    #[serde(default = "default_refresh_url")]
    pub refresh_url: String,
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_include_site")]
    pub include_site: bool,
    #[serde(default)]
    pub scope_specification: Vec<ScopeRule>,
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<String>,
    #[serde(default = "default_challenge_ttl")]
    pub challenge_ttl_minutes: u64,
    #[serde(default = "default_cookie_binding_ttl")]
    pub cookie_binding_ttl_secs: u64,
    #[serde(default = "default_credential_ttl")]
    pub credential_ttl_days: u64,
}

/// Attributes of the short-lived bound cookie.
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    #[serde(default = "default_cookie_name")]
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default = "default_same_site")]
    pub same_site: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default = "default_cookie_max_age")]
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_fallback_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_fallback_max_age")]
    pub max_age_days: u64,
}

/// Optional account created at start-up when it does not exist yet.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

// Upper bounds accepted by `validate`
const MAX_CHALLENGE_TTL_MINUTES: u64 = 24 * 60;
const MAX_COOKIE_BINDING_TTL_SECS: u64 = 24 * 60 * 60;
const MAX_TTL_DAYS: u64 = 10 * 365;

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "data/dbsc.db".to_string()
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Sqlite
}

fn default_registration_path() -> String {
    "register-dbsc-cookie".to_string()
}

fn default_refresh_url() -> String {
    "/api/refresh-dbsc-cookie".to_string()
}

fn default_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_include_site() -> bool {
    true
}

fn default_algorithms() -> Vec<String> {
    vec!["ES256".to_string(), "RS256".to_string()]
}

fn default_challenge_ttl() -> u64 {
    5 // 5 minutes
}

fn default_cookie_binding_ttl() -> u64 {
    15 // 15 seconds
}

fn default_credential_ttl() -> u64 {
    30 // 30 days
}

fn default_cookie_name() -> String {
    "auth_cookie".to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_same_site() -> String {
    "Lax".to_string()
}

fn default_cookie_max_age() -> u64 {
    10 // 10 seconds
}

fn default_fallback_cookie_name() -> String {
    "dbsc_fallback".to_string()
}

fn default_fallback_max_age() -> u64 {
    30 // 30 days
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
        }
    }
}

impl Default for DbscConfig {
    fn default() -> Self {
        Self {
            registration_path: default_registration_path(),
            refresh_url: default_refresh_url(),
            origin: default_origin(),
            include_site: default_include_site(),
            scope_specification: Vec::new(),
            algorithms: default_algorithms(),
            challenge_ttl_minutes: default_challenge_ttl(),
            cookie_binding_ttl_secs: default_cookie_binding_ttl(),
            credential_ttl_days: default_credential_ttl(),
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            domain: None,
            path: default_cookie_path(),
            same_site: default_same_site(),
            secure: false,
            http_only: false,
            max_age_secs: default_cookie_max_age(),
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_fallback_cookie_name(),
            max_age_days: default_fallback_max_age(),
        }
    }
}

impl DbscConfig {
    pub fn challenge_ttl(&self) -> Duration {
        Duration::minutes(self.challenge_ttl_minutes.min(MAX_CHALLENGE_TTL_MINUTES) as i64)
    }

    pub fn cookie_binding_ttl(&self) -> Duration {
        Duration::seconds(self.cookie_binding_ttl_secs.min(MAX_COOKIE_BINDING_TTL_SECS) as i64)
    }

    /// Lifetime of a session's key binding and credential link
    pub fn credential_ttl(&self) -> Duration {
        Duration::days(self.credential_ttl_days.min(MAX_TTL_DAYS) as i64)
    }
}

impl FallbackConfig {
    pub fn max_age(&self) -> Duration {
        Duration::days(self.max_age_days.min(MAX_TTL_DAYS) as i64)
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.validate()?;
        config.ensure_directories()?;
        tracing::info!(
            "DBSC config: origin={}, refresh_url={}, cookie={} ({}s), store={:?}",
            config.dbsc.origin,
            config.dbsc.refresh_url,
            config.cookie.name,
            config.cookie.max_age_secs,
            config.store.backend
        );
        Ok(config)
    }

    /// Load configuration from dbsc.toml or config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["dbsc.toml", "config.toml", "data/dbsc.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: DBSC_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("DBSC_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = env::var("DBSC_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }

        if let Ok(val) = env::var("DBSC_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        if let Ok(val) = env::var("DBSC_CONF_STORE_BACKEND") {
            match val.trim().to_lowercase().as_str() {
                "memory" => self.store.backend = StoreBackend::Memory,
                "sqlite" => self.store.backend = StoreBackend::Sqlite,
                other => tracing::warn!("Ignoring unknown store backend override: {}", other),
            }
        }

        if let Ok(val) = env::var("DBSC_CONF_DBSC_ORIGIN") {
            if !val.trim().is_empty() {
                self.dbsc.origin = val;
            }
        }
        if let Ok(val) = env::var("DBSC_CONF_DBSC_REFRESH_URL") {
            if !val.trim().is_empty() {
                self.dbsc.refresh_url = val;
            }
        }
        if let Ok(val) = env::var("DBSC_CONF_DBSC_REGISTRATION_PATH") {
            if !val.trim().is_empty() {
                self.dbsc.registration_path = val;
            }
        }
        if let Ok(val) = env::var("DBSC_CONF_DBSC_CHALLENGE_TTL") {
            if let Ok(minutes) = val.parse() {
                self.dbsc.challenge_ttl_minutes = minutes;
            }
        }
        if let Ok(val) = env::var("DBSC_CONF_DBSC_COOKIE_BINDING_TTL") {
            if let Ok(secs) = val.parse() {
                self.dbsc.cookie_binding_ttl_secs = secs;
            }
        }
        if let Ok(val) = env::var("DBSC_CONF_DBSC_CREDENTIAL_TTL") {
            if let Ok(days) = val.parse() {
                self.dbsc.credential_ttl_days = days;
            }
        }

        if let Ok(val) = env::var("DBSC_CONF_COOKIE_NAME") {
            if !val.trim().is_empty() {
                self.cookie.name = val;
            }
        }
        if let Ok(val) = env::var("DBSC_CONF_COOKIE_DOMAIN") {
            self.cookie.domain = if val.trim().is_empty() { None } else { Some(val) };
        }
        if let Ok(val) = env::var("DBSC_CONF_COOKIE_SECURE") {
            if let Ok(v) = val.parse() {
                self.cookie.secure = v;
            }
        }
        if let Ok(val) = env::var("DBSC_CONF_COOKIE_MAX_AGE") {
            if let Ok(secs) = val.parse() {
                self.cookie.max_age_secs = secs;
            }
        }

        if let Ok(val) = env::var("DBSC_CONF_BOOTSTRAP_USERNAME") {
            self.bootstrap.username = Some(val);
        }
        if let Ok(val) = env::var("DBSC_CONF_BOOTSTRAP_PASSWORD") {
            self.bootstrap.password = Some(val);
        }
    }

    /// Reject settings that would break the browser's refresh loop.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(
            self.cookie.same_site.to_ascii_lowercase().as_str(),
            "lax" | "strict" | "none"
        ) {
            anyhow::bail!("cookie.same_site must be Lax, Strict or None");
        }
        if self.cookie.same_site.eq_ignore_ascii_case("none") && !self.cookie.secure {
            anyhow::bail!("cookie.same_site = None requires cookie.secure = true");
        }
        // The server-side binding must outlive the cookie or a still-valid cookie stops resolving.
        if self.dbsc.cookie_binding_ttl_secs < self.cookie.max_age_secs {
            anyhow::bail!(
                "dbsc.cookie_binding_ttl_secs ({}) must be >= cookie.max_age_secs ({})",
                self.dbsc.cookie_binding_ttl_secs,
                self.cookie.max_age_secs
            );
        }
        check_range(
            "dbsc.challenge_ttl_minutes",
            self.dbsc.challenge_ttl_minutes,
            MAX_CHALLENGE_TTL_MINUTES,
        )?;
        check_range(
            "dbsc.cookie_binding_ttl_secs",
            self.dbsc.cookie_binding_ttl_secs,
            MAX_COOKIE_BINDING_TTL_SECS,
        )?;
        check_range("dbsc.credential_ttl_days", self.dbsc.credential_ttl_days, MAX_TTL_DAYS)?;
        check_range("fallback.max_age_days", self.fallback.max_age_days, MAX_TTL_DAYS)?;
        if self.cookie.max_age_secs == 0 {
            anyhow::bail!("cookie.max_age_secs must be > 0");
        }
        if self.dbsc.algorithms.is_empty() {
            anyhow::bail!("dbsc.algorithms must not be empty");
        }
        if self.cookie.name == self.fallback.cookie_name {
            anyhow::bail!("cookie.name and fallback.cookie_name must differ");
        }
        Ok(())
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

fn check_range(name: &str, value: u64, max: u64) -> anyhow::Result<()> {
    if value == 0 || value > max {
        anyhow::bail!("{} must be between 1 and {} (got {})", name, max, value);
    }
    Ok(())
}
