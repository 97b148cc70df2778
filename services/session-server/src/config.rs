//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `ALLOWED_ORIGINS` (comma-separated) replaces `[csrf] allowed_origins`
//! so deployments can widen the allow-list without editing the file.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub cookies: CookieConfig,
    pub csrf: CsrfConfig,
    #[serde(default)]
    pub legal: LegalConfig,
}

/// Listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Credential lifetimes
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,
    /// How often expired grants are swept from memory
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct CookieConfig {
    /// Only disable for plain-HTTP local development.
    #[serde(default = "default_secure")]
    pub secure: bool,
}

/// Anti-forgery settings
#[derive(Debug, Deserialize)]
pub struct CsrfConfig {
    /// Exact `scheme://host[:port]` values accepted in `Origin`/`Referer`.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_csrf_ttl")]
    pub token_ttl_secs: u64,
}

/// Current versions of the legal documents users must have accepted.
#[derive(Debug, Deserialize)]
pub struct LegalConfig {
    #[serde(default = "default_document_version")]
    pub terms_version: String,
    #[serde(default = "default_document_version")]
    pub privacy_policy_version: String,
}

fn default_max_connections() -> usize {
    1000
}

fn default_access_ttl() -> u64 {
    900
}

fn default_refresh_ttl() -> u64 {
    14 * 24 * 60 * 60
}

fn default_purge_interval() -> u64 {
    300
}

fn default_secure() -> bool {
    true
}

fn default_csrf_ttl() -> u64 {
    24 * 60 * 60
}

fn default_document_version() -> String {
    "1".into()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_ttl_secs: default_access_ttl(),
            refresh_ttl_secs: default_refresh_ttl(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            secure: default_secure(),
        }
    }
}

impl Default for LegalConfig {
    fn default() -> Self {
        Self {
            terms_version: default_document_version(),
            privacy_policy_version: default_document_version(),
        }
    }
}

impl SessionConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file, overlay environment variables,
    /// then validate.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
            config.csrf.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }
        for origin in &mut config.csrf.allowed_origins {
            let trimmed = origin.trim_end_matches('/').len();
            origin.truncate(trimmed);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.csrf.allowed_origins.is_empty() {
            return Err(common::Error::Config(
                "csrf.allowed_origins must list at least one origin".into(),
            ));
        }
        if let Some(bad) = self
            .csrf
            .allowed_origins
            .iter()
            .find(|o| !o.starts_with("http://") && !o.starts_with("https://"))
        {
            return Err(common::Error::Config(format!(
                "allowed origin must start with http:// or https://, got: {bad}"
            )));
        }

        if self.session.access_ttl_secs == 0
            || self.session.refresh_ttl_secs == 0
            || self.session.purge_interval_secs == 0
            || self.csrf.token_ttl_secs == 0
        {
            return Err(common::Error::Config(
                "TTLs and purge_interval_secs must be greater than 0".into(),
            ));
        }
        if self.session.refresh_ttl_secs <= self.session.access_ttl_secs {
            return Err(common::Error::Config(format!(
                "refresh_ttl_secs ({}) must be longer than access_ttl_secs ({})",
                self.session.refresh_ttl_secs, self.session.access_ttl_secs
            )));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("session-server.toml")
    }
}
