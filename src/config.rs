use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::quota::QuotaConfig;
use crate::retry::RetryPolicy;
use crate::search::SearchLimits;

/// Environment variable naming a TOML config file to load instead of the environment.
pub const CONFIG_PATH_VAR: &str = "SEARCHMAIL_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gmail: GmailConfig,
    #[serde(default)]
    pub quota: QuotaSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub search: SearchLimits,
    /// Principal registered at startup, for single-mailbox deployments.
    #[serde(default)]
    pub bootstrap: Option<BootstrapPrincipal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub search_mailbox: String,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            imap_host: "imap.gmail.com".to_string(),
            imap_port: 993,
            search_mailbox: "[Gmail]/All Mail".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuotaSettings {
    pub window_ms: u64,
    pub burst_limit: usize,
    pub rejection_log_size: usize,
    pub sweep_interval_secs: u64,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            window_ms: 1000,
            burst_limit: 250,
            rejection_log_size: 128,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    /// Approximate ceiling for the whole process. Entries are spread over
    /// LRU shards by (principal, query), so one principal may use all of it.
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 120,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub max_retries: u32,
    pub attempt_timeout_ms: u64,
    pub deadline_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_retries: 3,
            attempt_timeout_ms: 3000,
            deadline_ms: 10_000,
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct BootstrapPrincipal {
    pub email: String,
    pub app_password: String,
}

impl std::fmt::Debug for BootstrapPrincipal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapPrincipal")
            .field("email", &self.email)
            .field("app_password", &"<redacted>")
            .finish()
    }
}

impl AppConfig {
    /// Load from the TOML file named by `SEARCHMAIL_CONFIG`, or from the
    /// environment (and `.env`) when it is unset.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Build from a variable lookup; unset variables take their defaults.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bootstrap = match (
            var("BOOTSTRAP_PRINCIPAL_EMAIL"),
            var("BOOTSTRAP_PRINCIPAL_PASSWORD"),
        ) {
            (Some(email), Some(app_password)) => Some(BootstrapPrincipal { email, app_password }),
            (Some(_), None) => bail!("BOOTSTRAP_PRINCIPAL_EMAIL is set but BOOTSTRAP_PRINCIPAL_PASSWORD is not"),
            _ => None,
        };

        Ok(Self {
            server: ServerConfig {
                host: var("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_var(&var, "SERVER_PORT", 3000)?,
            },
            database: DatabaseConfig {
                url: var("DATABASE_URL").context("DATABASE_URL must be set")?,
            },
            gmail: GmailConfig {
                imap_host: var("GMAIL_IMAP_HOST").unwrap_or_else(|| "imap.gmail.com".to_string()),
                imap_port: parse_var(&var, "GMAIL_IMAP_PORT", 993)?,
                search_mailbox: var("GMAIL_SEARCH_MAILBOX")
                    .unwrap_or_else(|| "[Gmail]/All Mail".to_string()),
            },
            quota: QuotaSettings {
                window_ms: parse_var(&var, "QUOTA_WINDOW_MS", 1000)?,
                burst_limit: parse_var(&var, "QUOTA_BURST_LIMIT", 250)?,
                rejection_log_size: parse_var(&var, "QUOTA_REJECTION_LOG_SIZE", 128)?,
                sweep_interval_secs: parse_var(&var, "QUOTA_SWEEP_INTERVAL_SECS", 60)?,
            },
            cache: CacheSettings {
                ttl_secs: parse_var(&var, "CACHE_TTL_SECS", 120)?,
                max_entries: parse_var(&var, "CACHE_MAX_ENTRIES", 10_000)?,
            },
            retry: RetrySettings {
                base_delay_ms: parse_var(&var, "RETRY_BASE_DELAY_MS", 1000)?,
                max_retries: parse_var(&var, "RETRY_MAX_RETRIES", 3)?,
                attempt_timeout_ms: parse_var(&var, "RETRY_ATTEMPT_TIMEOUT_MS", 3000)?,
                deadline_ms: parse_var(&var, "SEARCH_DEADLINE_MS", 10_000)?,
            },
            search: SearchLimits {
                max_results: parse_var(&var, "SEARCH_MAX_RESULTS", 500)?,
                default_results: parse_var(&var, "SEARCH_DEFAULT_RESULTS", 50)?,
                max_span_days: parse_var(&var, "SEARCH_MAX_SPAN_DAYS", 366)?,
            },
            bootstrap,
        })
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.quota.window_ms == 0 || self.quota.burst_limit == 0 {
            bail!("quota window and burst limit must be positive");
        }
        if self.quota.sweep_interval_secs == 0 {
            bail!("quota sweep interval must be positive");
        }
        if self.cache.ttl_secs == 0 || self.cache.max_entries == 0 {
            bail!("cache TTL and entry ceiling must be positive");
        }
        if self.retry.attempt_timeout_ms == 0 {
            bail!("retry attempt timeout must be positive");
        }
        if self.retry.attempt_timeout_ms >= self.retry.deadline_ms {
            bail!(
                "retry attempt timeout ({} ms) must be shorter than the search deadline ({} ms)",
                self.retry.attempt_timeout_ms,
                self.retry.deadline_ms
            );
        }
        if self.search.max_results == 0
            || self.search.default_results == 0
            || self.search.default_results > self.search.max_results
        {
            bail!("search default_results must be within 1..=max_results");
        }
        if self.search.max_span_days <= 0 {
            bail!("search max_span_days must be positive");
        }
        Ok(())
    }

    pub fn quota_config(&self) -> QuotaConfig {
        QuotaConfig {
            window: Duration::from_millis(self.quota.window_ms),
            burst_limit: self.quota.burst_limit,
            rejection_log_size: self.quota.rejection_log_size,
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(self.cache.ttl_secs),
            max_entries: self.cache.max_entries,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_retries: self.retry.max_retries,
            attempt_timeout: Duration::from_millis(self.retry.attempt_timeout_ms),
        }
    }

    pub fn search_deadline(&self) -> Duration {
        Duration::from_millis(self.retry.deadline_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.quota.sweep_interval_secs)
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", name, value)),
        None => Ok(default),
    }
}
