use anyhow::Result;

// ============================================================================
// Configuration Constants
// ============================================================================

// Default port values
const DEFAULT_PORT: u16 = 8080;

// Contact policy defaults: 5 messages per sender identity per hour
const DEFAULT_CONTACT_LIMIT: u32 = 5;
const DEFAULT_CONTACT_WINDOW_SECS: u64 = 3600;

// Default timeout for the outbound mail provider call (seconds)
const DEFAULT_MAIL_TIMEOUT_SECS: u64 = 10;

// Time conversion constants
pub const SECONDS_PER_HOUR: u64 = 3600;

// Request size limit (in bytes)
// The contact form tops out around 3 KB of text; anything near the limit
// below is either a broken client or an attack.
pub const MAX_CONTACT_BODY_SIZE: usize = 16 * 1024;

// ============================================================================
// Configuration Structures
// ============================================================================

/// Which backing store the rate limiter uses.
///
/// `Memory` is correct for a single instance; `Redis` keeps the per-identity
/// counters consistent when the relay is scaled horizontally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateStoreKind {
    Memory,
    Redis,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub hash_salt: String,
}

/// Abuse-prevention policies for the public contact endpoint
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    /// Maximum contact messages per sender identity per window
    pub max_contacts_per_window: u32,
    /// Fixed rate-limit window in seconds
    pub contact_window_secs: u64,
    /// Metrics endpoint protection
    pub metrics_auth_enabled: bool,
    /// Bearer token for /metrics (optional, for Prometheus scraping)
    pub metrics_bearer_token: Option<String>,
}

impl SecurityConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            max_contacts_per_window: std::env::var("MAX_CONTACTS_PER_HOUR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CONTACT_LIMIT),
            contact_window_secs: std::env::var("CONTACT_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CONTACT_WINDOW_SECS),
            metrics_auth_enabled: std::env::var("METRICS_AUTH_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            metrics_bearer_token: std::env::var("METRICS_BEARER_TOKEN")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }
}

/// Outbound mail provider configuration.
///
/// The relay never speaks SMTP itself; it POSTs to the organization's mail
/// provider API. The provider's API token must stay out of logs.
#[derive(Clone, Debug)]
pub struct MailConfig {
    /// Mail provider endpoint, e.g. "https://api.mailprovider.example/v3/send"
    pub api_url: String,
    /// Bearer token for the provider API
    pub api_token: String,
    /// Envelope sender shown to the coach, e.g. "contact@certs.example"
    pub from_address: String,
    /// Display name on the envelope sender
    pub from_name: String,
    /// Upper bound on the delivery call; expiry surfaces as a delivery failure
    pub timeout_secs: u64,
}

impl MailConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let api_url = std::env::var("MAIL_API_URL")
            .map_err(|_| anyhow::anyhow!("MAIL_API_URL must be set"))?;
        let api_token = std::env::var("MAIL_API_TOKEN")
            .map_err(|_| anyhow::anyhow!("MAIL_API_TOKEN must be set"))?;

        Ok(Self {
            api_url,
            api_token,
            from_address: std::env::var("MAIL_FROM_ADDRESS")
                .unwrap_or_else(|_| "contact-relay@localhost".to_string()),
            from_name: std::env::var("MAIL_FROM_NAME")
                .unwrap_or_else(|_| "Coach Contact".to_string()),
            timeout_secs: std::env::var("MAIL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAIL_TIMEOUT_SECS),
        })
    }
}

/// Top-level application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Postgres connection string for the coach directory
    pub database_url: String,
    /// Redis connection string, used when `rate_store` is `Redis`
    pub redis_url: String,
    pub rate_store: RateStoreKind,
    pub security: SecurityConfig,
    pub mail: MailConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let rate_store = match std::env::var("RATE_STORE").as_deref() {
            Ok("redis") => RateStoreKind::Redis,
            _ => RateStoreKind::Memory,
        };

        Ok(Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            database_url,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            rate_store,
            security: SecurityConfig::from_env(),
            mail: MailConfig::from_env()?,
            logging: LoggingConfig {
                hash_salt: std::env::var("LOG_HASH_SALT")
                    .unwrap_or_else(|_| "relay-log-salt".to_string()),
            },
        })
    }
}
