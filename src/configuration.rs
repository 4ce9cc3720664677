use chrono::NaiveTime;

use crate::error::ConfigError;

const MIN_SECRET_LENGTH: usize = 32;
// Ten years. Larger values overflow date arithmetic on issue and purge.
const MAX_TTL_MS: i64 = 3650 * 24 * 60 * 60 * 1000;
const MAX_RETENTION_DAYS: i64 = 3650;
const MAX_INTERVAL_SECS: u64 = 3650 * 24 * 60 * 60;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub password: PasswordSettings,
    #[serde(default)]
    pub password_reset: PasswordResetSettings,
    #[serde(default)]
    pub cleanup: CleanupSettings,
    pub email_client: EmailClientSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// Access and refresh token settings
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub issuer: String,
    #[serde(default = "default_access_token_ttl_ms")]
    pub access_token_ttl_ms: i64,  // 15 minutes
    #[serde(default = "default_refresh_token_ttl_ms")]
    pub refresh_token_ttl_ms: i64, // 7 days
}

impl JwtSettings {
    pub fn access_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.access_token_ttl_ms)
    }

    pub fn refresh_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.refresh_token_ttl_ms)
    }

    /// Access token lifetime as reported to clients
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_ms / 1000
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct PasswordSettings {
    #[serde(default = "default_min_password_length")]
    pub min_length: usize,
    #[serde(default = "default_max_password_length")]
    pub max_length: usize,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

impl Default for PasswordSettings {
    fn default() -> Self {
        Self {
            min_length: default_min_password_length(),
            max_length: default_max_password_length(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct PasswordResetSettings {
    #[serde(default = "default_reset_token_ttl_ms")]
    pub token_ttl_ms: i64,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_reset_url")]
    pub reset_url: String,
}

impl PasswordResetSettings {
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.token_ttl_ms)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }
}

impl Default for PasswordResetSettings {
    fn default() -> Self {
        Self {
            token_ttl_ms: default_reset_token_ttl_ms(),
            retention_days: default_retention_days(),
            reset_url: default_reset_url(),
        }
    }
}

/// Background cleanup timers
#[derive(serde::Deserialize, Clone)]
pub struct CleanupSettings {
    #[serde(default = "default_refresh_sweep_interval_secs")]
    pub refresh_sweep_interval_secs: u64,
    #[serde(default = "default_reset_expiry_interval_secs")]
    pub reset_expiry_interval_secs: u64,
    /// "HH:MM", UTC
    #[serde(default = "default_purge_time_of_day")]
    pub purge_time_of_day: String,
}

impl CleanupSettings {
    pub fn purge_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.purge_time_of_day, "%H:%M").map_err(|e| {
            ConfigError::InvalidValue(format!(
                "cleanup.purge_time_of_day '{}': {}",
                self.purge_time_of_day, e
            ))
        })
    }
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            refresh_sweep_interval_secs: default_refresh_sweep_interval_secs(),
            reset_expiry_interval_secs: default_reset_expiry_interval_secs(),
            purge_time_of_day: default_purge_time_of_day(),
        }
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct EmailClientSettings {
    pub base_url: String,
    pub sender_email: String,
    #[serde(default = "default_email_timeout_ms")]
    pub timeout_ms: u64,
}

impl EmailClientSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

fn default_max_connections() -> u32 {
    5
}
fn default_access_token_ttl_ms() -> i64 {
    900_000
}
fn default_refresh_token_ttl_ms() -> i64 {
    604_800_000
}
fn default_min_password_length() -> usize {
    8
}
fn default_max_password_length() -> usize {
    128
}
fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}
fn default_reset_token_ttl_ms() -> i64 {
    300_000
}
fn default_retention_days() -> i64 {
    30
}
fn default_reset_url() -> String {
    "http://localhost:3000/reset-password".to_string()
}
fn default_refresh_sweep_interval_secs() -> u64 {
    3600
}
fn default_reset_expiry_interval_secs() -> u64 {
    1800
}
fn default_purge_time_of_day() -> String {
    "03:00".to_string()
}
fn default_email_timeout_ms() -> u64 {
    10_000
}

impl Settings {
    /// Reject settings that would make the subsystem insecure or inert
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.secret must be at least {} bytes",
                MIN_SECRET_LENGTH
            )));
        }
        for (name, ttl) in [
            ("jwt.access_token_ttl_ms", self.jwt.access_token_ttl_ms),
            ("jwt.refresh_token_ttl_ms", self.jwt.refresh_token_ttl_ms),
            ("password_reset.token_ttl_ms", self.password_reset.token_ttl_ms),
        ] {
            if !(1..=MAX_TTL_MS).contains(&ttl) {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be in 1..={}",
                    name, MAX_TTL_MS
                )));
            }
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.password_reset.retention_days) {
            return Err(ConfigError::InvalidValue(format!(
                "password_reset.retention_days must be in 1..={}",
                MAX_RETENTION_DAYS
            )));
        }
        if !(4..=31).contains(&self.password.bcrypt_cost) {
            return Err(ConfigError::InvalidValue(
                "password.bcrypt_cost must be between 4 and 31".to_string(),
            ));
        }
        if self.password.min_length == 0 || self.password.min_length > self.password.max_length {
            return Err(ConfigError::InvalidValue(
                "password.min_length must be in 1..=max_length".to_string(),
            ));
        }
        for interval in [
            self.cleanup.refresh_sweep_interval_secs,
            self.cleanup.reset_expiry_interval_secs,
        ] {
            if !(1..=MAX_INTERVAL_SECS).contains(&interval) {
                return Err(ConfigError::InvalidValue(format!(
                    "cleanup intervals must be in 1..={} seconds",
                    MAX_INTERVAL_SECS
                )));
            }
        }
        self.cleanup.purge_time()?;
        Ok(())
    }
}

/// Load settings from an optional `configuration` file overlaid with
/// `APP_`-prefixed environment variables (`APP_JWT__SECRET=...`)
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    let settings = settings.try_deserialize::<Settings>()?;
    settings.validate()?;
    Ok(settings)
}
