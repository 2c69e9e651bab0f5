use mahayatra_core::{HoldPolicy, MAX_HOLD_SECONDS};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    /// Bookings go to Postgres when set, otherwise they live in memory.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    pub auth: AuthConfig,
    #[serde(default)]
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    #[serde(default = "default_hold_seconds")]
    pub seat_hold_seconds: u64,
    #[serde(default = "default_max_seats")]
    pub max_seats_per_session: usize,
}

fn default_hold_seconds() -> u64 {
    HoldPolicy::default().hold_seconds
}

fn default_max_seats() -> usize {
    HoldPolicy::default().max_seats_per_session
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            seat_hold_seconds: default_hold_seconds(),
            max_seats_per_session: default_max_seats(),
        }
    }
}

impl BusinessRules {
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if !(1..=MAX_HOLD_SECONDS).contains(&self.seat_hold_seconds) {
            return Err(config::ConfigError::Message(format!(
                "business_rules.seat_hold_seconds must be between 1 and {}, got {}",
                MAX_HOLD_SECONDS, self.seat_hold_seconds
            )));
        }
        if self.max_seats_per_session == 0 {
            return Err(config::ConfigError::Message(
                "business_rules.max_seats_per_session must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn hold_policy(&self) -> HoldPolicy {
        HoldPolicy {
            hold_seconds: self.seat_hold_seconds,
            max_seats_per_session: self.max_seats_per_session,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `MAHAYATRA__SERVER__PORT=8080`
            .add_source(config::Environment::with_prefix("MAHAYATRA").separator("__"))
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.business_rules.validate()?;
        Ok(config)
    }
}
