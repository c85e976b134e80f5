use serde::Deserialize;
use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub locks: LockConfig,
    pub features: FeatureFlags,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    /// `json` switches the log output to structured JSON lines.
    pub log_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub acquire_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub cache_ttl_seconds: u64,
}

/// Seat hold policy.
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// TTL applied when a caller does not pass one.
    pub default_ttl_seconds: u64,
    /// Upper bound on a caller-supplied TTL.
    pub max_ttl_seconds: u64,
    pub max_seats_per_lock: usize,
    pub sweep_interval_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 900,
            max_ttl_seconds: 86_400,
            max_seats_per_lock: 10,
            sweep_interval_seconds: 60,
        }
    }
}

impl LockConfig {
    /// Rejects values that would make every acquire fail or the sweeper spin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("SEAT_LOCK_TTL_SECONDS", self.default_ttl_seconds),
            ("SEAT_LOCK_MAX_TTL_SECONDS", self.max_ttl_seconds),
            ("MAX_SEATS_PER_LOCK", self.max_seats_per_lock as u64),
            ("SWEEP_INTERVAL_SECONDS", self.sweep_interval_seconds),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid { key, value: value.to_string() });
            }
        }
        if self.default_ttl_seconds > self.max_ttl_seconds {
            return Err(ConfigError::Invalid {
                key: "SEAT_LOCK_TTL_SECONDS",
                value: format!("{} (above SEAT_LOCK_MAX_TTL_SECONDS {})", self.default_ttl_seconds, self.max_ttl_seconds),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    pub enable_availability_cache: bool,
    pub enable_sweeper: bool,
}

fn var_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

fn string_or(key: &'static str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let lock_defaults = LockConfig::default();
        let locks = LockConfig {
            default_ttl_seconds: var_or("SEAT_LOCK_TTL_SECONDS", lock_defaults.default_ttl_seconds)?,
            max_ttl_seconds: var_or("SEAT_LOCK_MAX_TTL_SECONDS", lock_defaults.max_ttl_seconds)?,
            max_seats_per_lock: var_or("MAX_SEATS_PER_LOCK", lock_defaults.max_seats_per_lock)?,
            sweep_interval_seconds: var_or("SWEEP_INTERVAL_SECONDS", lock_defaults.sweep_interval_seconds)?,
        };
        locks.validate()?;

        Ok(Config {
            app: AppConfig {
                host: string_or("HOST", "0.0.0.0"),
                port: var_or("PORT", 8000)?,
                environment: string_or("ENVIRONMENT", "development"),
                rust_log: string_or("RUST_LOG", "seat_lock_service=debug,tower_http=debug"),
                log_format: string_or("LOG_FORMAT", "text"),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
                pool_size: var_or("DB_POOL_SIZE", 20)?,
                acquire_timeout_seconds: var_or("DB_ACQUIRE_TIMEOUT_SECONDS", 5)?,
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
                cache_ttl_seconds: var_or("AVAILABILITY_CACHE_TTL_SECONDS", 5)?,
            },
            locks,
            features: FeatureFlags {
                enable_availability_cache: var_or("ENABLE_AVAILABILITY_CACHE", false)?,
                enable_sweeper: var_or("ENABLE_SWEEPER", true)?,
            },
        })
    }
}
