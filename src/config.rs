use std::env;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub scheduled_activation_interval: Duration,
    pub matching: MatchingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let defaults = MatchingConfig::default();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            scheduled_activation_interval: Duration::from_secs(parse_or_default(
                "SCHEDULED_ACTIVATION_INTERVAL_SECS",
                60,
            )?),
            matching: MatchingConfig {
                radius_meters: parse_or_default("MATCH_RADIUS_METERS", defaults.radius_meters)?,
                max_retries: parse_or_default("MATCH_MAX_RETRIES", defaults.max_retries)?,
                offer_window: Duration::from_secs(parse_or_default(
                    "MATCH_OFFER_WINDOW_SECS",
                    defaults.offer_window.as_secs(),
                )?),
                sweep_interval: Duration::from_secs(parse_or_default(
                    "MATCH_SWEEP_INTERVAL_SECS",
                    defaults.sweep_interval.as_secs(),
                )?),
                broadcast_window: Duration::from_secs(parse_or_default(
                    "MATCH_BROADCAST_WINDOW_SECS",
                    defaults.broadcast_window.as_secs(),
                )?),
            },
        };

        config
            .matching
            .validate()
            .map_err(|err| AppError::Internal(format!("invalid matching config: {err}")))?;

        Ok(config)
    }
}

/// Tunables for the offer / retry / broadcast cycle.
///
/// `max_retries` caps the total number of sequential single-driver offers,
/// the first offer included.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfig {
    pub radius_meters: f64,
    pub max_retries: u32,
    pub offer_window: Duration,
    pub sweep_interval: Duration,
    /// How long a broadcast trip may wait for an acceptor before it is escalated.
    pub broadcast_window: Duration,
}

/// Upper bound for every matching window and interval.
pub const MAX_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

impl MatchingConfig {
    /// Rejects values the engine cannot schedule with.
    pub fn validate(&self) -> Result<(), String> {
        if !self.radius_meters.is_finite() || self.radius_meters < 0.0 {
            return Err(format!("radius_meters must be >= 0, got {}", self.radius_meters));
        }
        if self.offer_window.is_zero() {
            return Err("offer_window must be positive".to_string());
        }
        for (name, value) in [
            ("offer_window", self.offer_window),
            ("sweep_interval", self.sweep_interval),
            ("broadcast_window", self.broadcast_window),
        ] {
            if value > MAX_WINDOW {
                return Err(format!(
                    "{name} must be at most {}s, got {}s",
                    MAX_WINDOW.as_secs(),
                    value.as_secs()
                ));
            }
        }
        Ok(())
    }

    pub fn radius_km(&self) -> f64 {
        self.radius_meters.max(0.0) / 1000.0
    }

    pub fn offer_window_delta(&self) -> chrono::Duration {
        to_delta(self.offer_window)
    }

    pub fn broadcast_window_delta(&self) -> chrono::Duration {
        to_delta(self.broadcast_window)
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            radius_meters: 5000.0,
            max_retries: 3,
            offer_window: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(5),
            broadcast_window: Duration::from_secs(60),
        }
    }
}

/// Where the engine reads its matching tunables from. Failures are not fatal:
/// the engine falls back to [`MatchingConfig::default`].
#[async_trait]
pub trait MatchingConfigSource: Send + Sync {
    async fn matching_config(&self) -> Result<MatchingConfig, AppError>;
}

/// Process-local config source seeded from the environment. `replace` backs the
/// settings endpoint; the engine and the sweep loop pick changes up on their next read.
#[derive(Debug)]
pub struct SharedMatchingConfig {
    current: RwLock<MatchingConfig>,
}

impl SharedMatchingConfig {
    pub fn new(initial: MatchingConfig) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub fn replace(&self, next: MatchingConfig) -> Result<(), AppError> {
        let mut current = self
            .current
            .write()
            .map_err(|_| AppError::ConfigUnavailable("matching config lock poisoned".to_string()))?;
        *current = next;
        Ok(())
    }
}

#[async_trait]
impl MatchingConfigSource for SharedMatchingConfig {
    async fn matching_config(&self) -> Result<MatchingConfig, AppError> {
        self.current
            .read()
            .map(|cfg| cfg.clone())
            .map_err(|_| AppError::ConfigUnavailable("matching config lock poisoned".to_string()))
    }
}

fn to_delta(duration: Duration) -> chrono::Duration {
    let millis = duration.min(MAX_WINDOW).as_millis();
    chrono::Duration::milliseconds(i64::try_from(millis).unwrap_or_default())
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
