//! Configuration management for the booking core.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::catalog::CenterDirectory;
use crate::error::ConfigError;
use crate::inventory::VarietyPolicy;
use crate::payment::GatewayCredentials;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Booking-core configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Booking rules
    pub booking: BookingConfig,
    /// Payment gateway settings
    pub payment: PaymentConfig,
    /// Store runtime settings
    pub runtime: RuntimeConfig,
    /// Center names in allocation order
    pub centers: Vec<String>,
}

/// Booking rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Minimum advance percentage (default: 10)
    pub advance_floor_percent: u8,
    /// Hours an approved reservation is held (default: 72)
    pub reservation_hours: u32,
    /// Variety enforcement policy (default: cap-only)
    pub variety_policy: VarietyPolicy,
}

/// Payment gateway settings
#[derive(Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Gateway key id (absent = gateway not configured)
    pub key_id: Option<String>,
    /// Gateway shared secret (absent = gateway not configured)
    pub key_secret: Option<String>,
    /// Currency for advance intents (default: INR)
    pub currency: String,
}

/// Store runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Seconds between expired-reservation sweeps (default: 300)
    pub sweep_interval_secs: u64,
    /// Milliseconds to wait for a command reply (default: 5000)
    pub reply_timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an unparseable variety policy and
    /// [`ConfigError::Validation`] if the loaded values fail [`Config::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let variety_policy = match env::var("NURSERY_VARIETY_POLICY") {
            Ok(value) => parse_policy(&value)?,
            Err(_) => defaults.booking.variety_policy,
        };

        let centers = env::var("NURSERY_CENTERS")
            .ok()
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.centers);

        let config = Self {
            booking: BookingConfig {
                advance_floor_percent: env::var("NURSERY_ADVANCE_FLOOR_PERCENT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.booking.advance_floor_percent),
                reservation_hours: env::var("NURSERY_RESERVATION_HOURS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.booking.reservation_hours),
                variety_policy,
            },
            payment: PaymentConfig {
                key_id: env::var("PAYMENT_KEY_ID").ok().filter(|s| !s.is_empty()),
                key_secret: env::var("PAYMENT_KEY_SECRET").ok().filter(|s| !s.is_empty()),
                currency: env::var("PAYMENT_CURRENCY")
                    .unwrap_or_else(|_| defaults.payment.currency.clone()),
            },
            runtime: RuntimeConfig {
                sweep_interval_secs: env::var("NURSERY_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.runtime.sweep_interval_secs),
                reply_timeout_ms: env::var("NURSERY_REPLY_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.runtime.reply_timeout_ms),
            },
            centers,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.booking.advance_floor_percent > 100 {
            return Err(ConfigError::Validation(
                "advance_floor_percent must be between 0 and 100".to_string(),
            ));
        }
        if self.booking.reservation_hours == 0 {
            return Err(ConfigError::Validation(
                "reservation_hours must be greater than 0".to_string(),
            ));
        }
        if self.runtime.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "sweep_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.runtime.reply_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "reply_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.centers.is_empty() {
            return Err(ConfigError::Validation("at least one center is required".to_string()));
        }
        if self.payment.currency.trim().is_empty() {
            return Err(ConfigError::Validation("currency must not be empty".to_string()));
        }
        if self.payment.key_id.is_some() != self.payment.key_secret.is_some() {
            return Err(ConfigError::Validation(
                "PAYMENT_KEY_ID and PAYMENT_KEY_SECRET must be set together".to_string(),
            ));
        }
        Ok(())
    }

    /// Gateway credentials, if both key id and secret are present
    #[must_use]
    pub fn credentials(&self) -> Option<GatewayCredentials> {
        match (&self.payment.key_id, &self.payment.key_secret) {
            (Some(key_id), Some(key_secret)) => {
                Some(GatewayCredentials::new(key_id.clone(), key_secret.clone()))
            },
            _ => None,
        }
    }

    /// Center directory built from the configured names
    #[must_use]
    pub fn center_directory(&self) -> CenterDirectory {
        CenterDirectory::from_names(self.centers.iter().cloned())
    }

    /// Reservation window
    #[must_use]
    pub fn reservation_window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.booking.reservation_hours))
    }

    /// Interval between expiry sweeps
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.runtime.sweep_interval_secs)
    }

    /// How long a caller waits for a command reply
    #[must_use]
    pub const fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.reply_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            booking: BookingConfig {
                advance_floor_percent: 10,
                reservation_hours: 72,
                variety_policy: VarietyPolicy::CapOnly,
            },
            payment: PaymentConfig {
                key_id: None,
                key_secret: None,
                currency: "INR".to_string(),
            },
            runtime: RuntimeConfig {
                sweep_interval_secs: 300,
                reply_timeout_ms: 5000,
            },
            centers: vec![
                "Kottayam".to_string(),
                "Thrissur".to_string(),
                "Palakkad".to_string(),
            ],
        }
    }
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("key_id", &self.key_id)
            .field("key_secret", &self.key_secret.as_ref().map(|_| "<redacted>"))
            .field("currency", &self.currency)
            .finish()
    }
}

fn parse_policy(value: &str) -> Result<VarietyPolicy, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "cap-only" | "cap_only" | "cap" => Ok(VarietyPolicy::CapOnly),
        "strict" | "strict-assignment" => Ok(VarietyPolicy::StrictAssignment),
        _ => Err(ConfigError::InvalidValue {
            key: "NURSERY_VARIETY_POLICY",
            value: value.to_string(),
        }),
    }
}
