//! Process configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{FixedOffset, NaiveTime};
use thiserror::Error;

use sellerdesk_fulfillment::PickupWindow;
use sellerdesk_infra::command_dispatcher::DEFAULT_CONFLICT_RETRIES;
use sellerdesk_infra::handoff::DEFAULT_CARRIER_TIMEOUT;
use sellerdesk_observability::LogFormat;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var} ('{value}'): {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("USE_PERSISTENT_STORES=true requires DATABASE_URL")]
    MissingDatabaseUrl,
}

/// Event store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    InMemory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub log_format: LogFormat,
    /// `None` selects the scripted dev carrier.
    pub carrier_base_url: Option<String>,
    pub carrier_api_key: Option<String>,
    pub carrier_timeout: Duration,
    pub pickup_window: PickupWindow,
    pub dispatch_conflict_retries: u32,
    pub store: StoreConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_format: LogFormat::Json,
            carrier_base_url: None,
            carrier_api_key: None,
            carrier_timeout: DEFAULT_CARRIER_TIMEOUT,
            pickup_window: PickupWindow::default(),
            dispatch_conflict_retries: DEFAULT_CONFLICT_RETRIES,
            store: StoreConfig::InMemory,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset and blank values use defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let bind_addr = match get("SELLERDESK_BIND_ADDR") {
            Some(v) => parse_with("SELLERDESK_BIND_ADDR", &v, |s| s.parse::<SocketAddr>())?,
            None => defaults.bind_addr,
        };

        let log_format = match get("SELLERDESK_LOG_FORMAT") {
            Some(v) => parse_with("SELLERDESK_LOG_FORMAT", &v, |s| s.parse::<LogFormat>())?,
            None => defaults.log_format,
        };

        let carrier_timeout = match get("CARRIER_TIMEOUT_MS") {
            Some(v) => {
                let ms = parse_with("CARRIER_TIMEOUT_MS", &v, |s| s.parse::<u64>())?;
                if ms == 0 {
                    return Err(invalid("CARRIER_TIMEOUT_MS", &v, "must be greater than zero"));
                }
                Duration::from_millis(ms)
            }
            None => defaults.carrier_timeout,
        };

        let opens = match get("PICKUP_WINDOW_OPENS") {
            Some(v) => parse_time("PICKUP_WINDOW_OPENS", &v)?,
            None => defaults.pickup_window.opens(),
        };
        let closes = match get("PICKUP_WINDOW_CLOSES") {
            Some(v) => parse_time("PICKUP_WINDOW_CLOSES", &v)?,
            None => defaults.pickup_window.closes(),
        };
        let utc_offset = match get("CARRIER_UTC_OFFSET_MINUTES") {
            Some(v) => {
                let minutes = parse_with("CARRIER_UTC_OFFSET_MINUTES", &v, |s| s.parse::<i32>())?;
                minutes
                    .checked_mul(60)
                    .and_then(FixedOffset::east_opt)
                    .ok_or_else(|| {
                        invalid("CARRIER_UTC_OFFSET_MINUTES", &v, "offset out of range")
                    })?
            }
            None => defaults.pickup_window.utc_offset(),
        };
        let pickup_window =
            PickupWindow::new(opens, closes, utc_offset).map_err(|e| ConfigError::Invalid {
                var: "PICKUP_WINDOW_OPENS",
                value: format!("{opens}-{closes}"),
                reason: e.to_string(),
            })?;

        let dispatch_conflict_retries = match get("DISPATCH_CONFLICT_RETRIES") {
            Some(v) => parse_with("DISPATCH_CONFLICT_RETRIES", &v, |s| s.parse::<u32>())?,
            None => defaults.dispatch_conflict_retries,
        };

        let use_persistent = match get("USE_PERSISTENT_STORES") {
            Some(v) => {
                parse_with("USE_PERSISTENT_STORES", &v, |s| s.to_ascii_lowercase().parse::<bool>())?
            }
            None => false,
        };
        let store = if use_persistent {
            let database_url = get("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;
            StoreConfig::Postgres { database_url }
        } else {
            StoreConfig::InMemory
        };

        Ok(Self {
            bind_addr,
            log_format,
            carrier_base_url: get("CARRIER_BASE_URL"),
            carrier_api_key: get("CARRIER_API_KEY"),
            carrier_timeout,
            pickup_window,
            dispatch_conflict_retries,
            store,
        })
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_with<T, E: core::fmt::Display>(
    var: &'static str,
    value: &str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> Result<T, ConfigError> {
    parse(value).map_err(|e| invalid(var, value, e.to_string()))
}

fn parse_time(var: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|e| invalid(var, value, e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<ApiConfig, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ApiConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.carrier_timeout, Duration::from_secs(10));
        assert_eq!(cfg.pickup_window, PickupWindow::default());
        assert_eq!(cfg.dispatch_conflict_retries, 3);
        assert_eq!(cfg.store, StoreConfig::InMemory);
        assert!(cfg.carrier_base_url.is_none());
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("SELLERDESK_BIND_ADDR", "127.0.0.1:9000"),
            ("SELLERDESK_LOG_FORMAT", "pretty"),
            ("CARRIER_BASE_URL", "http://carrier.local"),
            ("CARRIER_TIMEOUT_MS", "2500"),
            ("PICKUP_WINDOW_OPENS", "08:30"),
            ("PICKUP_WINDOW_CLOSES", "16:00"),
            ("CARRIER_UTC_OFFSET_MINUTES", "-300"),
            ("DISPATCH_CONFLICT_RETRIES", "7"),
        ])
        .unwrap();

        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert_eq!(cfg.carrier_base_url.as_deref(), Some("http://carrier.local"));
        assert_eq!(cfg.carrier_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.pickup_window.opens(), NaiveTime::from_hms_opt(8, 30, 0).unwrap());
        assert_eq!(cfg.pickup_window.utc_offset().local_minus_utc(), -300 * 60);
        assert_eq!(cfg.dispatch_conflict_retries, 7);
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        let err = config(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDatabaseUrl));

        let cfg = config(&[
            ("USE_PERSISTENT_STORES", "TRUE"),
            ("DATABASE_URL", "postgres://localhost/db"),
        ])
        .unwrap();

        assert_eq!(
            cfg.store,
            StoreConfig::Postgres {
                database_url: "postgres://localhost/db".to_string()
            }
        );
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(
            config(&[("CARRIER_TIMEOUT_MS", "soon")]),
            Err(ConfigError::Invalid { var: "CARRIER_TIMEOUT_MS", .. })
        ));
        assert!(config(&[("CARRIER_TIMEOUT_MS", "0")]).is_err());
        assert!(config(&[("PICKUP_WINDOW_OPENS", "9am")]).is_err());
        assert!(config(&[("PICKUP_WINDOW_OPENS", "15:00")]).is_err());
        assert!(config(&[("SELLERDESK_LOG_FORMAT", "xml")]).is_err());
    }
}
