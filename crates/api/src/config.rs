//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use saga::{DEFAULT_RESERVATION_TTL_SECS, ReservationSettings, RetryPolicy};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL`: PostgreSQL URL; the in-memory store is used when unset
/// - `RESERVATION_TTL_SECS`: seat hold duration (default: `600`)
/// - `PAYMENT_CURRENCY`, `PAYMENT_GATEWAY`, `PAYMENT_ORDER_TYPE`: copied
///   into every payment request (defaults: `VND`, `VnPay`, `other`)
/// - `BUS_MAX_ATTEMPTS`, `BUS_INITIAL_BACKOFF_MS`: message redelivery
/// - `DEFAULT_SEAT_PRICE_CENTS`: price served by the built-in price list
/// - `DANGLING_SCAN_INTERVAL_SECS`, `DANGLING_GRACE_SECS`: stuck booking
///   detection
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub reservation_ttl_secs: i64,
    pub payment_currency: String,
    pub payment_gateway: String,
    pub payment_order_type: String,
    pub bus_max_attempts: u32,
    pub bus_initial_backoff_ms: u64,
    pub default_seat_price_cents: i64,
    pub dangling_scan_interval_secs: u64,
    pub dangling_grace_secs: i64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse_var(&lookup, "LOG_FORMAT").unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            reservation_ttl_secs: parse_var(&lookup, "RESERVATION_TTL_SECS")
                .filter(|secs: &i64| *secs > 0)
                .unwrap_or(defaults.reservation_ttl_secs),
            payment_currency: lookup("PAYMENT_CURRENCY").unwrap_or(defaults.payment_currency),
            payment_gateway: lookup("PAYMENT_GATEWAY").unwrap_or(defaults.payment_gateway),
            payment_order_type: lookup("PAYMENT_ORDER_TYPE")
                .unwrap_or(defaults.payment_order_type),
            bus_max_attempts: parse_var(&lookup, "BUS_MAX_ATTEMPTS")
                .unwrap_or(defaults.bus_max_attempts),
            bus_initial_backoff_ms: parse_var(&lookup, "BUS_INITIAL_BACKOFF_MS")
                .unwrap_or(defaults.bus_initial_backoff_ms),
            default_seat_price_cents: parse_var(&lookup, "DEFAULT_SEAT_PRICE_CENTS")
                .unwrap_or(defaults.default_seat_price_cents),
            dangling_scan_interval_secs: parse_var(&lookup, "DANGLING_SCAN_INTERVAL_SECS")
                .unwrap_or(defaults.dangling_scan_interval_secs),
            dangling_grace_secs: parse_var(&lookup, "DANGLING_GRACE_SECS")
                .unwrap_or(defaults.dangling_grace_secs),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reservation_settings(&self) -> ReservationSettings {
        ReservationSettings {
            reservation_ttl: chrono::Duration::seconds(self.reservation_ttl_secs),
            currency: self.payment_currency.clone(),
            preferred_gateway: self.payment_gateway.clone(),
            order_type: self.payment_order_type.clone(),
            ..ReservationSettings::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.bus_max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.bus_initial_backoff_ms),
            ..RetryPolicy::default()
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            reservation_ttl_secs: DEFAULT_RESERVATION_TTL_SECS,
            payment_currency: "VND".to_string(),
            payment_gateway: "VnPay".to_string(),
            payment_order_type: "other".to_string(),
            bus_max_attempts: retry.max_attempts,
            bus_initial_backoff_ms: retry.initial_backoff.as_millis() as u64,
            default_seat_price_cents: 100_000,
            dangling_scan_interval_secs: 60,
            dangling_grace_secs: 300,
        }
    }
}
