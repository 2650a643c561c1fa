//! Structured logging.
//!
//! - JSON output on mainnet (log aggregation), pretty output otherwise
//! - correlation IDs for tracing a single wallet operation end to end
//! - dedicated event categories for the security-sensitive lifecycle events
//!   named in the specification: unlock, lock, key rotation, signing, and
//!   x402 settlement

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Event categories for structured logging.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Wallet create / unlock / lock / auto-lock events.
    Session,
    /// Key rotation / password rotation.
    Rotation,
    /// SIP-018, BIP-137, and BIP-340 signing operations.
    Signing,
    /// x402 payment settlement attempts.
    Payment,
    /// Price-impact quote requests.
    Quote,
    System,
    Error,
}

#[derive(Debug, Serialize)]
pub struct LogEvent {
    pub timestamp: String,
    pub level: String,
    pub category: EventCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl LogEvent {
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: format!("{:?}", level).to_uppercase(),
            category,
            message: message.into(),
            correlation_id: None,
            data: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorDetails {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| format!("{{\"error\": \"log serialization failed\", \"message\": \"{}\"}}", self.message))
    }
}

/// Logs a session lifecycle event (create, unlock, lock, auto-lock fired).
/// Never includes the password or decrypted key material, only the wallet id
/// and outcome.
pub fn log_session_event(
    event_type: &str,
    wallet_id: &str,
    success: bool,
    correlation_id: Option<&str>,
) {
    let level = if success { LogLevel::Info } else { LogLevel::Warn };
    let mut event = LogEvent::new(level, EventCategory::Session, event_type).with_data(
        serde_json::json!({ "wallet_id": wallet_id, "success": success }),
    );
    if let Some(id) = correlation_id {
        event = event.with_correlation_id(id);
    }
    if success {
        tracing::info!(target: "aibtc::session", "{}", event.to_json());
    } else {
        tracing::warn!(target: "aibtc::session", "{}", event.to_json());
    }
}

/// Logs a password/key rotation event.
pub fn log_rotation_event(wallet_id: &str, success: bool, error: Option<&str>) {
    let level = if success { LogLevel::Info } else { LogLevel::Error };
    let mut event = LogEvent::new(level, EventCategory::Rotation, "rotate_password")
        .with_data(serde_json::json!({ "wallet_id": wallet_id, "success": success }));
    if let Some(err) = error {
        event = event.with_error("ROTATION_ERROR", err);
    }
    if success {
        tracing::info!(target: "aibtc::rotation", "{}", event.to_json());
    } else {
        tracing::error!(target: "aibtc::rotation", "{}", event.to_json());
    }
}

/// Logs a signing operation. Never includes the signature preimage or raw
/// private key, only the scheme and key identity used.
pub fn log_signing_event(
    scheme: &str,
    key_id: &str,
    success: bool,
    correlation_id: Option<&str>,
    error: Option<&str>,
) {
    let level = if success { LogLevel::Info } else { LogLevel::Error };
    let mut event = LogEvent::new(level, EventCategory::Signing, format!("sign:{scheme}"))
        .with_data(serde_json::json!({ "key_id": key_id, "scheme": scheme, "success": success }));
    if let Some(id) = correlation_id {
        event = event.with_correlation_id(id);
    }
    if let Some(err) = error {
        event = event.with_error("SIGNING_ERROR", err);
    }
    if success {
        tracing::info!(target: "aibtc::signing", "{}", event.to_json());
    } else {
        tracing::error!(target: "aibtc::signing", "{}", event.to_json());
    }
}

/// Logs an x402 settlement attempt (including the single retry, if any).
pub fn log_payment_event(
    request_id: &str,
    attempt: u8,
    token: &str,
    amount: u64,
    success: bool,
    error: Option<&str>,
) {
    let level = if success { LogLevel::Info } else { LogLevel::Error };
    let mut event = LogEvent::new(level, EventCategory::Payment, "x402_settle")
        .with_correlation_id(request_id)
        .with_data(serde_json::json!({
            "attempt": attempt,
            "token": token,
            "amount": amount,
            "success": success
        }));
    if let Some(err) = error {
        event = event.with_error("PAYMENT_ERROR", err);
    }
    if success {
        tracing::info!(target: "aibtc::payment", "{}", event.to_json());
    } else {
        tracing::error!(target: "aibtc::payment", "{}", event.to_json());
    }
}

pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "aibtc_wallet_core={}",
            format!("{:?}", level).to_lowercase()
        ))
    });

    if json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        );
        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        );
        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

pub fn init_from_config(config: &crate::config::Config) -> Result<(), LoggingError> {
    let level = LogLevel::from(config.log_level.as_str());
    let json_format = config.network == crate::config::Network::Mainnet;
    init_logging(level, json_format)
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

/// Generates a correlation id for tracing one operation across log lines.
/// Uses a uuid rather than the teacher's hand-rolled timestamp+rand scheme.
pub fn generate_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_serialization() {
        let event = LogEvent::new(LogLevel::Info, EventCategory::Session, "unlock")
            .with_correlation_id("corr-123")
            .with_data(serde_json::json!({"wallet_id": "w1"}));
        let json = event.to_json();
        assert!(json.contains("unlock"));
        assert!(json.contains("corr-123"));
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_correlation_id_unique() {
        let a = generate_correlation_id();
        let b = generate_correlation_id();
        assert_ne!(a, b);
    }
}
