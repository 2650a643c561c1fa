//! Crate-wide error taxonomy
//!
//! Every module defines its own `thiserror` enum for the failures specific
//! to it; this module rolls them up into [`WalletCoreError`] so callers that
//! don't care which component failed can match on one type, the way the
//! teacher's `ZVaultError` rolls up `ConfigError`/`LoggingError`/etc.

use thiserror::Error;

use crate::btcmsg::BtcMsgError;
use crate::crypto::encryption::EncryptionError;
use crate::derivation::DerivationError;
use crate::quoter::QuoteError;
use crate::schnorr::SchnorrError;
use crate::session::SessionError;
use crate::sip018::Sip018Error;
use crate::store::StoreError;
use crate::x402::X402Error;

/// Stable error classification, independent of which module raised it.
///
/// Mirrors the taxonomy in the specification's error-handling design: callers
/// can branch on `kind()` without needing to know which concrete enum raised
/// the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    WrongPassword,
    NotFound,
    IntegrityError,
    WalletLocked,
    NetworkMismatch,
    InsufficientBalance,
    UpstreamFailure,
    PaymentRetryExceeded,
    BlindSignNotConfirmed,
    Internal,
}

/// Root error type for `aibtc-wallet-core`.
#[derive(Debug, Error)]
pub enum WalletCoreError {
    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("derivation error: {0}")]
    Derivation(#[from] DerivationError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("SIP-018 error: {0}")]
    Sip018(#[from] Sip018Error),

    #[error("schnorr error: {0}")]
    Schnorr(#[from] SchnorrError),

    #[error("bitcoin message signing error: {0}")]
    BtcMsg(#[from] BtcMsgError),

    #[error("quote error: {0}")]
    Quote(#[from] QuoteError),

    #[error("x402 error: {0}")]
    X402(#[from] X402Error),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WalletCoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletCoreError::Encryption(e) => e.kind(),
            WalletCoreError::Derivation(e) => e.kind(),
            WalletCoreError::Store(e) => e.kind(),
            WalletCoreError::Session(e) => e.kind(),
            WalletCoreError::Sip018(e) => e.kind(),
            WalletCoreError::Schnorr(e) => e.kind(),
            WalletCoreError::BtcMsg(e) => e.kind(),
            WalletCoreError::Quote(_) => ErrorKind::UpstreamFailure,
            WalletCoreError::X402(e) => e.kind(),
            WalletCoreError::Config(_) => ErrorKind::InvalidInput,
            WalletCoreError::Io(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UpstreamFailure | ErrorKind::Internal
        )
    }
}

/// A structured result object: success flag, data, error code, error message.
///
/// The specification's "Exit behavior" calls for operations to return a
/// structured result rather than relying on exceptions for control flow, per
/// the REDESIGN FLAGS note on "exceptions for control flow". This is the
/// shared envelope every public operation in this crate returns at its API
/// boundary, wrapping the richer `Result<T, WalletCoreError>` used
/// internally.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OperationResult<T: serde::Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl<T: serde::Serialize> OperationResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_code: None,
            error_message: None,
        }
    }

    pub fn err(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_code: Some(error_code(kind)),
            error_message: Some(message.into()),
        }
    }
}

fn error_code(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidInput => "INVALID_INPUT",
        ErrorKind::WrongPassword => "WRONG_PASSWORD",
        ErrorKind::NotFound => "NOT_FOUND",
        ErrorKind::IntegrityError => "INTEGRITY_ERROR",
        ErrorKind::WalletLocked => "WALLET_LOCKED",
        ErrorKind::NetworkMismatch => "NETWORK_MISMATCH",
        ErrorKind::InsufficientBalance => "INSUFFICIENT_BALANCE",
        ErrorKind::UpstreamFailure => "UPSTREAM_FAILURE",
        ErrorKind::PaymentRetryExceeded => "PAYMENT_RETRY_EXCEEDED",
        ErrorKind::BlindSignNotConfirmed => "BLIND_SIGN_NOT_CONFIRMED",
        ErrorKind::Internal => "INTERNAL_ERROR",
    }
}
