use crate::address::AddressError;
use crate::amount::AmountError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Startup configuration problems. Fatal: the client refuses to start.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("{key} is not configured")]
    Missing { key: &'static str },

    #[error("{key} is not a valid contract address (`{value}`): {source}")]
    InvalidAddress {
        key: &'static str,
        value: String,
        #[source]
        source: AddressError,
    },

    #[error("{key} is not a 32-byte hex private key")]
    InvalidPrivateKey { key: &'static str },

    #[error("staking pool is bound to token {actual}, but token_contract is {configured}")]
    TokenMismatch { configured: String, actual: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

impl ConfigurationError {
    /// The configuration key this error is about, if any.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::Missing { key }
            | Self::InvalidAddress { key, .. }
            | Self::InvalidPrivateKey { key } => Some(*key),
            Self::TokenMismatch { .. } => Some("token_contract"),
            Self::Load(_) => None,
        }
    }
}

/// Client-side precondition failures. Never reach the remote side.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("lock term {0} is not one of 0 (flexible), 1 (one month), 2 (one year)")]
    InvalidLockTerm(u8),

    #[error("token spending has not been approved for the staking pool")]
    NotApproved,

    #[error("no stake record at index {0}")]
    StakeNotFound(u64),

    #[error("stake {0} has already been withdrawn")]
    AlreadyClaimed(u64),

    #[error("stake {index} is still locked ({remaining})")]
    StillLocked { index: u64, remaining: String },

    #[error("only the contract owner may deposit rewards")]
    NotAdmin,

    #[error("another operation ({0}) is still in flight")]
    OperationInFlight(String),

    #[error("token information has not been loaded yet")]
    TokenInfoUnavailable,
}

/// A read or write against the contract layer failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{call} failed: {reason}")]
pub struct RemoteCallError {
    pub call: String,
    pub reason: String,
}

impl RemoteCallError {
    pub fn new(call: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            call: call.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StakingError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("remote call error: {0}")]
    Remote(#[from] RemoteCallError),

    #[error("refresh failed while reading {stage}; previous state retained: {source}")]
    PartialRefresh {
        stage: &'static str,
        #[source]
        source: RemoteCallError,
    },

    #[error("transaction {tx_hash} was submitted but not confirmed in time")]
    ConfirmationTimeout { tx_hash: String },
}

impl StakingError {
    pub(crate) fn partial(stage: &'static str) -> impl FnOnce(RemoteCallError) -> Self {
        move |source| Self::PartialRefresh { stage, source }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Validation(ValidationError::OperationInFlight(_)) => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Remote(_) | Self::PartialRefresh { .. } => StatusCode::BAD_GATEWAY,
            Self::ConfirmationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn error_type(&self) -> &str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Remote(_) => "REMOTE_CALL_ERROR",
            Self::PartialRefresh { .. } => "PARTIAL_REFRESH_ERROR",
            Self::ConfirmationTimeout { .. } => "CONFIRMATION_TIMEOUT",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for StakingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse {
            error: self.error_type().to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}
