// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Service errors with stable codes, and their HTTP envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::crypto::key_storage::KeyStorageError;
use crate::crypto::CryptoError;
use crate::storage::StoreError;

/// Failures surfaced by the protocol engines.
///
/// Domain variants carry a stable code. `Storage` and `Crypto` are internal;
/// [`ServiceError::at_boundary`] turns them into `UnknownError`.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("activation not found")]
    ActivationNotFound,

    #[error("application not found")]
    ApplicationNotFound,

    #[error("no master server key pair configured for application")]
    NoMasterServerKeyPair,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid key format")]
    InvalidKeyFormat,

    #[error("invalid input format: {0}")]
    InvalidInputFormat(String),

    #[error("unable to compute signature")]
    UnableToComputeSignature,

    #[error("activation is in incorrect state")]
    ActivationInWrongState,

    #[error("unknown error occurred")]
    UnknownError,

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("key storage failure: {0}")]
    KeyStorage(#[from] KeyStorageError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// Stable error code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ActivationNotFound => "ACTIVATION_NOT_FOUND",
            Self::ApplicationNotFound => "APPLICATION_NOT_FOUND",
            Self::NoMasterServerKeyPair => "NO_MASTER_SERVER_KEYPAIR",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::InvalidKeyFormat => "INVALID_KEY_FORMAT",
            Self::InvalidInputFormat(_) => "INVALID_INPUT_FORMAT",
            Self::UnableToComputeSignature => "UNABLE_TO_COMPUTE_SIGNATURE",
            Self::ActivationInWrongState => "ACTIVATION_INCORRECT_STATE",
            Self::UnknownError | Self::Storage(_) | Self::Crypto(_) | Self::KeyStorage(_) => {
                "UNKNOWN_ERROR"
            }
        }
    }

    /// Log internal failures with full context and hide their detail.
    pub fn at_boundary(self, operation: &str) -> Self {
        match self {
            Self::Storage(e) => {
                tracing::error!(operation, error = %e, "Storage failure");
                Self::UnknownError
            }
            Self::Crypto(e) => {
                tracing::error!(operation, error = %e, "Cryptographic provider failure");
                Self::UnknownError
            }
            Self::KeyStorage(e) => {
                tracing::error!(operation, error = %e, "Server private key unavailable");
                Self::UnknownError
            }
            other => {
                tracing::warn!(operation, code = other.code(), "Operation rejected");
                other
            }
        }
    }
}

// =============================================================================
// HTTP envelope
// =============================================================================

/// One entry of the error list in an `ERROR` response.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub code: String,
    pub message: String,
    pub localized_message: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub status: String,
    pub response_object: Vec<ErrorEntry>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let err = match err {
            ServiceError::Storage(_) | ServiceError::Crypto(_) | ServiceError::KeyStorage(_) => {
                err.at_boundary("api")
            }
            other => other,
        };
        Self::new(StatusCode::BAD_REQUEST, err.code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorEnvelope {
            status: "ERROR".to_string(),
            response_object: vec![ErrorEntry {
                code: self.code,
                localized_message: self.message.clone(),
                message: self.message,
            }],
        });
        (self.status, body).into_response()
    }
}
