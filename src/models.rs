// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response objects exchanged with the protocol engines. All
//! types derive `Serialize`, `Deserialize`, and `ToSchema` for JSON handling
//! and OpenAPI documentation, and use camelCase field names on the wire.
//!
//! ## Envelope
//!
//! Every request body is wrapped as `{"requestObject": {...}}` and every
//! successful response as `{"status": "OK", "responseObject": {...}}`.
//!
//! ## Binary Fields
//!
//! Keys, signatures, nonces, digests and session indices are standard base64
//! strings.
//!
//! ## Model Categories
//!
//! - **Activation**: pairing lifecycle and status projections
//! - **Signature**: online/offline/ECDSA verification and the audit log
//! - **Vault**: vault unlock
//! - **Encryption**: end-to-end transport keys
//! - **Token**: bearer tokens

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::crypto::signature::SignatureType;
use crate::storage::{ActivationStatus, KeyValue};

// =============================================================================
// Envelope
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestRequest<T> {
    pub request_object: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestResponse<T> {
    /// Always `OK`.
    pub status: String,
    pub response_object: T,
}

impl<T> RestResponse<T> {
    pub fn ok(response_object: T) -> Self {
        Self {
            status: "OK".to_string(),
            response_object,
        }
    }
}

// =============================================================================
// Activation Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitActivationRequest {
    pub application_id: u64,
    pub user_id: String,
    /// Lockout threshold; server default when absent.
    #[serde(default)]
    pub max_failure_count: Option<u64>,
    /// Pairing deadline; now + configured validity when absent.
    #[serde(default)]
    pub timestamp_activation_expire: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitActivationResponse {
    pub activation_id: String,
    pub activation_id_short: String,
    pub activation_otp: String,
    /// ECDSA signature of `activationIdShort-activationOtp` by the application master key.
    pub activation_signature: String,
    pub server_public_key: String,
    pub user_id: String,
    pub application_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrepareActivationRequest {
    pub activation_id_short: String,
    #[serde(default)]
    pub activation_name: Option<String>,
    #[serde(default)]
    pub extras: Option<String>,
    /// 16 bytes.
    pub activation_nonce: String,
    pub ephemeral_public_key: String,
    pub encrypted_device_public_key: String,
    pub application_key: String,
    /// HMAC of `activationIdShort&activationNonce&encryptedDevicePublicKey&applicationKey`.
    pub application_signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateActivationRequest {
    pub user_id: String,
    pub application_key: String,
    /// Caller-chosen identity used in place of a generated short id.
    pub identity: String,
    pub activation_otp: String,
    #[serde(default)]
    pub activation_name: Option<String>,
    #[serde(default)]
    pub extras: Option<String>,
    #[serde(default)]
    pub max_failure_count: Option<u64>,
    #[serde(default)]
    pub timestamp_activation_expire: Option<DateTime<Utc>>,
    pub activation_nonce: String,
    pub ephemeral_public_key: String,
    pub encrypted_device_public_key: String,
    /// HMAC of `identity&activationNonce&encryptedDevicePublicKey&applicationKey`.
    pub application_signature: String,
}

/// Result of a completed pairing (prepare or create).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PairingResponse {
    pub activation_id: String,
    pub user_id: String,
    pub application_id: u64,
    pub server_public_key: String,
    /// ECDSA signature of `activationId&serverPublicKey` by the application master key.
    pub server_public_key_signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivationIdRequest {
    pub activation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommitActivationResponse {
    pub activation_id: String,
    pub activated: bool,
    pub activation_status: ActivationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoveActivationResponse {
    pub activation_id: String,
    pub removed: bool,
    pub activation_status: ActivationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockActivationRequest {
    pub activation_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivationStatusChangeResponse {
    pub activation_id: String,
    pub activation_status: ActivationStatus,
    pub blocked_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivationStatusResponse {
    pub activation_id: String,
    pub activation_status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub activation_name: Option<String>,
    pub user_id: Option<String>,
    pub application_id: Option<u64>,
    pub extras: Option<String>,
    pub counter: u64,
    pub failed_attempts: u64,
    pub max_failed_attempts: u64,
    pub remaining_attempts: u64,
    pub timestamp_created: Option<DateTime<Utc>>,
    pub timestamp_last_used: Option<DateTime<Utc>>,
    pub timestamp_activation_expire: Option<DateTime<Utc>>,
    /// Status blob sealed with the activation transport key.
    pub encrypted_status_blob: Option<String>,
    pub device_public_key_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivationListRequest {
    pub user_id: String,
    #[serde(default)]
    pub application_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivationSummary {
    pub activation_id: String,
    pub activation_status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub activation_name: Option<String>,
    pub extras: Option<String>,
    pub user_id: String,
    pub application_id: u64,
    pub timestamp_created: DateTime<Utc>,
    pub timestamp_last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivationListResponse {
    pub activations: Vec<ActivationSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivationHistoryRequest {
    pub activation_id: String,
    pub timestamp_from: DateTime<Utc>,
    pub timestamp_to: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivationHistoryItem {
    pub id: String,
    pub activation_id: String,
    pub activation_status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub timestamp_created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivationHistoryResponse {
    pub items: Vec<ActivationHistoryItem>,
}

// =============================================================================
// Signature Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifySignatureRequest {
    pub activation_id: String,
    pub application_key: String,
    /// Normalized request data the client signed.
    pub data: String,
    pub signature: String,
    pub signature_type: SignatureType,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOfflineSignatureRequest {
    pub activation_id: String,
    pub data: String,
    pub signature: String,
    pub signature_type: SignatureType,
}

/// Verification verdict. A mismatch is reported here, never as an error.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifySignatureResponse {
    pub signature_valid: bool,
    pub activation_id: String,
    pub user_id: String,
    pub application_id: u64,
    pub activation_status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub remaining_attempts: u64,
    pub signature_type: SignatureType,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedOfflinePayloadRequest {
    pub activation_id: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NonPersonalizedOfflinePayloadRequest {
    pub application_id: u64,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OfflinePayloadResponse {
    /// `data\nnonce\n{keyIndicator}{ecdsaSignature}`, rendered as a QR code by callers.
    pub offline_data: String,
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEcdsaSignatureRequest {
    pub activation_id: String,
    /// Base64 of the signed bytes.
    pub data: String,
    /// Base64 DER signature.
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEcdsaSignatureResponse {
    pub signature_valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignatureAuditRequest {
    pub user_id: String,
    #[serde(default)]
    pub application_id: Option<u64>,
    pub timestamp_from: DateTime<Utc>,
    pub timestamp_to: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignatureAuditItem {
    pub id: String,
    pub activation_id: String,
    pub user_id: String,
    pub application_id: u64,
    pub activation_counter: u64,
    pub activation_status: ActivationStatus,
    pub signature_type: SignatureType,
    pub signature: String,
    pub data: String,
    pub valid: bool,
    pub note: String,
    pub additional_info: Vec<KeyValue>,
    pub timestamp_created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignatureAuditResponse {
    pub items: Vec<SignatureAuditItem>,
}

// =============================================================================
// Vault Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultUnlockRequest {
    pub activation_id: String,
    pub application_key: String,
    pub signature: String,
    pub signature_type: SignatureType,
    pub data: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultUnlockResponse {
    pub activation_id: String,
    pub user_id: String,
    pub activation_status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub remaining_attempts: u64,
    pub signature_valid: bool,
    /// Vault key sealed for the device; present only when the signature verified.
    pub encrypted_vault_encryption_key: Option<String>,
}

// =============================================================================
// Encryption Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivationEncryptionKeyRequest {
    pub activation_id: String,
    /// 16 bytes; any other value is replaced by a fresh random index.
    #[serde(default)]
    pub session_index: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivationEncryptionKeyResponse {
    pub activation_id: String,
    pub encryption_key: String,
    pub encryption_key_index: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationEncryptionKeyRequest {
    pub application_key: String,
    #[serde(default)]
    pub session_index: Option<String>,
    pub ephemeral_public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationEncryptionKeyResponse {
    pub application_key: String,
    pub application_id: u64,
    pub encryption_key: String,
    pub encryption_key_index: String,
    pub ephemeral_public_key: String,
}

// =============================================================================
// Token Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenRequest {
    pub activation_id: String,
    /// Factors the token stands for; `POSSESSION` when absent.
    #[serde(default)]
    pub signature_type: Option<SignatureType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenResponse {
    pub token_id: String,
    pub token_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateTokenRequest {
    pub token_id: String,
    pub nonce: String,
    /// Client timestamp in milliseconds, as signed.
    pub timestamp: i64,
    /// HMAC-SHA256 of `nonce || "&" || timestamp` keyed by the token secret.
    pub token_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateTokenResponse {
    pub token_valid: bool,
    pub activation_id: Option<String>,
    pub user_id: Option<String>,
    pub application_id: Option<u64>,
    pub signature_type: Option<SignatureType>,
}

impl ValidateTokenResponse {
    pub fn invalid() -> Self {
        Self {
            token_valid: false,
            activation_id: None,
            user_id: None,
            application_id: None,
            signature_type: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoveTokenRequest {
    pub token_id: String,
    /// When given, the token is only removed if it belongs to this activation.
    #[serde(default)]
    pub activation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoveTokenResponse {
    pub removed: bool,
}
