// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Activation lifecycle.
//!
//! ```text
//! CREATED ──prepare──► OTP_USED ──commit──► ACTIVE ◄──unblock── BLOCKED
//!    │                    │                   └──────block──────►  │
//!    └────────────────────┴─────────remove───────────────────────┴──► REMOVED
//! ```
//!
//! `create` enters at OTP_USED directly. CREATED and OTP_USED records past
//! their deadline read as REMOVED.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use super::{stored_key, EngineContext};
use crate::crypto::key_derivation::{self, KEY_LEN};
use crate::crypto::{
    seal_with_random_nonce, CryptoError, CryptoProvider, AEAD_NONCE_LEN,
};
use crate::encoding;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    ActivationHistoryItem, ActivationHistoryRequest, ActivationHistoryResponse,
    ActivationListResponse, ActivationStatusChangeResponse, ActivationStatusResponse,
    ActivationSummary, CommitActivationResponse, CreateActivationRequest, InitActivationRequest,
    InitActivationResponse, PairingResponse, PrepareActivationRequest, RemoveActivationResponse,
};
use crate::storage::{
    ActivationHistoryRecord, ActivationRecord, ActivationRepository, ActivationStatus,
    ApplicationRepository, HistoryRepository, StoredApplicationVersion,
};

pub const BLOCKED_REASON_NOT_SPECIFIED: &str = "NOT_SPECIFIED";
pub const BLOCKED_REASON_MAX_FAILED_ATTEMPTS: &str = "MAX_FAILED_ATTEMPTS";

/// PBKDF2 rounds stretching the activation OTP into the inner envelope key.
pub const OTP_PBKDF2_ITERATIONS: u32 = 10_000;
pub const ACTIVATION_NONCE_LEN: usize = 16;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
const SHORT_ID_ATTEMPTS: usize = 10;

const STATUS_BLOB_MAGIC: [u8; 4] = [0xDE, 0xC0, 0xDE, 0xD1];
const STATUS_BLOB_VERSION: u8 = 2;
const STATUS_BLOB_LEN: usize = 16;
const AEAD_TAG_LEN: usize = 16;

#[derive(Clone)]
pub struct ActivationEngine {
    ctx: Arc<EngineContext>,
}

impl ActivationEngine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    // =========================================================================
    // Pairing
    // =========================================================================

    /// Start a pairing: new CREATED record with a server key pair, short id and OTP.
    pub fn init(&self, request: InitActivationRequest) -> ServiceResult<InitActivationResponse> {
        let crypto = self.ctx.crypto();
        let now = Utc::now();

        {
            let uow = self.ctx.store.read()?;
            ApplicationRepository::new(&uow)
                .get(request.application_id)?
                .ok_or(ServiceError::ApplicationNotFound)?;
        }
        let master = self.ctx.master_key_pair(request.application_id)?;
        let master_private_key = stored_key(&master.private_key)?;
        let max_failed_attempts = self.max_failed_attempts(request.max_failure_count)?;

        let activation_id = Uuid::new_v4().to_string();
        let server_key_pair = crypto.generate_key_pair()?;
        let server_private_key = self.ctx.key_storage().protect(
            &server_key_pair.private_key,
            &request.user_id,
            &activation_id,
        )?;
        let activation_otp = random_code(crypto)?;

        let uow = self.ctx.store.write()?;
        let activations = ActivationRepository::new(&uow);
        let activation_id_short = self.unused_short_id(&activations, now)?;
        let activation_signature = crypto.ecdsa_sign(
            &master_private_key,
            format!("{activation_id_short}-{activation_otp}").as_bytes(),
        )?;

        let record = ActivationRecord {
            activation_id,
            activation_id_short,
            activation_otp,
            user_id: request.user_id,
            application_id: request.application_id,
            activation_name: None,
            extras: None,
            status: ActivationStatus::Created,
            blocked_reason: None,
            server_public_key: encoding::encode(&server_key_pair.public_key),
            server_private_key,
            device_public_key: None,
            counter: 0,
            failed_attempts: 0,
            max_failed_attempts,
            expire_at: self.expiry(request.timestamp_activation_expire, now),
            created_at: now,
            last_used_at: now,
        };
        activations.put(&record)?;
        HistoryRepository::new(&uow).append(&ActivationHistoryRecord::of(&record, now))?;
        uow.commit()?;

        tracing::info!(
            activation_id = %record.activation_id,
            application_id = record.application_id,
            "Activation initialized"
        );
        Ok(InitActivationResponse {
            activation_id: record.activation_id,
            activation_id_short: record.activation_id_short,
            activation_otp: record.activation_otp,
            activation_signature: encoding::encode(&activation_signature),
            server_public_key: record.server_public_key,
            user_id: record.user_id,
            application_id: record.application_id,
        })
    }

    /// Complete a pairing started by `init`, using the short id and OTP.
    pub fn prepare(&self, request: PrepareActivationRequest) -> ServiceResult<PairingResponse> {
        let crypto = self.ctx.crypto();
        let version = self.ctx.supported_version(&request.application_key)?;
        verify_application_signature(
            crypto,
            &version,
            &[
                &request.activation_id_short,
                &request.activation_nonce,
                &request.encrypted_device_public_key,
                &request.application_key,
            ],
            &request.application_signature,
        )?;

        let pending = {
            let uow = self.ctx.store.read()?;
            ActivationRepository::new(&uow).find_by_short_id(&request.activation_id_short)?
        }
        .ok_or(ServiceError::ActivationNotFound)?;

        let _row = self.ctx.store.lock_row(&pending.activation_id)?;
        let now = Utc::now();
        let mut record = self
            .ctx
            .load_activation(&pending.activation_id)?
            .filter(|r| r.effective_status(now) == ActivationStatus::Created)
            .ok_or(ServiceError::ActivationNotFound)?;

        if record.application_id != version.application_id {
            tracing::warn!(
                activation_id = %record.activation_id,
                application_id = version.application_id,
                "Application key belongs to a different application"
            );
            return Err(ServiceError::InvalidSignature);
        }

        let master = self.ctx.master_key_pair(record.application_id)?;
        let master_private_key = stored_key(&master.private_key)?;
        let envelope = DeviceKeyEnvelope::decode(
            &request.activation_nonce,
            &request.ephemeral_public_key,
            &request.encrypted_device_public_key,
        )?;
        let device_public_key = match envelope.open(
            crypto,
            &master_private_key,
            &record.activation_id_short,
            &record.activation_otp,
        ) {
            Ok(key) => key,
            Err(ServiceError::InvalidInputFormat(reason)) => {
                self.record_failed_pairing(record, now)?;
                return Err(ServiceError::InvalidInputFormat(reason));
            }
            Err(e) => return Err(e),
        };

        record.device_public_key = Some(encoding::encode(&device_public_key));
        record.status = ActivationStatus::OtpUsed;
        record.activation_name = request.activation_name;
        record.extras = request.extras;
        record.last_used_at = now;

        let response = self.pairing_response(&record, &master_private_key)?;
        self.persist(&record, now)?;
        tracing::info!(activation_id = %record.activation_id, "Activation prepared");
        Ok(response)
    }

    /// Single-call pairing bound to a caller-supplied identity and OTP.
    pub fn create(&self, request: CreateActivationRequest) -> ServiceResult<PairingResponse> {
        let crypto = self.ctx.crypto();
        let version = self.ctx.supported_version(&request.application_key)?;
        verify_application_signature(
            crypto,
            &version,
            &[
                &request.identity,
                &request.activation_nonce,
                &request.encrypted_device_public_key,
                &request.application_key,
            ],
            &request.application_signature,
        )?;

        let master = self.ctx.master_key_pair(version.application_id)?;
        let master_private_key = stored_key(&master.private_key)?;
        let max_failed_attempts = self.max_failed_attempts(request.max_failure_count)?;
        let device_public_key = DeviceKeyEnvelope::decode(
            &request.activation_nonce,
            &request.ephemeral_public_key,
            &request.encrypted_device_public_key,
        )?
        .open(
            crypto,
            &master_private_key,
            &request.identity,
            &request.activation_otp,
        )?;

        let now = Utc::now();
        let activation_id = Uuid::new_v4().to_string();
        let server_key_pair = crypto.generate_key_pair()?;
        let server_private_key = self.ctx.key_storage().protect(
            &server_key_pair.private_key,
            &request.user_id,
            &activation_id,
        )?;

        let record = ActivationRecord {
            activation_id,
            activation_id_short: request.identity,
            activation_otp: request.activation_otp,
            user_id: request.user_id,
            application_id: version.application_id,
            activation_name: request.activation_name,
            extras: request.extras,
            status: ActivationStatus::OtpUsed,
            blocked_reason: None,
            server_public_key: encoding::encode(&server_key_pair.public_key),
            server_private_key,
            device_public_key: Some(encoding::encode(&device_public_key)),
            counter: 0,
            failed_attempts: 0,
            max_failed_attempts,
            expire_at: self.expiry(request.timestamp_activation_expire, now),
            created_at: now,
            last_used_at: now,
        };
        let response = self.pairing_response(&record, &master_private_key)?;

        let uow = self.ctx.store.write()?;
        let activations = ActivationRepository::new(&uow);
        if short_id_pending(&activations, &record.activation_id_short, now)? {
            return Err(ServiceError::InvalidInputFormat(
                "identity is held by a pending activation".to_string(),
            ));
        }
        activations.put(&record)?;
        HistoryRepository::new(&uow).append(&ActivationHistoryRecord::of(&record, now))?;
        uow.commit()?;

        tracing::info!(
            activation_id = %record.activation_id,
            application_id = record.application_id,
            "Activation created"
        );
        Ok(response)
    }

    // =========================================================================
    // State transitions
    // =========================================================================

    pub fn commit(&self, activation_id: &str) -> ServiceResult<CommitActivationResponse> {
        let _row = self.ctx.store.lock_row(activation_id)?;
        let now = Utc::now();
        let mut record = self.require(activation_id)?;

        if record.effective_status(now) != ActivationStatus::OtpUsed {
            tracing::warn!(
                activation_id,
                status = record.effective_status(now).as_str(),
                "Commit rejected"
            );
            return Err(ServiceError::ActivationInWrongState);
        }

        record.status = ActivationStatus::Active;
        record.last_used_at = now;
        self.persist(&record, now)?;

        tracing::info!(activation_id, "Activation committed");
        Ok(CommitActivationResponse {
            activation_id: record.activation_id,
            activated: true,
            activation_status: record.status,
        })
    }

    /// Terminal removal. Removing a removed activation is a no-op.
    pub fn remove(&self, activation_id: &str) -> ServiceResult<RemoveActivationResponse> {
        let _row = self.ctx.store.lock_row(activation_id)?;
        let now = Utc::now();
        let mut record = self.require(activation_id)?;

        if record.status != ActivationStatus::Removed {
            record.status = ActivationStatus::Removed;
            record.last_used_at = now;
            self.persist(&record, now)?;
            tracing::info!(activation_id, "Activation removed");
        }

        Ok(RemoveActivationResponse {
            activation_id: record.activation_id,
            removed: true,
            activation_status: ActivationStatus::Removed,
        })
    }

    /// ACTIVE → BLOCKED. Blocking a blocked activation keeps its original reason.
    pub fn block(
        &self,
        activation_id: &str,
        reason: Option<&str>,
    ) -> ServiceResult<ActivationStatusChangeResponse> {
        let _row = self.ctx.store.lock_row(activation_id)?;
        let now = Utc::now();
        let mut record = self.require(activation_id)?;

        match record.effective_status(now) {
            ActivationStatus::Active => {
                let reason = reason
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or(BLOCKED_REASON_NOT_SPECIFIED);
                record.status = ActivationStatus::Blocked;
                record.blocked_reason = Some(reason.to_string());
                record.last_used_at = now;
                self.persist(&record, now)?;
                tracing::info!(activation_id, reason, "Activation blocked");
            }
            ActivationStatus::Blocked => {}
            other => {
                tracing::warn!(activation_id, status = other.as_str(), "Block rejected");
                return Err(ServiceError::ActivationInWrongState);
            }
        }

        Ok(status_change(&record))
    }

    /// BLOCKED → ACTIVE, clearing the failed attempt counter.
    pub fn unblock(&self, activation_id: &str) -> ServiceResult<ActivationStatusChangeResponse> {
        let _row = self.ctx.store.lock_row(activation_id)?;
        let now = Utc::now();
        let mut record = self.require(activation_id)?;

        if record.effective_status(now) != ActivationStatus::Blocked {
            tracing::warn!(
                activation_id,
                status = record.effective_status(now).as_str(),
                "Unblock rejected"
            );
            return Err(ServiceError::ActivationInWrongState);
        }

        record.status = ActivationStatus::Active;
        record.blocked_reason = None;
        record.failed_attempts = 0;
        record.last_used_at = now;
        self.persist(&record, now)?;

        tracing::info!(activation_id, "Activation unblocked");
        Ok(status_change(&record))
    }

    // =========================================================================
    // Projections
    // =========================================================================

    /// Read-only status. An unknown id reads as REMOVED with a random blob,
    /// so devices cannot probe for existing activations.
    pub fn status(&self, activation_id: &str) -> ServiceResult<ActivationStatusResponse> {
        let crypto = self.ctx.crypto();
        let now = Utc::now();

        let Some(record) = self.ctx.load_activation(activation_id)? else {
            let decoy = crypto.random_bytes(AEAD_NONCE_LEN + STATUS_BLOB_LEN + AEAD_TAG_LEN)?;
            return Ok(ActivationStatusResponse {
                activation_id: activation_id.to_string(),
                activation_status: ActivationStatus::Removed,
                blocked_reason: None,
                activation_name: None,
                user_id: None,
                application_id: None,
                extras: None,
                counter: 0,
                failed_attempts: 0,
                max_failed_attempts: 0,
                remaining_attempts: 0,
                timestamp_created: None,
                timestamp_last_used: None,
                timestamp_activation_expire: None,
                encrypted_status_blob: Some(encoding::encode(&decoy)),
                device_public_key_fingerprint: None,
            });
        };

        let status = record.effective_status(now);
        let (encrypted_status_blob, device_public_key_fingerprint) =
            match record.device_public_key.as_deref() {
                Some(device_public_key) => {
                    let master_secret = self.ctx.activation_master_secret(&record)?;
                    let transport_key = key_derivation::transport_key(crypto, &master_secret)?;
                    let sealed = seal_with_random_nonce(
                        crypto,
                        &transport_key,
                        record.activation_id.as_bytes(),
                        &status_blob(status, &record),
                    )?;
                    (
                        Some(encoding::encode(&sealed)),
                        Some(key_fingerprint(crypto, &stored_key(device_public_key)?)),
                    )
                }
                None => (None, None),
            };

        Ok(ActivationStatusResponse {
            activation_id: record.activation_id.clone(),
            activation_status: status,
            blocked_reason: record.blocked_reason.clone(),
            activation_name: record.activation_name.clone(),
            user_id: Some(record.user_id.clone()),
            application_id: Some(record.application_id),
            extras: record.extras.clone(),
            counter: record.counter,
            failed_attempts: record.failed_attempts,
            max_failed_attempts: record.max_failed_attempts,
            remaining_attempts: record.remaining_attempts(),
            timestamp_created: Some(record.created_at),
            timestamp_last_used: Some(record.last_used_at),
            timestamp_activation_expire: record.expire_at,
            encrypted_status_blob,
            device_public_key_fingerprint,
        })
    }

    pub fn list(
        &self,
        user_id: &str,
        application_id: Option<u64>,
    ) -> ServiceResult<ActivationListResponse> {
        let now = Utc::now();
        let uow = self.ctx.store.read()?;
        let activations = ActivationRepository::new(&uow)
            .list_by_user(user_id)?
            .into_iter()
            .filter(|r| application_id.is_none_or(|app| r.application_id == app))
            .map(|r| ActivationSummary {
                activation_status: r.effective_status(now),
                activation_id: r.activation_id,
                blocked_reason: r.blocked_reason,
                activation_name: r.activation_name,
                extras: r.extras,
                user_id: r.user_id,
                application_id: r.application_id,
                timestamp_created: r.created_at,
                timestamp_last_used: r.last_used_at,
            })
            .collect();
        Ok(ActivationListResponse { activations })
    }

    pub fn history(&self, request: &ActivationHistoryRequest) -> ServiceResult<ActivationHistoryResponse> {
        if request.timestamp_from > request.timestamp_to {
            return Ok(ActivationHistoryResponse { items: Vec::new() });
        }
        let uow = self.ctx.store.read()?;
        let items = HistoryRepository::new(&uow)
            .list(
                &request.activation_id,
                request.timestamp_from,
                request.timestamp_to,
            )?
            .into_iter()
            .map(|h| ActivationHistoryItem {
                id: h.id,
                activation_id: h.activation_id,
                activation_status: h.status,
                blocked_reason: h.blocked_reason,
                timestamp_created: h.timestamp,
            })
            .collect();
        Ok(ActivationHistoryResponse { items })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn require(&self, activation_id: &str) -> ServiceResult<ActivationRecord> {
        self.ctx
            .load_activation(activation_id)?
            .ok_or(ServiceError::ActivationNotFound)
    }

    /// Write the record and a history entry in one unit of work.
    fn persist(&self, record: &ActivationRecord, now: DateTime<Utc>) -> ServiceResult<()> {
        let uow = self.ctx.store.write()?;
        ActivationRepository::new(&uow).put(record)?;
        HistoryRepository::new(&uow).append(&ActivationHistoryRecord::of(record, now))?;
        uow.commit()?;
        Ok(())
    }

    /// A device key that fails to decrypt counts against the pairing; the
    /// pairing is dropped once the threshold is reached.
    fn record_failed_pairing(&self, mut record: ActivationRecord, now: DateTime<Utc>) -> ServiceResult<()> {
        record.failed_attempts += 1;
        if record.failed_attempts >= record.max_failed_attempts {
            record.status = ActivationStatus::Removed;
            tracing::warn!(
                activation_id = %record.activation_id,
                "Pairing removed after too many undecryptable device keys"
            );
        } else {
            tracing::warn!(
                activation_id = %record.activation_id,
                failed_attempts = record.failed_attempts,
                "Device public key could not be decrypted"
            );
        }
        record.last_used_at = now;
        self.persist(&record, now)
    }

    fn pairing_response(
        &self,
        record: &ActivationRecord,
        master_private_key: &[u8],
    ) -> ServiceResult<PairingResponse> {
        let signature = self.ctx.crypto().ecdsa_sign(
            master_private_key,
            format!("{}&{}", record.activation_id, record.server_public_key).as_bytes(),
        )?;
        Ok(PairingResponse {
            activation_id: record.activation_id.clone(),
            user_id: record.user_id.clone(),
            application_id: record.application_id,
            server_public_key: record.server_public_key.clone(),
            server_public_key_signature: encoding::encode(&signature),
        })
    }

    fn max_failed_attempts(&self, requested: Option<u64>) -> ServiceResult<u64> {
        match requested {
            None => Ok(self.ctx.config.default_max_failed_attempts),
            Some(0) => Err(ServiceError::InvalidInputFormat(
                "maxFailureCount must be positive".to_string(),
            )),
            Some(n) => Ok(n),
        }
    }

    fn expiry(&self, requested: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        requested.or_else(|| {
            TimeDelta::from_std(self.ctx.config.activation_validity)
                .ok()
                .and_then(|validity| now.checked_add_signed(validity))
        })
    }

    fn unused_short_id(
        &self,
        activations: &ActivationRepository<'_>,
        now: DateTime<Utc>,
    ) -> ServiceResult<String> {
        for _ in 0..SHORT_ID_ATTEMPTS {
            let candidate = random_code(self.ctx.crypto())?;
            if !short_id_pending(activations, &candidate, now)? {
                return Ok(candidate);
            }
        }
        tracing::error!("Unable to find a free activation short id");
        Err(ServiceError::UnknownError)
    }
}

// =============================================================================
// Pairing crypto
// =============================================================================

/// Device public key as sent by the client: sealed with an OTP-derived key,
/// then with the ECDH secret of an ephemeral key and the master key.
struct DeviceKeyEnvelope {
    nonce: [u8; AEAD_NONCE_LEN],
    ephemeral_public_key: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl DeviceKeyEnvelope {
    fn decode(nonce: &str, ephemeral_public_key: &str, ciphertext: &str) -> ServiceResult<Self> {
        let nonce_bytes = encoding::decode_field("activationNonce", nonce)?;
        if nonce_bytes.len() != ACTIVATION_NONCE_LEN {
            return Err(ServiceError::InvalidInputFormat(format!(
                "activationNonce must be {ACTIVATION_NONCE_LEN} bytes"
            )));
        }
        let mut nonce = [0u8; AEAD_NONCE_LEN];
        nonce.copy_from_slice(&nonce_bytes[..AEAD_NONCE_LEN]);

        let ephemeral_public_key = encoding::decode(ephemeral_public_key)
            .map_err(|_| ServiceError::InvalidKeyFormat)?;
        Ok(Self {
            nonce,
            ephemeral_public_key,
            ciphertext: encoding::decode_field("encryptedDevicePublicKey", ciphertext)?,
        })
    }

    fn open(
        &self,
        crypto: &dyn CryptoProvider,
        master_private_key: &[u8],
        short_id: &str,
        otp: &str,
    ) -> ServiceResult<Vec<u8>> {
        let outer_key =
            key_derivation::master_secret(crypto, master_private_key, &self.ephemeral_public_key)
                .map_err(|e| match e {
                    CryptoError::InvalidPublicKey => ServiceError::InvalidKeyFormat,
                    other => ServiceError::Crypto(other),
                })?;
        let inner_key =
            crypto.pbkdf2_sha256(otp.as_bytes(), short_id.as_bytes(), OTP_PBKDF2_ITERATIONS, KEY_LEN)?;

        let undecryptable =
            |_| ServiceError::InvalidInputFormat("encryptedDevicePublicKey cannot be decrypted".to_string());
        let inner = crypto
            .open(&outer_key, &self.nonce, &[], &self.ciphertext)
            .map_err(undecryptable)?;
        let device_public_key = crypto
            .open(&inner_key, &self.nonce, &[], &inner)
            .map_err(undecryptable)?;

        crypto
            .validate_public_key(&device_public_key)
            .map_err(|_| ServiceError::InvalidKeyFormat)?;
        Ok(device_public_key)
    }
}

/// Check the HMAC a client build computes over the pairing fields with its
/// application secret.
fn verify_application_signature(
    crypto: &dyn CryptoProvider,
    version: &StoredApplicationVersion,
    parts: &[&str],
    presented: &str,
) -> ServiceResult<()> {
    let presented = encoding::decode_field("applicationSignature", presented)?;
    let secret = stored_key(&version.application_secret)?;
    let expected = crypto.hmac_sha256(&secret, parts.join("&").as_bytes())?;

    use p256::elliptic_curve::subtle::ConstantTimeEq;
    if bool::from(expected.as_slice().ct_eq(presented.as_slice())) {
        Ok(())
    } else {
        tracing::warn!(
            application_id = version.application_id,
            "Application signature mismatch"
        );
        Err(ServiceError::InvalidSignature)
    }
}

fn short_id_pending(
    activations: &ActivationRepository<'_>,
    short_id: &str,
    now: DateTime<Utc>,
) -> ServiceResult<bool> {
    Ok(activations
        .find_by_short_id(short_id)?
        .is_some_and(|r| r.effective_status(now) == ActivationStatus::Created))
}

/// `XXXXX-XXXXX` over the RFC 4648 base32 alphabet.
fn random_code(crypto: &dyn CryptoProvider) -> ServiceResult<String> {
    let bytes = crypto.random_bytes(10)?;
    let mut code = String::with_capacity(11);
    for (i, byte) in bytes.iter().enumerate() {
        if i == 5 {
            code.push('-');
        }
        code.push(BASE32_ALPHABET[(byte & 0x1F) as usize] as char);
    }
    Ok(code)
}

/// Plain status blob the device decrypts with its transport key.
fn status_blob(status: ActivationStatus, record: &ActivationRecord) -> [u8; STATUS_BLOB_LEN] {
    let mut blob = [0u8; STATUS_BLOB_LEN];
    blob[..4].copy_from_slice(&STATUS_BLOB_MAGIC);
    blob[4] = status.code();
    blob[5] = STATUS_BLOB_VERSION;
    blob[6] = STATUS_BLOB_VERSION;
    blob[13] = record.failed_attempts.min(u8::MAX as u64) as u8;
    blob[14] = record.max_failed_attempts.min(u8::MAX as u64) as u8;
    blob
}

/// Eight-digit fingerprint users compare between device and server.
fn key_fingerprint(crypto: &dyn CryptoProvider, public_key: &[u8]) -> String {
    let digest = crypto.sha256(public_key);
    let tail = u32::from_be_bytes([digest[28], digest[29], digest[30], digest[31]]) & 0x7FFF_FFFF;
    format!("{:08}", tail % 100_000_000)
}

fn status_change(record: &ActivationRecord) -> ActivationStatusChangeResponse {
    ActivationStatusChangeResponse {
        activation_id: record.activation_id.clone(),
        activation_status: record.status,
        blocked_reason: record.blocked_reason.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::open_with_prefixed_nonce;
    use crate::engine::testkit::{Device, TestEnv};
    use crate::models::ActivationIdRequest;
    use chrono::Duration as ChronoDuration;

    fn id(activation_id: &str) -> ActivationIdRequest {
        ActivationIdRequest {
            activation_id: activation_id.to_string(),
        }
    }

    #[test]
    fn random_code_has_two_groups_of_five() {
        let env = TestEnv::new();
        let code = random_code(env.crypto.as_ref()).unwrap();
        assert_eq!(code.len(), 11);
        assert_eq!(&code[5..6], "-");
        assert!(code
            .chars()
            .filter(|c| *c != '-')
            .all(|c| BASE32_ALPHABET.contains(&(c as u8))));
    }

    #[test]
    fn init_signs_short_id_and_otp_with_master_key() {
        let env = TestEnv::new();
        let init = env.init("u1");

        assert_eq!(init.application_id, env.app.application_id);
        let signature = encoding::decode(&init.activation_signature).unwrap();
        let master_public = encoding::decode(&env.app.master_public_key).unwrap();
        let signed = format!("{}-{}", init.activation_id_short, init.activation_otp);
        assert!(env
            .crypto
            .ecdsa_verify(&master_public, signed.as_bytes(), &signature)
            .unwrap());
    }

    #[test]
    fn init_rejects_unknown_application() {
        let env = TestEnv::new();
        let err = env
            .service
            .init_activation(InitActivationRequest {
                application_id: 999,
                user_id: "u1".into(),
                max_failure_count: None,
                timestamp_activation_expire: None,
            })
            .unwrap_err();
        assert!(matches!(err, ServiceError::ApplicationNotFound));
    }

    #[test]
    fn init_requires_master_key_pair() {
        let env = TestEnv::new();
        let bare = env.create_application_without_master_key("bare");
        let err = env
            .service
            .init_activation(InitActivationRequest {
                application_id: bare,
                user_id: "u1".into(),
                max_failure_count: None,
                timestamp_activation_expire: None,
            })
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoMasterServerKeyPair));
    }

    #[test]
    fn full_lifecycle_is_reachable() {
        let env = TestEnv::new();
        let init = env.init("u1");
        let device = Device::new(env.crypto.clone());

        let prepared = env
            .service
            .prepare_activation(env.prepare_request(&init, &device))
            .unwrap();
        assert_eq!(prepared.activation_id, init.activation_id);
        assert_eq!(prepared.server_public_key, init.server_public_key);

        let status = env.service.activation_status(id(&init.activation_id)).unwrap();
        assert_eq!(status.activation_status, ActivationStatus::OtpUsed);

        env.service.commit_activation(id(&init.activation_id)).unwrap();
        let blocked = env
            .service
            .block_activation(crate::models::BlockActivationRequest {
                activation_id: init.activation_id.clone(),
                reason: None,
            })
            .unwrap();
        assert_eq!(blocked.activation_status, ActivationStatus::Blocked);
        assert_eq!(blocked.blocked_reason.as_deref(), Some(BLOCKED_REASON_NOT_SPECIFIED));

        let unblocked = env.service.unblock_activation(id(&init.activation_id)).unwrap();
        assert_eq!(unblocked.activation_status, ActivationStatus::Active);
        assert!(unblocked.blocked_reason.is_none());

        let removed = env.service.remove_activation(id(&init.activation_id)).unwrap();
        assert_eq!(removed.activation_status, ActivationStatus::Removed);

        let history = env
            .service
            .activation_history(ActivationHistoryRequest {
                activation_id: init.activation_id.clone(),
                timestamp_from: Utc::now() - ChronoDuration::hours(1),
                timestamp_to: Utc::now() + ChronoDuration::hours(1),
            })
            .unwrap();
        let statuses: Vec<ActivationStatus> =
            history.items.iter().map(|h| h.activation_status).collect();
        assert_eq!(
            statuses,
            vec![
                ActivationStatus::Created,
                ActivationStatus::OtpUsed,
                ActivationStatus::Active,
                ActivationStatus::Blocked,
                ActivationStatus::Active,
                ActivationStatus::Removed,
            ]
        );
    }

    #[test]
    fn prepare_rejects_bad_application_signature() {
        let env = TestEnv::new();
        let init = env.init("u1");
        let device = Device::new(env.crypto.clone());
        let mut request = env.prepare_request(&init, &device);
        request.application_signature = encoding::encode(&[0u8; 32]);

        let err = env.service.prepare_activation(request).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidSignature));
    }

    #[test]
    fn prepare_with_unknown_short_id_fails() {
        let env = TestEnv::new();
        let mut init = env.init("u1");
        init.activation_id_short = "AAAAA-AAAAA".into();
        let device = Device::new(env.crypto.clone());
        let err = env
            .service
            .prepare_activation(env.prepare_request(&init, &device))
            .unwrap_err();
        assert!(matches!(err, ServiceError::ActivationNotFound));
    }

    #[test]
    fn wrong_otp_counts_against_pairing() {
        let env = TestEnv::new();
        let init = env.init_with_max_failures("u1", 2);
        let device = Device::new(env.crypto.clone());

        let mut wrong = init.clone();
        wrong.activation_otp = "WRONG-OTPXX".into();

        let err = env
            .service
            .prepare_activation(env.prepare_request(&wrong, &device))
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInputFormat(_)));
        let status = env.service.activation_status(id(&init.activation_id)).unwrap();
        assert_eq!(status.activation_status, ActivationStatus::Created);
        assert_eq!(status.failed_attempts, 1);

        env.service
            .prepare_activation(env.prepare_request(&wrong, &device))
            .unwrap_err();
        let status = env.service.activation_status(id(&init.activation_id)).unwrap();
        assert_eq!(status.activation_status, ActivationStatus::Removed);

        // The correct OTP no longer helps once the pairing is gone.
        let err = env
            .service
            .prepare_activation(env.prepare_request(&init, &device))
            .unwrap_err();
        assert!(matches!(err, ServiceError::ActivationNotFound));
    }

    #[test]
    fn prepare_rejects_short_nonce() {
        let env = TestEnv::new();
        let init = env.init("u1");
        let device = Device::new(env.crypto.clone());
        let mut request = env.prepare_request(&init, &device);
        request.activation_nonce = encoding::encode(&[1u8; 8]);
        request.application_signature = env.application_signature(&[
            &request.activation_id_short,
            &request.activation_nonce,
            &request.encrypted_device_public_key,
            &request.application_key,
        ]);
        let err = env.service.prepare_activation(request).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInputFormat(_)));
    }

    #[test]
    fn expired_pairing_is_rejected() {
        let env = TestEnv::new();
        let init = env
            .service
            .init_activation(InitActivationRequest {
                application_id: env.app.application_id,
                user_id: "u1".into(),
                max_failure_count: None,
                timestamp_activation_expire: Some(Utc::now() - ChronoDuration::seconds(1)),
            })
            .unwrap();
        let device = Device::new(env.crypto.clone());

        let err = env
            .service
            .prepare_activation(env.prepare_request(&init, &device))
            .unwrap_err();
        assert!(matches!(err, ServiceError::ActivationNotFound));
        let status = env.service.activation_status(id(&init.activation_id)).unwrap();
        assert_eq!(status.activation_status, ActivationStatus::Removed);
    }

    #[test]
    fn commit_requires_otp_used() {
        let env = TestEnv::new();
        let device = env.paired_device("u1");

        let err = env
            .service
            .commit_activation(id(&device.activation_id))
            .unwrap_err();
        assert!(matches!(err, ServiceError::ActivationInWrongState));

        env.service.remove_activation(id(&device.activation_id)).unwrap();
        let err = env
            .service
            .commit_activation(id(&device.activation_id))
            .unwrap_err();
        assert!(matches!(err, ServiceError::ActivationInWrongState));

        let err = env.service.commit_activation(id("missing")).unwrap_err();
        assert!(matches!(err, ServiceError::ActivationNotFound));
    }

    #[test]
    fn remove_is_idempotent() {
        let env = TestEnv::new();
        let init = env.init("u1");
        let first = env.service.remove_activation(id(&init.activation_id)).unwrap();
        let second = env.service.remove_activation(id(&init.activation_id)).unwrap();
        assert!(first.removed && second.removed);
        assert_eq!(second.activation_status, ActivationStatus::Removed);
    }

    #[test]
    fn remove_from_otp_used_and_blocked() {
        let env = TestEnv::new();

        let init = env.init("u1");
        let device = Device::new(env.crypto.clone());
        env.service
            .prepare_activation(env.prepare_request(&init, &device))
            .unwrap();
        let blocked = env.paired_device("u2");
        env.service
            .block_activation(crate::models::BlockActivationRequest {
                activation_id: blocked.activation_id.clone(),
                reason: None,
            })
            .unwrap();

        for activation_id in [init.activation_id.as_str(), blocked.activation_id.as_str()] {
            for _ in 0..2 {
                let removed = env.service.remove_activation(id(activation_id)).unwrap();
                assert!(removed.removed);
                assert_eq!(removed.activation_status, ActivationStatus::Removed);
            }
            let status = env.service.activation_status(id(activation_id)).unwrap();
            assert_eq!(status.activation_status, ActivationStatus::Removed);

            let history = env
                .service
                .activation_history(ActivationHistoryRequest {
                    activation_id: activation_id.to_string(),
                    timestamp_from: Utc::now() - ChronoDuration::hours(1),
                    timestamp_to: Utc::now() + ChronoDuration::hours(1),
                })
                .unwrap();
            let removals = history
                .items
                .iter()
                .filter(|h| h.activation_status == ActivationStatus::Removed)
                .count();
            assert_eq!(removals, 1);
        }
        assert!(matches!(
            env.service.unblock_activation(id(&blocked.activation_id)),
            Err(ServiceError::ActivationInWrongState)
        ));
    }

    #[test]
    fn reversed_history_window_is_empty() {
        let env = TestEnv::new();
        let device = env.paired_device("u1");
        let now = Utc::now();
        let history = |from, to| {
            env.service
                .activation_history(ActivationHistoryRequest {
                    activation_id: device.activation_id.clone(),
                    timestamp_from: from,
                    timestamp_to: to,
                })
                .unwrap()
        };

        let forward = history(now - ChronoDuration::hours(1), now + ChronoDuration::hours(1));
        assert!(!forward.items.is_empty());
        let reversed = history(now + ChronoDuration::hours(1), now - ChronoDuration::hours(1));
        assert!(reversed.items.is_empty());
    }

    #[test]
    fn block_and_unblock_state_rules() {
        let env = TestEnv::new();
        let init = env.init("u1");
        let block = |reason: Option<&str>| {
            env.service.block_activation(crate::models::BlockActivationRequest {
                activation_id: init.activation_id.clone(),
                reason: reason.map(str::to_string),
            })
        };

        assert!(matches!(block(None), Err(ServiceError::ActivationInWrongState)));
        assert!(matches!(
            env.service.unblock_activation(id(&init.activation_id)),
            Err(ServiceError::ActivationInWrongState)
        ));

        let device = env.paired_device("u2");
        let block_device = |reason: &str| {
            env.service.block_activation(crate::models::BlockActivationRequest {
                activation_id: device.activation_id.clone(),
                reason: Some(reason.to_string()),
            })
        };
        assert_eq!(
            block_device("LOST").unwrap().blocked_reason.as_deref(),
            Some("LOST")
        );
        // Second block keeps the first reason.
        assert_eq!(
            block_device("STOLEN").unwrap().blocked_reason.as_deref(),
            Some("LOST")
        );
    }

    #[test]
    fn status_blob_decrypts_with_device_transport_key() {
        let env = TestEnv::new();
        let device = env.paired_device("u1");

        let status = env.service.activation_status(id(&device.activation_id)).unwrap();
        let sealed = encoding::decode(status.encrypted_status_blob.as_deref().unwrap()).unwrap();
        let blob = open_with_prefixed_nonce(
            env.crypto.as_ref(),
            &device.transport_key(),
            device.activation_id.as_bytes(),
            &sealed,
        )
        .unwrap();

        assert_eq!(&blob[..4], &STATUS_BLOB_MAGIC);
        assert_eq!(blob[4], ActivationStatus::Active.code());
        assert_eq!(blob[14], 5);
        assert_eq!(status.device_public_key_fingerprint.unwrap().len(), 8);
    }

    #[test]
    fn unknown_activation_status_reads_as_removed() {
        let env = TestEnv::new();
        let status = env.service.activation_status(id("missing")).unwrap();
        assert_eq!(status.activation_status, ActivationStatus::Removed);
        let blob = encoding::decode(&status.encrypted_status_blob.unwrap()).unwrap();
        assert_eq!(blob.len(), AEAD_NONCE_LEN + STATUS_BLOB_LEN + AEAD_TAG_LEN);
        assert!(status.user_id.is_none());
    }

    #[test]
    fn create_pairs_in_one_call() {
        let env = TestEnv::new();
        let device = Device::new(env.crypto.clone());
        let response = env
            .service
            .create_activation(env.create_request("u1", "customer-42", "12345-67890", &device))
            .unwrap();

        let status = env.service.activation_status(id(&response.activation_id)).unwrap();
        assert_eq!(status.activation_status, ActivationStatus::OtpUsed);
        assert_eq!(status.user_id.as_deref(), Some("u1"));
        env.service.commit_activation(id(&response.activation_id)).unwrap();
    }

    #[test]
    fn create_with_mismatched_otp_fails() {
        let env = TestEnv::new();
        let device = Device::new(env.crypto.clone());
        let mut request = env.create_request("u1", "customer-42", "12345-67890", &device);
        request.activation_otp = "00000-00000".into();

        let err = env.service.create_activation(request).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInputFormat(_)));
    }

    #[test]
    fn list_filters_by_application() {
        let env = TestEnv::new();
        env.init("u1");
        env.init("u1");
        env.init("u2");

        let all = env
            .service
            .activation_list(crate::models::ActivationListRequest {
                user_id: "u1".into(),
                application_id: None,
            })
            .unwrap();
        assert_eq!(all.activations.len(), 2);

        let other_app = env
            .service
            .activation_list(crate::models::ActivationListRequest {
                user_id: "u1".into(),
                application_id: Some(env.app.application_id + 1),
            })
            .unwrap();
        assert!(other_app.activations.is_empty());
    }

    #[test]
    fn encrypted_key_mode_round_trips_through_pairing() {
        let env = TestEnv::with_master_db_key();
        let device = env.paired_device("u1");
        let status = env.service.activation_status(id(&device.activation_id)).unwrap();
        assert!(status.encrypted_status_blob.is_some());
    }

    #[test]
    fn zero_max_failure_count_is_rejected() {
        let env = TestEnv::new();
        let err = env
            .service
            .init_activation(InitActivationRequest {
                application_id: env.app.application_id,
                user_id: "u1".into(),
                max_failure_count: Some(0),
                timestamp_activation_expire: None,
            })
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInputFormat(_)));
    }
}
