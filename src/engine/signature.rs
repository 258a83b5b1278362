// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Multi-factor signature verification, offline payloads and ECDSA checks.
//!
//! The server counter is authoritative: a signature is only checked against
//! the current counter, which moves forward on success. A mismatch is a
//! verdict, not an error, and counts toward the lockout threshold.

use std::sync::Arc;

use chrono::Utc;

use super::activation::BLOCKED_REASON_MAX_FAILED_ATTEMPTS;
use super::{stored_key, EngineContext};
use crate::crypto::key_derivation::KEY_LEN;
use crate::crypto::CryptoError;
use crate::crypto::signature::{
    compute_signature, factor_keys, offline_signature_base, online_signature_base,
    signatures_match, SignatureType,
};
use crate::encoding;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    NonPersonalizedOfflinePayloadRequest, OfflinePayloadResponse,
    PersonalizedOfflinePayloadRequest, VerifyEcdsaSignatureRequest, VerifyEcdsaSignatureResponse,
    VerifyOfflineSignatureRequest, VerifySignatureRequest, VerifySignatureResponse,
};
use crate::storage::{
    ActivationHistoryRecord, ActivationRecord, ActivationRepository, ActivationStatus,
    ApplicationRepository, AuditRepository, HistoryRepository, KeyValue, SignatureAuditRecord,
};

/// Key indicator for payloads signed with the activation's server key.
pub const KEY_INDICATOR_PERSONALIZED: &str = "1";
/// Key indicator for payloads signed with the application master key.
pub const KEY_INDICATOR_MASTER: &str = "0";

const OFFLINE_NONCE_LEN: usize = 16;

/// How the signed bytes are assembled from the request data.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SignatureBase<'a> {
    /// `data&applicationSecret`, for the version named by the key.
    Online { application_key: &'a str },
    /// `data&offline`.
    Offline,
}

pub(crate) struct SignatureCheck<'a> {
    pub activation_id: &'a str,
    pub data: &'a str,
    pub signature: &'a str,
    pub signature_type: SignatureType,
    pub base: SignatureBase<'a>,
    pub additional_info: Vec<KeyValue>,
}

pub(crate) struct VerificationOutcome {
    pub response: VerifySignatureResponse,
    /// Counter value the signature was checked against.
    pub counter_used: u64,
    pub master_secret: [u8; KEY_LEN],
}

#[derive(Clone)]
pub struct SignatureEngine {
    ctx: Arc<EngineContext>,
}

impl SignatureEngine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub fn verify(&self, request: &VerifySignatureRequest) -> ServiceResult<VerifySignatureResponse> {
        let outcome = self.check(SignatureCheck {
            activation_id: &request.activation_id,
            data: &request.data,
            signature: &request.signature,
            signature_type: request.signature_type,
            base: SignatureBase::Online {
                application_key: &request.application_key,
            },
            additional_info: Vec::new(),
        })?;
        Ok(outcome.response)
    }

    pub fn verify_offline(
        &self,
        request: &VerifyOfflineSignatureRequest,
    ) -> ServiceResult<VerifySignatureResponse> {
        if !request.signature_type.allowed_offline() {
            return Err(ServiceError::InvalidInputFormat(format!(
                "{} is not allowed for offline signatures",
                request.signature_type
            )));
        }
        let outcome = self.check(SignatureCheck {
            activation_id: &request.activation_id,
            data: &request.data,
            signature: &request.signature,
            signature_type: request.signature_type,
            base: SignatureBase::Offline,
            additional_info: Vec::new(),
        })?;
        Ok(outcome.response)
    }

    /// Verify a signature and record the attempt.
    ///
    /// Runs under the activation row lock: the counter read, the comparison
    /// and the counter/attempt update commit as one step.
    pub(crate) fn check(&self, check: SignatureCheck<'_>) -> ServiceResult<VerificationOutcome> {
        let crypto = self.ctx.crypto();
        let _row = self.ctx.store.lock_row(check.activation_id)?;
        let now = Utc::now();
        let mut record = self
            .ctx
            .load_activation(check.activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;

        if record.effective_status(now) != ActivationStatus::Active {
            let audit = SignatureAuditRecord::new(
                &record,
                record.counter,
                check.signature_type,
                check.signature,
                check.data,
                false,
                "activation is not active",
            )
            .with_additional_info(check.additional_info);
            let uow = self.ctx.store.write()?;
            AuditRepository::new(&uow).append(&audit)?;
            uow.commit()?;
            tracing::warn!(
                activation_id = check.activation_id,
                status = record.effective_status(now).as_str(),
                "Signature presented for inactive activation"
            );
            return Err(ServiceError::ActivationNotFound);
        }

        let master_secret = self.ctx.activation_master_secret(&record)?;
        let signed = match check.base {
            SignatureBase::Online { application_key } => self
                .application_secret(application_key, &record)?
                .map(|secret| online_signature_base(check.data, &secret)),
            SignatureBase::Offline => Some(offline_signature_base(check.data)),
        };

        let counter_used = record.counter;
        let (valid, note) = match signed {
            Some(signed) => {
                let keys = factor_keys(crypto, &master_secret, check.signature_type)?;
                let expected = compute_signature(crypto, signed.as_bytes(), &keys, counter_used)?;
                if signatures_match(&expected, check.signature) {
                    (true, "signature verified")
                } else {
                    (false, "signature mismatch")
                }
            }
            None => (false, "application version not supported"),
        };

        let mut blocked = false;
        if valid {
            record.counter += 1;
            record.failed_attempts = 0;
        } else {
            record.failed_attempts += 1;
            if record.failed_attempts >= record.max_failed_attempts {
                record.status = ActivationStatus::Blocked;
                record.blocked_reason = Some(BLOCKED_REASON_MAX_FAILED_ATTEMPTS.to_string());
                blocked = true;
            }
        }
        record.last_used_at = now;

        let audit = SignatureAuditRecord::new(
            &record,
            counter_used,
            check.signature_type,
            check.signature,
            check.data,
            valid,
            note,
        )
        .with_additional_info(check.additional_info);

        let uow = self.ctx.store.write()?;
        ActivationRepository::new(&uow).put(&record)?;
        if blocked {
            HistoryRepository::new(&uow).append(&ActivationHistoryRecord::of(&record, now))?;
        }
        AuditRepository::new(&uow).append(&audit)?;
        uow.commit()?;

        if blocked {
            tracing::warn!(
                activation_id = check.activation_id,
                failed_attempts = record.failed_attempts,
                "Activation blocked after too many failed signatures"
            );
        } else if !valid {
            tracing::info!(
                activation_id = check.activation_id,
                remaining_attempts = record.remaining_attempts(),
                note,
                "Signature rejected"
            );
        }

        Ok(VerificationOutcome {
            response: verdict(&record, valid, check.signature_type),
            counter_used,
            master_secret,
        })
    }

    /// Secret of a supported version that belongs to the activation's application.
    fn application_secret(
        &self,
        application_key: &str,
        record: &ActivationRecord,
    ) -> ServiceResult<Option<String>> {
        let uow = self.ctx.store.read()?;
        Ok(ApplicationRepository::new(&uow)
            .get_version(application_key)?
            .filter(|v| v.supported && v.application_id == record.application_id)
            .map(|v| v.application_secret))
    }

    // =========================================================================
    // Offline payloads
    // =========================================================================

    pub fn personalized_offline_payload(
        &self,
        request: &PersonalizedOfflinePayloadRequest,
    ) -> ServiceResult<OfflinePayloadResponse> {
        let record = self
            .ctx
            .load_activation(&request.activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;
        if record.effective_status(Utc::now()) != ActivationStatus::Active {
            return Err(ServiceError::ActivationInWrongState);
        }

        let private_key = self
            .ctx
            .key_storage()
            .recover(&record.server_private_key, &record.user_id, &record.activation_id)
            .map_err(|e| {
                tracing::error!(
                    activation_id = %record.activation_id,
                    error = %e,
                    "Unable to recover server private key"
                );
                ServiceError::UnableToComputeSignature
            })?;
        self.offline_payload(&private_key, &request.data, KEY_INDICATOR_PERSONALIZED)
    }

    pub fn non_personalized_offline_payload(
        &self,
        request: &NonPersonalizedOfflinePayloadRequest,
    ) -> ServiceResult<OfflinePayloadResponse> {
        {
            let uow = self.ctx.store.read()?;
            ApplicationRepository::new(&uow)
                .get(request.application_id)?
                .ok_or(ServiceError::ApplicationNotFound)?;
        }
        let master = self.ctx.master_key_pair(request.application_id)?;
        let private_key = encoding::decode(&master.private_key).map_err(|_| {
            tracing::error!(
                application_id = request.application_id,
                "Stored master private key is not valid base64"
            );
            ServiceError::UnableToComputeSignature
        })?;
        self.offline_payload(&private_key, &request.data, KEY_INDICATOR_MASTER)
    }

    /// `data\nnonce\n{indicator}` followed by the base64 ECDSA signature of
    /// exactly those bytes.
    fn offline_payload(
        &self,
        private_key: &[u8],
        data: &str,
        key_indicator: &str,
    ) -> ServiceResult<OfflinePayloadResponse> {
        let unable = |e: CryptoError| {
            tracing::error!(error = %e, "Unable to sign offline payload");
            ServiceError::UnableToComputeSignature
        };
        let crypto = self.ctx.crypto();
        let nonce = encoding::encode(&crypto.random_bytes(OFFLINE_NONCE_LEN).map_err(unable)?);
        let signed = format!("{data}\n{nonce}\n{key_indicator}");
        let signature = crypto
            .ecdsa_sign(private_key, signed.as_bytes())
            .map_err(unable)?;
        Ok(OfflinePayloadResponse {
            offline_data: format!("{signed}{}", encoding::encode(&signature)),
            nonce,
        })
    }

    // =========================================================================
    // Device ECDSA
    // =========================================================================

    /// Check an ECDSA signature made with the device private key. Inactive
    /// activations never verify.
    pub fn verify_ecdsa(
        &self,
        request: &VerifyEcdsaSignatureRequest,
    ) -> ServiceResult<VerifyEcdsaSignatureResponse> {
        let record = self
            .ctx
            .load_activation(&request.activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;

        let device_public_key = match record.device_public_key.as_deref() {
            Some(key) if record.effective_status(Utc::now()) == ActivationStatus::Active => key,
            _ => {
                return Ok(VerifyEcdsaSignatureResponse {
                    signature_valid: false,
                })
            }
        };

        let data = encoding::decode_field("data", &request.data)?;
        let signature = encoding::decode_field("signature", &request.signature)?;
        let signature_valid = self.ctx.crypto().ecdsa_verify(
            &stored_key(device_public_key)?,
            &data,
            &signature,
        )?;
        Ok(VerifyEcdsaSignatureResponse { signature_valid })
    }
}

fn verdict(
    record: &ActivationRecord,
    signature_valid: bool,
    signature_type: SignatureType,
) -> VerifySignatureResponse {
    VerifySignatureResponse {
        signature_valid,
        activation_id: record.activation_id.clone(),
        user_id: record.user_id.clone(),
        application_id: record.application_id,
        activation_status: record.status,
        blocked_reason: record.blocked_reason.clone(),
        remaining_attempts: record.remaining_attempts(),
        signature_type,
    }
}
