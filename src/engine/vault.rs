// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Vault unlock.
//!
//! A device keeps secrets encrypted under a vault key that only the server
//! can hand out. Unlocking is a regular signature check; on success the vault
//! key is returned sealed under a key tied to the counter the signature used.

use std::sync::Arc;

use super::signature::{SignatureBase, SignatureCheck, SignatureEngine};
use super::EngineContext;
use crate::crypto::key_derivation::{counter_key, derive_secret_key, transport_key, INDEX_ENCRYPTED_VAULT};
use crate::crypto::seal_with_random_nonce;
use crate::encoding;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{VaultUnlockRequest, VaultUnlockResponse};
use crate::storage::KeyValue;

/// Audit key carrying the caller's reason for the unlock.
pub const VAULT_UNLOCK_REASON_KEY: &str = "vault_unlock_reason";
pub const VAULT_UNLOCK_REASON_NOT_SPECIFIED: &str = "NOT_SPECIFIED";

#[derive(Clone)]
pub struct VaultEngine {
    ctx: Arc<EngineContext>,
    signatures: SignatureEngine,
}

impl VaultEngine {
    pub fn new(ctx: Arc<EngineContext>, signatures: SignatureEngine) -> Self {
        Self { ctx, signatures }
    }

    pub fn unlock(&self, request: VaultUnlockRequest) -> ServiceResult<VaultUnlockResponse> {
        if request.signature_type.is_single_factor() {
            tracing::warn!(
                activation_id = %request.activation_id,
                signature_type = %request.signature_type,
                "Vault unlock requires at least two factors"
            );
            return Err(ServiceError::InvalidSignature);
        }

        let reason = request
            .reason
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(VAULT_UNLOCK_REASON_NOT_SPECIFIED);
        let outcome = self.signatures.check(SignatureCheck {
            activation_id: &request.activation_id,
            data: &request.data,
            signature: &request.signature,
            signature_type: request.signature_type,
            base: SignatureBase::Online {
                application_key: &request.application_key,
            },
            additional_info: vec![KeyValue::new(VAULT_UNLOCK_REASON_KEY, reason)],
        })?;

        let verdict = outcome.response;
        let encrypted_vault_encryption_key = if verdict.signature_valid {
            let crypto = self.ctx.crypto();
            let vault_key = derive_secret_key(crypto, &outcome.master_secret, INDEX_ENCRYPTED_VAULT)?;
            let sealing_key = counter_key(
                crypto,
                &transport_key(crypto, &outcome.master_secret)?,
                outcome.counter_used,
            )?;
            let sealed = seal_with_random_nonce(
                crypto,
                &sealing_key,
                verdict.activation_id.as_bytes(),
                &vault_key,
            )?;
            tracing::info!(activation_id = %verdict.activation_id, reason, "Vault unlocked");
            Some(encoding::encode(&sealed))
        } else {
            None
        };

        Ok(VaultUnlockResponse {
            activation_id: verdict.activation_id,
            user_id: verdict.user_id,
            activation_status: verdict.activation_status,
            blocked_reason: verdict.blocked_reason,
            remaining_attempts: verdict.remaining_attempts,
            signature_valid: verdict.signature_valid,
            encrypted_vault_encryption_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::open_with_prefixed_nonce;
    use crate::crypto::signature::SignatureType;
    use crate::engine::testkit::TestEnv;
    use crate::models::SignatureAuditRequest;
    use chrono::{Duration as ChronoDuration, Utc};

    const DATA: &str = "POST&L3ZhdWx0L3VubG9jaw==&bm9uY2U=&";

    fn unlock(
        env: &TestEnv,
        activation_id: &str,
        signature: &str,
        signature_type: SignatureType,
        reason: Option<&str>,
    ) -> ServiceResult<VaultUnlockResponse> {
        env.service.vault_unlock(VaultUnlockRequest {
            activation_id: activation_id.to_string(),
            application_key: env.app_key().to_string(),
            signature: signature.to_string(),
            signature_type,
            data: DATA.to_string(),
            reason: reason.map(str::to_string),
        })
    }

    #[test]
    fn device_recovers_vault_key() {
        let env = TestEnv::new();
        let device = env.paired_device("u1");
        let signature = device.sign(DATA, env.app_secret(), SignatureType::PossessionKnowledge, 0);

        let response = unlock(&env, &device.activation_id, &signature, SignatureType::PossessionKnowledge, Some("PASSWORD_CHANGE")).unwrap();
        assert!(response.signature_valid);

        let crypto = env.crypto.as_ref();
        let sealing_key = counter_key(crypto, &device.transport_key(), 0).unwrap();
        let sealed = encoding::decode(&response.encrypted_vault_encryption_key.unwrap()).unwrap();
        let vault_key = open_with_prefixed_nonce(
            crypto,
            &sealing_key,
            device.activation_id.as_bytes(),
            &sealed,
        )
        .unwrap();
        let expected = derive_secret_key(crypto, &device.master_secret(), INDEX_ENCRYPTED_VAULT).unwrap();
        assert_eq!(vault_key, expected.to_vec());
    }

    #[test]
    fn single_factor_is_rejected_without_touching_counters() {
        let env = TestEnv::new();
        let device = env.paired_device("u1");
        let signature = device.sign(DATA, env.app_secret(), SignatureType::Possession, 0);

        let err = unlock(&env, &device.activation_id, &signature, SignatureType::Possession, None).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidSignature));

        let status = env
            .service
            .activation_status(crate::models::ActivationIdRequest {
                activation_id: device.activation_id.clone(),
            })
            .unwrap();
        assert_eq!(status.counter, 0);
        assert_eq!(status.failed_attempts, 0);
    }

    #[test]
    fn failed_unlock_returns_no_key() {
        let env = TestEnv::new();
        let device = env.paired_device("u1");
        let response = unlock(&env, &device.activation_id, "11111111-22222222", SignatureType::PossessionKnowledge, None).unwrap();
        assert!(!response.signature_valid);
        assert!(response.encrypted_vault_encryption_key.is_none());
        assert_eq!(response.remaining_attempts, 4);
    }

    #[test]
    fn reason_lands_in_audit() {
        let env = TestEnv::new();
        let device = env.paired_device("u1");
        let signature = device.sign(DATA, env.app_secret(), SignatureType::PossessionBiometry, 0);
        unlock(&env, &device.activation_id, &signature, SignatureType::PossessionBiometry, None).unwrap();

        let audit = env
            .service
            .signature_audit(SignatureAuditRequest {
                user_id: "u1".into(),
                application_id: None,
                timestamp_from: Utc::now() - ChronoDuration::hours(1),
                timestamp_to: Utc::now() + ChronoDuration::hours(1),
            })
            .unwrap();
        assert_eq!(audit.items.len(), 1);
        assert_eq!(
            audit.items[0].additional_info,
            vec![KeyValue::new(VAULT_UNLOCK_REASON_KEY, VAULT_UNLOCK_REASON_NOT_SPECIFIED)]
        );
    }
}
