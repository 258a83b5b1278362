// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Lightweight tokens.
//!
//! A token is a random id and secret issued to an active device. The device
//! proves possession per request with an HMAC over a fresh nonce and its
//! timestamp instead of a full multi-factor signature.

use std::sync::Arc;

use chrono::Utc;
use p256::elliptic_curve::subtle::ConstantTimeEq;
use uuid::Uuid;

use super::{stored_key, EngineContext};
use crate::crypto::signature::SignatureType;
use crate::crypto::CryptoProvider;
use crate::encoding;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    CreateTokenRequest, CreateTokenResponse, RemoveTokenRequest, RemoveTokenResponse,
    ValidateTokenRequest, ValidateTokenResponse,
};
use crate::storage::{ActivationStatus, StoredToken, TokenRepository};

pub const TOKEN_SECRET_LEN: usize = 16;

#[derive(Clone)]
pub struct TokenEngine {
    ctx: Arc<EngineContext>,
}

impl TokenEngine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub fn create(&self, request: &CreateTokenRequest) -> ServiceResult<CreateTokenResponse> {
        let record = self
            .ctx
            .load_activation(&request.activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;
        if record.effective_status(Utc::now()) != ActivationStatus::Active {
            return Err(ServiceError::ActivationInWrongState);
        }

        let token = StoredToken {
            token_id: Uuid::new_v4().to_string(),
            token_secret: encoding::encode(&self.ctx.crypto().random_bytes(TOKEN_SECRET_LEN)?),
            activation_id: record.activation_id,
            signature_type: request.signature_type.unwrap_or(SignatureType::Possession),
            created_at: Utc::now(),
        };
        let uow = self.ctx.store.write()?;
        TokenRepository::new(&uow).put(&token)?;
        uow.commit()?;

        tracing::info!(activation_id = %token.activation_id, token_id = %token.token_id, "Token created");
        Ok(CreateTokenResponse {
            token_id: token.token_id,
            token_secret: token.token_secret,
        })
    }

    /// Check a token digest. Unknown tokens and tokens of inactive
    /// activations are reported as invalid, not as errors.
    pub fn validate(&self, request: &ValidateTokenRequest) -> ServiceResult<ValidateTokenResponse> {
        let nonce = encoding::decode_field("nonce", &request.nonce)?;
        let presented = encoding::decode_field("tokenDigest", &request.token_digest)?;

        let token = {
            let uow = self.ctx.store.read()?;
            TokenRepository::new(&uow).get(&request.token_id)?
        };
        let Some(token) = token else {
            return Ok(ValidateTokenResponse::invalid());
        };
        let Some(record) = self
            .ctx
            .load_activation(&token.activation_id)?
            .filter(|r| r.effective_status(Utc::now()) == ActivationStatus::Active)
        else {
            return Ok(ValidateTokenResponse::invalid());
        };

        let expected = token_digest(
            self.ctx.crypto(),
            &stored_key(&token.token_secret)?,
            &nonce,
            request.timestamp,
        )?;
        if !bool::from(expected.as_slice().ct_eq(presented.as_slice())) {
            tracing::info!(token_id = %token.token_id, "Token digest mismatch");
            return Ok(ValidateTokenResponse::invalid());
        }

        Ok(ValidateTokenResponse {
            token_valid: true,
            activation_id: Some(record.activation_id),
            user_id: Some(record.user_id),
            application_id: Some(record.application_id),
            signature_type: Some(token.signature_type),
        })
    }

    pub fn remove(&self, request: &RemoveTokenRequest) -> ServiceResult<RemoveTokenResponse> {
        let uow = self.ctx.store.write()?;
        let tokens = TokenRepository::new(&uow);
        let removed = match tokens.get(&request.token_id)? {
            Some(token)
                if request
                    .activation_id
                    .as_deref()
                    .is_none_or(|owner| owner == token.activation_id) =>
            {
                tokens.remove(&token.token_id)?
            }
            _ => false,
        };
        uow.commit()?;
        Ok(RemoveTokenResponse { removed })
    }
}

/// `HMAC-SHA256(secret, nonce || "&" || timestamp)`.
pub fn token_digest(
    crypto: &dyn CryptoProvider,
    secret: &[u8],
    nonce: &[u8],
    timestamp: i64,
) -> ServiceResult<[u8; 32]> {
    let mut data = Vec::with_capacity(nonce.len() + 21);
    data.extend_from_slice(nonce);
    data.push(b'&');
    data.extend_from_slice(timestamp.to_string().as_bytes());
    Ok(crypto.hmac_sha256(secret, &data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit::TestEnv;
    use crate::models::{ActivationIdRequest, BlockActivationRequest};

    fn validate(env: &TestEnv, token: &CreateTokenResponse, timestamp: i64) -> ValidateTokenResponse {
        let nonce = [9u8; 16];
        let secret = encoding::decode(&token.token_secret).unwrap();
        let digest = token_digest(env.crypto.as_ref(), &secret, &nonce, timestamp).unwrap();
        env.service
            .validate_token(ValidateTokenRequest {
                token_id: token.token_id.clone(),
                nonce: encoding::encode(&nonce),
                timestamp,
                token_digest: encoding::encode(&digest),
            })
            .unwrap()
    }

    fn create(env: &TestEnv, activation_id: &str) -> ServiceResult<CreateTokenResponse> {
        env.service.create_token(CreateTokenRequest {
            activation_id: activation_id.to_string(),
            signature_type: Some(SignatureType::PossessionKnowledge),
        })
    }

    #[test]
    fn issued_token_validates() {
        let env = TestEnv::new();
        let device = env.paired_device("u1");
        let token = create(&env, &device.activation_id).unwrap();

        let response = validate(&env, &token, 1_700_000_000_000);
        assert!(response.token_valid);
        assert_eq!(response.activation_id.as_deref(), Some(device.activation_id.as_str()));
        assert_eq!(response.signature_type, Some(SignatureType::PossessionKnowledge));
    }

    #[test]
    fn wrong_digest_is_invalid() {
        let env = TestEnv::new();
        let device = env.paired_device("u1");
        let token = create(&env, &device.activation_id).unwrap();

        let response = env
            .service
            .validate_token(ValidateTokenRequest {
                token_id: token.token_id.clone(),
                nonce: encoding::encode(&[1u8; 16]),
                timestamp: 1,
                token_digest: encoding::encode(&[0u8; 32]),
            })
            .unwrap();
        assert!(!response.token_valid);
        assert!(response.activation_id.is_none());
    }

    #[test]
    fn blocked_activation_invalidates_tokens() {
        let env = TestEnv::new();
        let device = env.paired_device("u1");
        let token = create(&env, &device.activation_id).unwrap();

        env.service
            .block_activation(BlockActivationRequest {
                activation_id: device.activation_id.clone(),
                reason: None,
            })
            .unwrap();
        assert!(!validate(&env, &token, 42).token_valid);

        env.service
            .unblock_activation(ActivationIdRequest {
                activation_id: device.activation_id.clone(),
            })
            .unwrap();
        assert!(validate(&env, &token, 42).token_valid);
    }

    #[test]
    fn create_requires_active_activation() {
        let env = TestEnv::new();
        let init = env.init("u1");
        assert!(matches!(
            create(&env, &init.activation_id),
            Err(ServiceError::ActivationInWrongState)
        ));
        assert!(matches!(
            create(&env, "missing"),
            Err(ServiceError::ActivationNotFound)
        ));
    }

    #[test]
    fn remove_checks_owner() {
        let env = TestEnv::new();
        let device = env.paired_device("u1");
        let token = create(&env, &device.activation_id).unwrap();

        let foreign = env
            .service
            .remove_token(RemoveTokenRequest {
                token_id: token.token_id.clone(),
                activation_id: Some("someone-else".into()),
            })
            .unwrap();
        assert!(!foreign.removed);

        let own = env
            .service
            .remove_token(RemoveTokenRequest {
                token_id: token.token_id.clone(),
                activation_id: Some(device.activation_id.clone()),
            })
            .unwrap();
        assert!(own.removed);
        assert!(!validate(&env, &token, 42).token_valid);
    }

    #[test]
    fn malformed_nonce_is_rejected() {
        let env = TestEnv::new();
        let err = env
            .service
            .validate_token(ValidateTokenRequest {
                token_id: "t".into(),
                nonce: "***".into(),
                timestamp: 0,
                token_digest: encoding::encode(&[0u8; 32]),
            })
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInputFormat(_)));
    }
}
