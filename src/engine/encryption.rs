// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transport encryption keys.
//!
//! A personalized key belongs to one activation and derives from its
//! transport key. A non-personalized key lets a client that has no activation
//! yet talk to the server: it derives from an ECDH between a client
//! ephemeral key and the application master key. Both are selected by a
//! 16-byte session index the client later sends back.

use std::sync::Arc;

use chrono::Utc;

use super::{stored_key, EngineContext};
use crate::crypto::key_derivation::{self, session_key, transport_key};
use crate::crypto::{CryptoError, CryptoProvider};
use crate::encoding;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    ActivationEncryptionKeyRequest, ActivationEncryptionKeyResponse,
    ApplicationEncryptionKeyRequest, ApplicationEncryptionKeyResponse,
};
use crate::storage::ActivationStatus;

pub const SESSION_INDEX_LEN: usize = 16;

#[derive(Clone)]
pub struct EncryptionEngine {
    ctx: Arc<EngineContext>,
}

impl EncryptionEngine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub fn activation_key(
        &self,
        request: &ActivationEncryptionKeyRequest,
    ) -> ServiceResult<ActivationEncryptionKeyResponse> {
        let crypto = self.ctx.crypto();
        let record = self
            .ctx
            .load_activation(&request.activation_id)?
            .filter(|r| r.effective_status(Utc::now()) == ActivationStatus::Active)
            .ok_or(ServiceError::ActivationNotFound)?;

        let master_secret = self.ctx.activation_master_secret(&record)?;
        let transport_key = transport_key(crypto, &master_secret)?;
        let index = session_index(crypto, request.session_index.as_deref())?;
        let key = session_key(crypto, &transport_key, &index)?;

        Ok(ActivationEncryptionKeyResponse {
            activation_id: record.activation_id,
            encryption_key: encoding::encode(&key),
            encryption_key_index: encoding::encode(&index),
        })
    }

    pub fn application_key(
        &self,
        request: &ApplicationEncryptionKeyRequest,
    ) -> ServiceResult<ApplicationEncryptionKeyResponse> {
        let crypto = self.ctx.crypto();
        let version = self.ctx.supported_version(&request.application_key)?;
        let master = self.ctx.master_key_pair(version.application_id)?;

        let ephemeral_public_key = encoding::decode(&request.ephemeral_public_key)
            .map_err(|_| ServiceError::InvalidKeyFormat)?;
        let shared = key_derivation::master_secret(
            crypto,
            &stored_key(&master.private_key)?,
            &ephemeral_public_key,
        )
        .map_err(|e| match e {
            CryptoError::InvalidPublicKey => ServiceError::InvalidKeyFormat,
            other => ServiceError::Crypto(other),
        })?;

        let index = session_index(crypto, request.session_index.as_deref())?;
        let key = session_key(crypto, &shared, &index)?;

        Ok(ApplicationEncryptionKeyResponse {
            application_key: version.application_key,
            application_id: version.application_id,
            encryption_key: encoding::encode(&key),
            encryption_key_index: encoding::encode(&index),
            ephemeral_public_key: request.ephemeral_public_key.clone(),
        })
    }
}

/// The caller's index when it decodes to exactly 16 bytes, a fresh random
/// one otherwise.
fn session_index(crypto: &dyn CryptoProvider, requested: Option<&str>) -> ServiceResult<Vec<u8>> {
    match requested.and_then(|value| encoding::decode(value).ok()) {
        Some(index) if index.len() == SESSION_INDEX_LEN => Ok(index),
        _ => Ok(crypto.random_bytes(SESSION_INDEX_LEN)?),
    }
}
