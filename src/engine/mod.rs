// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Protocol Engines
//!
//! Each engine owns one slice of the protocol and receives its collaborators
//! (store, crypto provider, configuration) at construction through a shared
//! [`EngineContext`]. [`AuthService`] is the façade: one method per inbound
//! operation, each routed to exactly one engine.
//!
//! | Engine | Operations |
//! |--------|------------|
//! | [`ActivationEngine`] | init, prepare, create, commit, remove, block, unblock, status, list, history |
//! | [`SignatureEngine`] | online/offline verify, offline payloads, ECDSA verify |
//! | [`EncryptionEngine`] | personalized and non-personalized transport keys |
//! | [`VaultEngine`] | vault unlock |
//! | [`TokenEngine`] | create, validate, remove |
//! | [`AuditEngine`] | signature audit log |
//! | [`ApplicationEngine`] | application provisioning (library only) |
//!
//! Every operation is synchronous and runs at most one write unit of work.
//! Internal failures are logged and rewrapped as `UNKNOWN_ERROR` here, at the
//! operation boundary.

pub mod activation;
pub mod application;
pub mod audit;
pub mod encryption;
pub mod signature;
pub mod token;
pub mod vault;

#[cfg(test)]
pub(crate) mod testkit;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::crypto::key_derivation::{self, KEY_LEN};
use crate::crypto::key_storage::KeyStorage;
use crate::crypto::CryptoProvider;
use crate::encoding;
use crate::error::{ServiceError, ServiceResult};
use crate::models::*;
use crate::storage::{
    ActivationRecord, ActivationRepository, ApplicationRepository, StoredApplicationVersion,
    StoredMasterKeyPair, Store,
};

pub use activation::ActivationEngine;
pub use application::{ApplicationDetail, ApplicationEngine};
pub use audit::AuditEngine;
pub use encryption::EncryptionEngine;
pub use signature::SignatureEngine;
pub use token::TokenEngine;
pub use vault::VaultEngine;

/// Collaborators shared by every engine.
pub struct EngineContext {
    pub store: Arc<Store>,
    pub crypto: Arc<dyn CryptoProvider>,
    pub config: EngineConfig,
}

impl EngineContext {
    pub fn crypto(&self) -> &dyn CryptoProvider {
        self.crypto.as_ref()
    }

    pub fn key_storage(&self) -> KeyStorage<'_> {
        KeyStorage::new(
            self.crypto.as_ref(),
            self.config.master_db_encryption_key.as_deref(),
        )
    }

    /// Read an activation from a fresh snapshot.
    pub fn load_activation(&self, activation_id: &str) -> ServiceResult<Option<ActivationRecord>> {
        let uow = self.store.read()?;
        Ok(ActivationRepository::new(&uow).get(activation_id)?)
    }

    /// Supported application version for a key.
    pub fn supported_version(&self, application_key: &str) -> ServiceResult<StoredApplicationVersion> {
        let uow = self.store.read()?;
        match ApplicationRepository::new(&uow).get_version(application_key)? {
            Some(version) if version.supported => Ok(version),
            _ => Err(ServiceError::ApplicationNotFound),
        }
    }

    /// Newest master key pair of an application.
    pub fn master_key_pair(&self, application_id: u64) -> ServiceResult<StoredMasterKeyPair> {
        let uow = self.store.read()?;
        ApplicationRepository::new(&uow)
            .current_master_key_pair(application_id)?
            .ok_or(ServiceError::NoMasterServerKeyPair)
    }

    /// Shared master secret between the server key and the paired device key.
    pub fn activation_master_secret(&self, record: &ActivationRecord) -> ServiceResult<[u8; KEY_LEN]> {
        let Some(device_public_key) = record.device_public_key.as_deref() else {
            tracing::error!(activation_id = %record.activation_id, "Activation has no device public key");
            return Err(ServiceError::UnknownError);
        };
        let device_public_key = stored_key(device_public_key)?;
        let server_private_key = self.key_storage().recover(
            &record.server_private_key,
            &record.user_id,
            &record.activation_id,
        )?;
        Ok(key_derivation::master_secret(
            self.crypto(),
            &server_private_key,
            &device_public_key,
        )?)
    }
}

/// Decode a key the server stored itself; corruption is an internal failure.
pub(crate) fn stored_key(value: &str) -> ServiceResult<Vec<u8>> {
    encoding::decode(value).map_err(|_| {
        tracing::error!("Stored key is not valid base64");
        ServiceError::UnknownError
    })
}

/// Façade over all engines.
#[derive(Clone)]
pub struct AuthService {
    ctx: Arc<EngineContext>,
    activation: ActivationEngine,
    signature: SignatureEngine,
    encryption: EncryptionEngine,
    vault: VaultEngine,
    token: TokenEngine,
    audit: AuditEngine,
    application: ApplicationEngine,
}

impl AuthService {
    pub fn new(store: Arc<Store>, crypto: Arc<dyn CryptoProvider>, config: EngineConfig) -> Self {
        let ctx = Arc::new(EngineContext {
            store,
            crypto,
            config,
        });
        let signature = SignatureEngine::new(Arc::clone(&ctx));
        Self {
            activation: ActivationEngine::new(Arc::clone(&ctx)),
            vault: VaultEngine::new(Arc::clone(&ctx), signature.clone()),
            signature,
            encryption: EncryptionEngine::new(Arc::clone(&ctx)),
            token: TokenEngine::new(Arc::clone(&ctx)),
            audit: AuditEngine::new(Arc::clone(&ctx)),
            application: ApplicationEngine::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    /// Provisioning operations; not part of the network surface.
    pub fn applications(&self) -> &ApplicationEngine {
        &self.application
    }

    pub fn store_healthy(&self) -> bool {
        match self.ctx.store.health_check() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Store health check failed");
                false
            }
        }
    }

    // =========================================================================
    // Activation
    // =========================================================================

    pub fn init_activation(&self, request: InitActivationRequest) -> ServiceResult<InitActivationResponse> {
        run("InitActivationRequest", || self.activation.init(request))
    }

    pub fn prepare_activation(&self, request: PrepareActivationRequest) -> ServiceResult<PairingResponse> {
        run("PrepareActivationRequest", || self.activation.prepare(request))
    }

    pub fn create_activation(&self, request: CreateActivationRequest) -> ServiceResult<PairingResponse> {
        run("CreateActivationRequest", || self.activation.create(request))
    }

    pub fn commit_activation(&self, request: ActivationIdRequest) -> ServiceResult<CommitActivationResponse> {
        run("CommitActivationRequest", || self.activation.commit(&request.activation_id))
    }

    pub fn remove_activation(&self, request: ActivationIdRequest) -> ServiceResult<RemoveActivationResponse> {
        run("RemoveActivationRequest", || self.activation.remove(&request.activation_id))
    }

    pub fn block_activation(
        &self,
        request: BlockActivationRequest,
    ) -> ServiceResult<ActivationStatusChangeResponse> {
        run("BlockActivationRequest", || {
            self.activation
                .block(&request.activation_id, request.reason.as_deref())
        })
    }

    pub fn unblock_activation(
        &self,
        request: ActivationIdRequest,
    ) -> ServiceResult<ActivationStatusChangeResponse> {
        run("UnblockActivationRequest", || self.activation.unblock(&request.activation_id))
    }

    pub fn activation_status(&self, request: ActivationIdRequest) -> ServiceResult<ActivationStatusResponse> {
        run("GetActivationStatusRequest", || self.activation.status(&request.activation_id))
    }

    pub fn activation_list(&self, request: ActivationListRequest) -> ServiceResult<ActivationListResponse> {
        run("GetActivationListForUserRequest", || {
            self.activation.list(&request.user_id, request.application_id)
        })
    }

    pub fn activation_history(
        &self,
        request: ActivationHistoryRequest,
    ) -> ServiceResult<ActivationHistoryResponse> {
        run("ActivationHistoryRequest", || self.activation.history(&request))
    }

    // =========================================================================
    // Signatures
    // =========================================================================

    pub fn verify_signature(&self, request: VerifySignatureRequest) -> ServiceResult<VerifySignatureResponse> {
        run("VerifySignatureRequest", || self.signature.verify(&request))
    }

    pub fn verify_offline_signature(
        &self,
        request: VerifyOfflineSignatureRequest,
    ) -> ServiceResult<VerifySignatureResponse> {
        run("VerifyOfflineSignatureRequest", || self.signature.verify_offline(&request))
    }

    pub fn create_personalized_offline_payload(
        &self,
        request: PersonalizedOfflinePayloadRequest,
    ) -> ServiceResult<OfflinePayloadResponse> {
        run("CreatePersonalizedOfflineSignaturePayloadRequest", || {
            self.signature.personalized_offline_payload(&request)
        })
    }

    pub fn create_non_personalized_offline_payload(
        &self,
        request: NonPersonalizedOfflinePayloadRequest,
    ) -> ServiceResult<OfflinePayloadResponse> {
        run("CreateNonPersonalizedOfflineSignaturePayloadRequest", || {
            self.signature.non_personalized_offline_payload(&request)
        })
    }

    pub fn verify_ecdsa_signature(
        &self,
        request: VerifyEcdsaSignatureRequest,
    ) -> ServiceResult<VerifyEcdsaSignatureResponse> {
        run("VerifyECDSASignatureRequest", || self.signature.verify_ecdsa(&request))
    }

    pub fn signature_audit(&self, request: SignatureAuditRequest) -> ServiceResult<SignatureAuditResponse> {
        run("SignatureAuditRequest", || self.audit.list(&request))
    }

    // =========================================================================
    // Vault
    // =========================================================================

    pub fn vault_unlock(&self, request: VaultUnlockRequest) -> ServiceResult<VaultUnlockResponse> {
        run("VaultUnlockRequest", || self.vault.unlock(request))
    }

    // =========================================================================
    // Encryption
    // =========================================================================

    pub fn activation_encryption_key(
        &self,
        request: ActivationEncryptionKeyRequest,
    ) -> ServiceResult<ActivationEncryptionKeyResponse> {
        run("GetPersonalizedEncryptionKeyRequest", || {
            self.encryption.activation_key(&request)
        })
    }

    pub fn application_encryption_key(
        &self,
        request: ApplicationEncryptionKeyRequest,
    ) -> ServiceResult<ApplicationEncryptionKeyResponse> {
        run("GetNonPersonalizedEncryptionKeyRequest", || {
            self.encryption.application_key(&request)
        })
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    pub fn create_token(&self, request: CreateTokenRequest) -> ServiceResult<CreateTokenResponse> {
        run("CreateTokenRequest", || self.token.create(&request))
    }

    pub fn validate_token(&self, request: ValidateTokenRequest) -> ServiceResult<ValidateTokenResponse> {
        run("ValidateTokenRequest", || self.token.validate(&request))
    }

    pub fn remove_token(&self, request: RemoveTokenRequest) -> ServiceResult<RemoveTokenResponse> {
        run("RemoveTokenRequest", || self.token.remove(&request))
    }
}

/// Log the call and rewrap internal failures at the operation boundary.
fn run<T>(operation: &'static str, f: impl FnOnce() -> ServiceResult<T>) -> ServiceResult<T> {
    tracing::info!(operation, "Request received");
    match f() {
        Ok(response) => {
            tracing::info!(operation, "Request succeeded");
            Ok(response)
        }
        Err(e) => Err(e.at_boundary(operation)),
    }
}
