// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Device-side half of the protocol and a throwaway service for engine tests.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::activation::{ACTIVATION_NONCE_LEN, OTP_PBKDF2_ITERATIONS};
use super::{ApplicationDetail, AuthService};
use crate::config::{ApplicationBootstrap, EngineConfig};
use crate::crypto::key_derivation::{self, KEY_LEN};
use crate::crypto::signature::{
    compute_signature, factor_keys, offline_signature_base, online_signature_base, SignatureType,
};
use crate::crypto::{CryptoProvider, KeyPair, P256CryptoProvider, AEAD_NONCE_LEN};
use crate::encoding;
use crate::models::{
    ActivationIdRequest, CreateActivationRequest, InitActivationRequest, InitActivationResponse,
    PairingResponse, PrepareActivationRequest,
};
use crate::storage::{ApplicationRepository, Store};

pub(crate) struct TestEnv {
    pub service: AuthService,
    pub store: Arc<Store>,
    pub crypto: Arc<P256CryptoProvider>,
    pub app: ApplicationDetail,
    _dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_master_db_key() -> Self {
        Self::with_config(EngineConfig {
            master_db_encryption_key: Some(vec![0x42; 32]),
            ..EngineConfig::default()
        })
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("auth.redb"), Duration::from_secs(2)).unwrap());
        let crypto = Arc::new(P256CryptoProvider::new());
        let service = AuthService::new(Arc::clone(&store), crypto.clone(), config);
        let app = service
            .applications()
            .ensure_application(&ApplicationBootstrap {
                name: "test-app".to_string(),
                ..ApplicationBootstrap::default()
            })
            .unwrap();
        Self {
            service,
            store,
            crypto,
            app,
            _dir: dir,
        }
    }

    pub fn app_key(&self) -> &str {
        &self.app.versions[0].application_key
    }

    pub fn app_secret(&self) -> &str {
        &self.app.versions[0].application_secret
    }

    /// An application row with no master key pair.
    pub fn create_application_without_master_key(&self, name: &str) -> u64 {
        let uow = self.store.write().unwrap();
        let application = ApplicationRepository::new(&uow).create(name).unwrap();
        uow.commit().unwrap();
        application.id
    }

    pub fn application_signature(&self, parts: &[&str]) -> String {
        let secret = encoding::decode(self.app_secret()).unwrap();
        let mac = self.crypto.hmac_sha256(&secret, parts.join("&").as_bytes()).unwrap();
        encoding::encode(&mac)
    }

    pub fn init(&self, user_id: &str) -> InitActivationResponse {
        self.init_request(user_id, None)
    }

    pub fn init_with_max_failures(&self, user_id: &str, max: u64) -> InitActivationResponse {
        self.init_request(user_id, Some(max))
    }

    fn init_request(&self, user_id: &str, max_failure_count: Option<u64>) -> InitActivationResponse {
        self.service
            .init_activation(InitActivationRequest {
                application_id: self.app.application_id,
                user_id: user_id.to_string(),
                max_failure_count,
                timestamp_activation_expire: None,
            })
            .unwrap()
    }

    pub fn prepare_request(&self, init: &InitActivationResponse, device: &Device) -> PrepareActivationRequest {
        let envelope = device.seal_public_key(
            &self.app.master_public_key,
            &init.activation_id_short,
            &init.activation_otp,
        );
        let application_signature = self.application_signature(&[
            &init.activation_id_short,
            &envelope.nonce,
            &envelope.encrypted_public_key,
            self.app_key(),
        ]);
        PrepareActivationRequest {
            activation_id_short: init.activation_id_short.clone(),
            activation_name: Some("test phone".to_string()),
            extras: None,
            activation_nonce: envelope.nonce,
            ephemeral_public_key: envelope.ephemeral_public_key,
            encrypted_device_public_key: envelope.encrypted_public_key,
            application_key: self.app_key().to_string(),
            application_signature,
        }
    }

    pub fn create_request(
        &self,
        user_id: &str,
        identity: &str,
        otp: &str,
        device: &Device,
    ) -> CreateActivationRequest {
        let envelope = device.seal_public_key(&self.app.master_public_key, identity, otp);
        let application_signature = self.application_signature(&[
            identity,
            &envelope.nonce,
            &envelope.encrypted_public_key,
            self.app_key(),
        ]);
        CreateActivationRequest {
            user_id: user_id.to_string(),
            application_key: self.app_key().to_string(),
            identity: identity.to_string(),
            activation_otp: otp.to_string(),
            activation_name: Some("test phone".to_string()),
            extras: None,
            max_failure_count: None,
            timestamp_activation_expire: None,
            activation_nonce: envelope.nonce,
            ephemeral_public_key: envelope.ephemeral_public_key,
            encrypted_device_public_key: envelope.encrypted_public_key,
            application_signature,
        }
    }

    /// init → prepare → commit; the returned device is bound and ACTIVE.
    pub fn paired_device(&self, user_id: &str) -> Device {
        self.pair(self.init(user_id))
    }

    pub fn paired_device_with_max_failures(&self, user_id: &str, max: u64) -> Device {
        self.pair(self.init_with_max_failures(user_id, max))
    }

    fn pair(&self, init: InitActivationResponse) -> Device {
        let mut device = Device::new(self.crypto.clone());
        let pairing = self
            .service
            .prepare_activation(self.prepare_request(&init, &device))
            .unwrap();
        device.bind(&pairing);
        self.service
            .commit_activation(ActivationIdRequest {
                activation_id: device.activation_id.clone(),
            })
            .unwrap();
        device
    }
}

pub(crate) struct SealedPublicKey {
    pub nonce: String,
    pub ephemeral_public_key: String,
    pub encrypted_public_key: String,
}

/// A simulated mobile device.
pub(crate) struct Device {
    crypto: Arc<P256CryptoProvider>,
    pub key_pair: KeyPair,
    pub activation_id: String,
    server_public_key: Vec<u8>,
}

impl Device {
    pub fn new(crypto: Arc<P256CryptoProvider>) -> Self {
        let key_pair = crypto.generate_key_pair().unwrap();
        Self {
            crypto,
            key_pair,
            activation_id: String::new(),
            server_public_key: Vec::new(),
        }
    }

    /// Double-encrypt the device public key the way a client does during pairing.
    pub fn seal_public_key(&self, master_public_key: &str, short_id: &str, otp: &str) -> SealedPublicKey {
        let crypto = self.crypto.as_ref();
        let nonce = crypto.random_bytes(ACTIVATION_NONCE_LEN).unwrap();
        let mut aead_nonce = [0u8; AEAD_NONCE_LEN];
        aead_nonce.copy_from_slice(&nonce[..AEAD_NONCE_LEN]);

        let inner_key = crypto
            .pbkdf2_sha256(otp.as_bytes(), short_id.as_bytes(), OTP_PBKDF2_ITERATIONS, KEY_LEN)
            .unwrap();
        let inner = crypto
            .seal(&inner_key, &aead_nonce, &[], &self.key_pair.public_key)
            .unwrap();

        let ephemeral = crypto.generate_key_pair().unwrap();
        let outer_key = key_derivation::master_secret(
            crypto,
            &ephemeral.private_key,
            &encoding::decode(master_public_key).unwrap(),
        )
        .unwrap();
        let outer = crypto.seal(&outer_key, &aead_nonce, &[], &inner).unwrap();

        SealedPublicKey {
            nonce: encoding::encode(&nonce),
            ephemeral_public_key: encoding::encode(&ephemeral.public_key),
            encrypted_public_key: encoding::encode(&outer),
        }
    }

    pub fn bind(&mut self, pairing: &PairingResponse) {
        self.activation_id = pairing.activation_id.clone();
        self.server_public_key = encoding::decode(&pairing.server_public_key).unwrap();
    }

    pub fn server_public_key(&self) -> &[u8] {
        &self.server_public_key
    }

    pub fn master_secret(&self) -> [u8; KEY_LEN] {
        key_derivation::master_secret(
            self.crypto.as_ref(),
            &self.key_pair.private_key,
            &self.server_public_key,
        )
        .unwrap()
    }

    pub fn transport_key(&self) -> [u8; KEY_LEN] {
        key_derivation::transport_key(self.crypto.as_ref(), &self.master_secret()).unwrap()
    }

    pub fn sign(&self, data: &str, application_secret: &str, signature_type: SignatureType, counter: u64) -> String {
        self.sign_bytes(&online_signature_base(data, application_secret), signature_type, counter)
    }

    pub fn sign_offline(&self, data: &str, signature_type: SignatureType, counter: u64) -> String {
        self.sign_bytes(&offline_signature_base(data), signature_type, counter)
    }

    fn sign_bytes(&self, signed: &str, signature_type: SignatureType, counter: u64) -> String {
        let crypto = self.crypto.as_ref();
        let keys = factor_keys(crypto, &self.master_secret(), signature_type).unwrap();
        compute_signature(crypto, signed.as_bytes(), &keys, counter).unwrap()
    }
}
