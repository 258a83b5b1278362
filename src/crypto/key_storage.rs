// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! At-rest protection of activation server private keys.
//!
//! The stored value records the mode it was written with, so records written
//! before a master database key was configured stay readable afterwards.

use serde::{Deserialize, Serialize};

use super::{open_with_prefixed_nonce, seal_with_random_nonce, CryptoError, CryptoProvider};
use crate::encoding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyEncryptionMode {
    NoEncryption,
    AesGcm,
}

/// Server private key as persisted: base64 value plus the mode it was written with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerPrivateKey {
    pub mode: KeyEncryptionMode,
    pub value: String,
}

#[derive(Debug, thiserror::Error)]
pub enum KeyStorageError {
    #[error("master database encryption key is not configured")]
    MissingMasterKey,

    #[error("stored private key is not valid base64")]
    Encoding,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Encrypts and decrypts server private keys for one master database key.
pub struct KeyStorage<'a> {
    crypto: &'a dyn CryptoProvider,
    master_db_key: Option<&'a [u8]>,
}

impl<'a> KeyStorage<'a> {
    pub fn new(crypto: &'a dyn CryptoProvider, master_db_key: Option<&'a [u8]>) -> Self {
        Self {
            crypto,
            master_db_key,
        }
    }

    /// Protect a private key with the strongest configured mode.
    pub fn protect(
        &self,
        private_key: &[u8],
        user_id: &str,
        activation_id: &str,
    ) -> Result<ServerPrivateKey, KeyStorageError> {
        let Some(master) = self.master_db_key else {
            return Ok(ServerPrivateKey {
                mode: KeyEncryptionMode::NoEncryption,
                value: encoding::encode(private_key),
            });
        };
        let key = self.record_key(master, user_id, activation_id)?;
        let sealed =
            seal_with_random_nonce(self.crypto, &key, activation_id.as_bytes(), private_key)?;
        Ok(ServerPrivateKey {
            mode: KeyEncryptionMode::AesGcm,
            value: encoding::encode(&sealed),
        })
    }

    /// Recover the raw private key according to the stored mode.
    pub fn recover(
        &self,
        stored: &ServerPrivateKey,
        user_id: &str,
        activation_id: &str,
    ) -> Result<Vec<u8>, KeyStorageError> {
        let raw = encoding::decode(&stored.value).map_err(|_| KeyStorageError::Encoding)?;
        match stored.mode {
            KeyEncryptionMode::NoEncryption => Ok(raw),
            KeyEncryptionMode::AesGcm => {
                let master = self.master_db_key.ok_or(KeyStorageError::MissingMasterKey)?;
                let key = self.record_key(master, user_id, activation_id)?;
                Ok(open_with_prefixed_nonce(
                    self.crypto,
                    &key,
                    activation_id.as_bytes(),
                    &raw,
                )?)
            }
        }
    }

    /// Per-record key bound to the owning user and activation. The user id is
    /// length-prefixed so the field boundary is unambiguous.
    fn record_key(
        &self,
        master: &[u8],
        user_id: &str,
        activation_id: &str,
    ) -> Result<[u8; 32], KeyStorageError> {
        let mut binding = Vec::with_capacity(8 + user_id.len() + activation_id.len());
        binding.extend_from_slice(&(user_id.len() as u64).to_be_bytes());
        binding.extend_from_slice(user_id.as_bytes());
        binding.extend_from_slice(activation_id.as_bytes());
        Ok(self.crypto.hmac_sha256(master, &binding)?)
    }
}
