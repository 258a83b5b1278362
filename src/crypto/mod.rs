// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Cryptographic Provider
//!
//! The protocol engines never touch curve or cipher implementations directly.
//! They go through [`CryptoProvider`], which converts raw byte encodings into
//! key objects and performs the primitive operations:
//!
//! | Operation | Primitive |
//! |-----------|-----------|
//! | key agreement | ECDH on NIST P-256 (x-coordinate, 32 bytes) |
//! | asymmetric signatures | ECDSA P-256 / SHA-256, DER encoded |
//! | MAC | HMAC-SHA256 |
//! | password KDF | PBKDF2-HMAC-SHA256 |
//! | authenticated encryption | AES-GCM (128 or 256 bit key by length) |
//!
//! Public keys are SEC1 points (compressed or uncompressed on input,
//! uncompressed on output); private keys are 32-byte big-endian scalars.

pub mod key_derivation;
pub mod key_storage;
pub mod signature;

use std::num::NonZeroU32;

use hmac::{Hmac, Mac};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use ring::aead;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

/// AES-GCM nonce length in bytes.
pub const AEAD_NONCE_LEN: usize = 12;

/// Errors raised by the cryptographic provider.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid public key encoding")]
    InvalidPublicKey,

    #[error("invalid private key encoding")]
    InvalidPrivateKey,

    #[error("invalid symmetric key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("authenticated encryption failed")]
    Encryption,

    #[error("authenticated decryption failed")]
    Decryption,

    #[error("sealed payload too short: {0} bytes")]
    TruncatedPayload(usize),

    #[error("secure random generator failure")]
    Random,
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Raw EC key pair: 32-byte private scalar and SEC1 uncompressed public point.
#[derive(Clone)]
pub struct KeyPair {
    pub private_key: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key.len())
            .finish()
    }
}

/// Key conversion and primitive operations consumed by the protocol engines.
pub trait CryptoProvider: Send + Sync {
    /// Generate a fresh EC key pair.
    fn generate_key_pair(&self) -> CryptoResult<KeyPair>;

    /// Check that the bytes decode to a valid curve point.
    fn validate_public_key(&self, public_key: &[u8]) -> CryptoResult<()>;

    /// ECDH shared secret (x-coordinate) between a private and a public key.
    fn ecdh(&self, private_key: &[u8], public_key: &[u8]) -> CryptoResult<[u8; 32]>;

    /// DER encoded ECDSA signature over `data`.
    fn ecdsa_sign(&self, private_key: &[u8], data: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Verify a DER encoded ECDSA signature. An unparseable signature is a
    /// mismatch, not an error; an unparseable public key is an error.
    fn ecdsa_verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> CryptoResult<bool>;

    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> CryptoResult<[u8; 32]>;

    fn sha256(&self, data: &[u8]) -> [u8; 32];

    fn pbkdf2_sha256(
        &self,
        secret: &[u8],
        salt: &[u8],
        iterations: u32,
        out_len: usize,
    ) -> CryptoResult<Vec<u8>>;

    /// AES-GCM seal; returns `ciphertext || tag`.
    fn seal(
        &self,
        key: &[u8],
        nonce: &[u8; AEAD_NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> CryptoResult<Vec<u8>>;

    /// AES-GCM open of `ciphertext || tag`.
    fn open(
        &self,
        key: &[u8],
        nonce: &[u8; AEAD_NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> CryptoResult<Vec<u8>>;

    fn random_bytes(&self, len: usize) -> CryptoResult<Vec<u8>>;
}

/// Seal with a fresh random nonce. Output layout: `nonce || ciphertext || tag`.
pub fn seal_with_random_nonce(
    crypto: &dyn CryptoProvider,
    key: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> CryptoResult<Vec<u8>> {
    let nonce = random_nonce(crypto)?;
    let sealed = crypto.seal(key, &nonce, aad, plaintext)?;
    let mut out = Vec::with_capacity(AEAD_NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Inverse of [`seal_with_random_nonce`].
pub fn open_with_prefixed_nonce(
    crypto: &dyn CryptoProvider,
    key: &[u8],
    aad: &[u8],
    payload: &[u8],
) -> CryptoResult<Vec<u8>> {
    if payload.len() < AEAD_NONCE_LEN {
        return Err(CryptoError::TruncatedPayload(payload.len()));
    }
    let (nonce_bytes, sealed) = payload.split_at(AEAD_NONCE_LEN);
    let mut nonce = [0u8; AEAD_NONCE_LEN];
    nonce.copy_from_slice(nonce_bytes);
    crypto.open(key, &nonce, aad, sealed)
}

fn random_nonce(crypto: &dyn CryptoProvider) -> CryptoResult<[u8; AEAD_NONCE_LEN]> {
    let bytes = crypto.random_bytes(AEAD_NONCE_LEN)?;
    let mut nonce = [0u8; AEAD_NONCE_LEN];
    nonce.copy_from_slice(&bytes);
    Ok(nonce)
}

/// [`CryptoProvider`] backed by `p256` (curve operations), `ring`
/// (randomness, AES-GCM, PBKDF2) and `hmac`/`sha2`.
pub struct P256CryptoProvider {
    rng: SystemRandom,
}

impl P256CryptoProvider {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    fn aead_key(key: &[u8]) -> CryptoResult<aead::LessSafeKey> {
        let algorithm = match key.len() {
            16 => &aead::AES_128_GCM,
            32 => &aead::AES_256_GCM,
            other => return Err(CryptoError::InvalidKeyLength(other)),
        };
        let unbound = aead::UnboundKey::new(algorithm, key)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        Ok(aead::LessSafeKey::new(unbound))
    }
}

impl Default for P256CryptoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoProvider for P256CryptoProvider {
    fn generate_key_pair(&self) -> CryptoResult<KeyPair> {
        let secret = SecretKey::random(&mut OsRng);
        let public_key = secret.public_key().to_encoded_point(false).as_bytes().to_vec();
        Ok(KeyPair {
            private_key: secret.to_bytes().to_vec(),
            public_key,
        })
    }

    fn validate_public_key(&self, public_key: &[u8]) -> CryptoResult<()> {
        PublicKey::from_sec1_bytes(public_key)
            .map(|_| ())
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    fn ecdh(&self, private_key: &[u8], public_key: &[u8]) -> CryptoResult<[u8; 32]> {
        let secret = SecretKey::from_slice(private_key).map_err(|_| CryptoError::InvalidPrivateKey)?;
        let public =
            PublicKey::from_sec1_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
        let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
        let mut out = [0u8; 32];
        out.copy_from_slice(shared.raw_secret_bytes());
        Ok(out)
    }

    fn ecdsa_sign(&self, private_key: &[u8], data: &[u8]) -> CryptoResult<Vec<u8>> {
        let key = SigningKey::from_slice(private_key).map_err(|_| CryptoError::InvalidPrivateKey)?;
        let signature: Signature = key.sign(data);
        Ok(signature.to_der().as_bytes().to_vec())
    }

    fn ecdsa_verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> CryptoResult<bool> {
        let key =
            VerifyingKey::from_sec1_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
        let Ok(signature) = Signature::from_der(signature) else {
            return Ok(false);
        };
        Ok(key.verify(data, &signature).is_ok())
    }

    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> CryptoResult<[u8; 32]> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        mac.update(data);
        let digest = mac.finalize().into_bytes();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Ok(out)
    }

    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    fn pbkdf2_sha256(
        &self,
        secret: &[u8],
        salt: &[u8],
        iterations: u32,
        out_len: usize,
    ) -> CryptoResult<Vec<u8>> {
        let iterations = NonZeroU32::new(iterations).ok_or(CryptoError::InvalidKeyLength(0))?;
        let mut out = vec![0u8; out_len];
        ring::pbkdf2::derive(
            ring::pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            salt,
            secret,
            &mut out,
        );
        Ok(out)
    }

    fn seal(
        &self,
        key: &[u8],
        nonce: &[u8; AEAD_NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let key = Self::aead_key(key)?;
        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(
            aead::Nonce::assume_unique_for_key(*nonce),
            aead::Aad::from(aad),
            &mut in_out,
        )
        .map_err(|_| CryptoError::Encryption)?;
        Ok(in_out)
    }

    fn open(
        &self,
        key: &[u8],
        nonce: &[u8; AEAD_NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let key = Self::aead_key(key)?;
        let mut in_out = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(
                aead::Nonce::assume_unique_for_key(*nonce),
                aead::Aad::from(aad),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Decryption)?;
        Ok(plaintext.to_vec())
    }

    fn random_bytes(&self, len: usize) -> CryptoResult<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.rng.fill(&mut out).map_err(|_| CryptoError::Random)?;
        Ok(out)
    }
}
