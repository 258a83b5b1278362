// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key schedule shared by every engine.
//!
//! All symmetric keys are 16 bytes. A 32-byte value (ECDH secret or HMAC
//! output) is reduced by folding its halves together with XOR.
//!
//! ```text
//! ECDH(server priv, device pub) ── reduce ──► master secret
//! master secret ── KDF(1|2|3) ──► possession / knowledge / biometry keys
//! master secret ── KDF(1000)  ──► transport key
//! master secret ── KDF(2000)  ──► vault encryption key
//! key ── HMAC(counter block) ── reduce ──► per-signature key
//! transport key ── HMAC(session index) ── reduce ──► session transport key
//! ```

use super::{CryptoProvider, CryptoResult};

pub const KEY_LEN: usize = 16;

pub const INDEX_POSSESSION: u64 = 1;
pub const INDEX_KNOWLEDGE: u64 = 2;
pub const INDEX_BIOMETRY: u64 = 3;
pub const INDEX_TRANSPORT: u64 = 1000;
pub const INDEX_ENCRYPTED_VAULT: u64 = 2000;

/// Fold a 32-byte value into 16 bytes.
pub fn reduce_32_to_16(input: &[u8; 32]) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = input[i] ^ input[i + KEY_LEN];
    }
    out
}

/// 16-byte big-endian block for an index or counter value.
pub fn index_block(value: u64) -> [u8; KEY_LEN] {
    let mut block = [0u8; KEY_LEN];
    block[8..].copy_from_slice(&value.to_be_bytes());
    block
}

/// Shared master secret between a private key and the peer public key.
pub fn master_secret(
    crypto: &dyn CryptoProvider,
    private_key: &[u8],
    public_key: &[u8],
) -> CryptoResult<[u8; KEY_LEN]> {
    let shared = crypto.ecdh(private_key, public_key)?;
    Ok(reduce_32_to_16(&shared))
}

/// Derive the sub-key at `index` from a 16-byte secret.
pub fn derive_secret_key(
    crypto: &dyn CryptoProvider,
    secret: &[u8],
    index: u64,
) -> CryptoResult<[u8; KEY_LEN]> {
    let mac = crypto.hmac_sha256(secret, &index_block(index))?;
    Ok(reduce_32_to_16(&mac))
}

/// Fixed transport key of an activation, independent of any session.
pub fn transport_key(
    crypto: &dyn CryptoProvider,
    master_secret: &[u8],
) -> CryptoResult<[u8; KEY_LEN]> {
    derive_secret_key(crypto, master_secret, INDEX_TRANSPORT)
}

/// Session key selected by an arbitrary index value.
pub fn session_key(
    crypto: &dyn CryptoProvider,
    key: &[u8],
    session_index: &[u8],
) -> CryptoResult<[u8; KEY_LEN]> {
    let mac = crypto.hmac_sha256(key, session_index)?;
    Ok(reduce_32_to_16(&mac))
}

/// Per-signature key for a counter value.
pub fn counter_key(
    crypto: &dyn CryptoProvider,
    key: &[u8],
    counter: u64,
) -> CryptoResult<[u8; KEY_LEN]> {
    session_key(crypto, key, &index_block(counter))
}
