// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Counter-based multi-factor request signatures.
//!
//! A signature has one decimal component per factor, e.g. `12345678-87654321`
//! for possession + knowledge. Every component depends on the counter, so an
//! accepted signature never verifies twice.

use p256::elliptic_curve::subtle::ConstantTimeEq;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::key_derivation::{
    counter_key, derive_secret_key, session_key, INDEX_BIOMETRY, INDEX_KNOWLEDGE,
    INDEX_POSSESSION, KEY_LEN,
};
use super::{CryptoProvider, CryptoResult};

/// Number of decimal digits in one signature component.
const COMPONENT_DIGITS: u32 = 8;

/// Suffix appended to offline signature data instead of an application secret.
pub const OFFLINE_SIGNATURE_SUFFIX: &str = "offline";

/// A single authentication factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Factor {
    Possession,
    Knowledge,
    Biometry,
}

impl Factor {
    pub fn key_index(self) -> u64 {
        match self {
            Self::Possession => INDEX_POSSESSION,
            Self::Knowledge => INDEX_KNOWLEDGE,
            Self::Biometry => INDEX_BIOMETRY,
        }
    }
}

/// Factor combination claimed by a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureType {
    Possession,
    Knowledge,
    Biometry,
    PossessionKnowledge,
    PossessionBiometry,
    PossessionKnowledgeBiometry,
}

impl SignatureType {
    pub fn factors(self) -> &'static [Factor] {
        match self {
            Self::Possession => &[Factor::Possession],
            Self::Knowledge => &[Factor::Knowledge],
            Self::Biometry => &[Factor::Biometry],
            Self::PossessionKnowledge => &[Factor::Possession, Factor::Knowledge],
            Self::PossessionBiometry => &[Factor::Possession, Factor::Biometry],
            Self::PossessionKnowledgeBiometry => {
                &[Factor::Possession, Factor::Knowledge, Factor::Biometry]
            }
        }
    }

    pub fn is_single_factor(self) -> bool {
        self.factors().len() == 1
    }

    /// Offline signatures must always include the possession factor.
    pub fn allowed_offline(self) -> bool {
        matches!(
            self,
            Self::Possession | Self::PossessionKnowledge | Self::PossessionBiometry
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Possession => "POSSESSION",
            Self::Knowledge => "KNOWLEDGE",
            Self::Biometry => "BIOMETRY",
            Self::PossessionKnowledge => "POSSESSION_KNOWLEDGE",
            Self::PossessionBiometry => "POSSESSION_BIOMETRY",
            Self::PossessionKnowledgeBiometry => "POSSESSION_KNOWLEDGE_BIOMETRY",
        }
    }
}

impl std::fmt::Display for SignatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Factor keys for a signature type, derived from the master secret.
pub fn factor_keys(
    crypto: &dyn CryptoProvider,
    master_secret: &[u8],
    signature_type: SignatureType,
) -> CryptoResult<Vec<[u8; KEY_LEN]>> {
    signature_type
        .factors()
        .iter()
        .map(|factor| derive_secret_key(crypto, master_secret, factor.key_index()))
        .collect()
}

/// Data signed online: request data bound to the application secret.
pub fn online_signature_base(data: &str, application_secret: &str) -> String {
    format!("{data}&{application_secret}")
}

pub fn offline_signature_base(data: &str) -> String {
    format!("{data}&{OFFLINE_SIGNATURE_SUFFIX}")
}

/// Compute the signature over `data` for the given factor keys and counter.
pub fn compute_signature(
    crypto: &dyn CryptoProvider,
    data: &[u8],
    factor_keys: &[[u8; KEY_LEN]],
    counter: u64,
) -> CryptoResult<String> {
    let mut components = Vec::with_capacity(factor_keys.len());
    for (i, key) in factor_keys.iter().enumerate() {
        let mut derived = counter_key(crypto, key, counter)?;
        for previous in &factor_keys[..i] {
            let chained = counter_key(crypto, previous, counter)?;
            derived = session_key(crypto, &chained, &derived)?;
        }
        let mac = crypto.hmac_sha256(&derived, data)?;
        components.push(decimalize(&mac));
    }
    Ok(components.join("-"))
}

/// Constant-time comparison of two signature strings.
pub fn signatures_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// Dynamic truncation of the trailing four bytes into a fixed-width number.
fn decimalize(mac: &[u8; 32]) -> String {
    let tail = u32::from_be_bytes([mac[28], mac[29], mac[30], mac[31]]) & 0x7FFF_FFFF;
    let value = tail % 10u32.pow(COMPONENT_DIGITS);
    format!("{value:0width$}", width = COMPONENT_DIGITS as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::P256CryptoProvider;

    fn keys(crypto: &P256CryptoProvider, t: SignatureType) -> Vec<[u8; KEY_LEN]> {
        factor_keys(crypto, &[3u8; KEY_LEN], t).unwrap()
    }

    #[test]
    fn signature_has_one_component_per_factor() {
        let crypto = P256CryptoProvider::new();
        let k = keys(&crypto, SignatureType::PossessionKnowledgeBiometry);
        let sig = compute_signature(&crypto, b"data", &k, 0).unwrap();
        let parts: Vec<&str> = sig.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.len() == 8 && p.bytes().all(|b| b.is_ascii_digit())));
    }

    #[test]
    fn signature_changes_with_counter_and_data() {
        let crypto = P256CryptoProvider::new();
        let k = keys(&crypto, SignatureType::PossessionKnowledge);
        let s0 = compute_signature(&crypto, b"data", &k, 0).unwrap();
        assert_eq!(s0, compute_signature(&crypto, b"data", &k, 0).unwrap());
        assert_ne!(s0, compute_signature(&crypto, b"data", &k, 1).unwrap());
        assert_ne!(s0, compute_signature(&crypto, b"other", &k, 0).unwrap());
    }

    #[test]
    fn factor_classification() {
        assert!(SignatureType::Possession.is_single_factor());
        assert!(SignatureType::Knowledge.is_single_factor());
        assert!(SignatureType::Biometry.is_single_factor());
        assert!(!SignatureType::PossessionBiometry.is_single_factor());

        assert!(SignatureType::PossessionKnowledge.allowed_offline());
        assert!(!SignatureType::Knowledge.allowed_offline());
        assert!(!SignatureType::PossessionKnowledgeBiometry.allowed_offline());
    }

    #[test]
    fn signature_type_uses_screaming_snake_case() {
        let json = serde_json::to_string(&SignatureType::PossessionKnowledge).unwrap();
        assert_eq!(json, "\"POSSESSION_KNOWLEDGE\"");
        let parsed: SignatureType = serde_json::from_str("\"BIOMETRY\"").unwrap();
        assert_eq!(parsed, SignatureType::Biometry);
    }

    #[test]
    fn comparison_handles_length_mismatch() {
        assert!(signatures_match("12345678", "12345678"));
        assert!(!signatures_match("12345678", "12345679"));
        assert!(!signatures_match("12345678", "12345678-1"));
    }

    #[test]
    fn signature_bases() {
        assert_eq!(online_signature_base("POST&/x", "secret"), "POST&/x&secret");
        assert_eq!(offline_signature_base("POST&/x"), "POST&/x&offline");
    }
}
