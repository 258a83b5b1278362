// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Base64 codec for binary fields at the service boundary.
//!
//! Keys, signatures, nonces and session indices always travel as standard
//! (padded) base64 strings.

use base64ct::{Base64, Encoding};

use crate::error::ServiceError;

/// Encode bytes as standard base64.
pub fn encode(bytes: &[u8]) -> String {
    Base64::encode_string(bytes)
}

/// Decode a standard base64 string.
pub fn decode(value: &str) -> Result<Vec<u8>, base64ct::Error> {
    Base64::decode_vec(value.trim())
}

/// Decode a base64 request field, naming the field in the error.
pub fn decode_field(field: &str, value: &str) -> Result<Vec<u8>, ServiceError> {
    decode(value).map_err(|_| ServiceError::InvalidInputFormat(format!("{field} is not valid base64")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteen_zero_bytes_match_known_encoding() {
        assert_eq!(encode(&[0u8; 16]), "AAAAAAAAAAAAAAAAAAAAAA==");
        assert_eq!(decode("AAAAAAAAAAAAAAAAAAAAAA==").unwrap(), vec![0u8; 16]);
    }

    #[test]
    fn decode_field_reports_field_name() {
        let err = decode_field("activationNonce", "%%%").unwrap_err();
        assert!(err.to_string().contains("activationNonce"));
    }
}
