// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer tokens bound to an activation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::super::database::{StoreResult, UnitOfWork, TOKENS};
use crate::crypto::signature::SignatureType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredToken {
    pub token_id: String,
    /// Base64, 16 random bytes.
    pub token_secret: String,
    pub activation_id: String,
    pub signature_type: SignatureType,
    pub created_at: DateTime<Utc>,
}

pub struct TokenRepository<'a> {
    uow: &'a UnitOfWork,
}

impl<'a> TokenRepository<'a> {
    pub fn new(uow: &'a UnitOfWork) -> Self {
        Self { uow }
    }

    pub fn get(&self, token_id: &str) -> StoreResult<Option<StoredToken>> {
        self.uow.get_json(TOKENS, token_id)
    }

    pub fn put(&self, token: &StoredToken) -> StoreResult<()> {
        self.uow.put_json(TOKENS, &token.token_id, token)
    }

    /// Returns whether the token existed.
    pub fn remove(&self, token_id: &str) -> StoreResult<bool> {
        self.uow.remove(TOKENS, token_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn remove_reports_existence() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("auth.redb"), Duration::from_secs(1)).unwrap();
        let uow = store.write().unwrap();
        let repo = TokenRepository::new(&uow);

        repo.put(&StoredToken {
            token_id: "t1".into(),
            token_secret: "c2VjcmV0".into(),
            activation_id: "a1".into(),
            signature_type: SignatureType::Possession,
            created_at: Utc::now(),
        })
        .unwrap();

        assert_eq!(repo.get("t1").unwrap().unwrap().activation_id, "a1");
        assert!(repo.remove("t1").unwrap());
        assert!(!repo.remove("t1").unwrap());
        assert!(repo.get("t1").unwrap().is_none());
    }
}
