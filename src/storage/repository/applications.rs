// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Applications, their versions and master key pairs.
//!
//! A version carries the application key/secret pair a client build embeds.
//! Master key pairs are listed newest first; the first one is current.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::super::database::{
    numeric_key, StoreResult, UnitOfWork, APPLICATIONS, APPLICATION_VERSIONS, MASTER_KEY_PAIRS,
};

const APPLICATION_SEQUENCE: &str = "applications";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredApplication {
    pub id: u64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredApplicationVersion {
    pub application_id: u64,
    pub name: String,
    /// Public identifier of the client build (base64, 16 random bytes).
    pub application_key: String,
    /// Shared secret of the client build (base64, 16 random bytes).
    pub application_secret: String,
    pub supported: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMasterKeyPair {
    pub id: String,
    pub application_id: u64,
    pub name: String,
    /// Base64 private scalar.
    pub private_key: String,
    /// Base64 SEC1 public point.
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

pub struct ApplicationRepository<'a> {
    uow: &'a UnitOfWork,
}

impl<'a> ApplicationRepository<'a> {
    pub fn new(uow: &'a UnitOfWork) -> Self {
        Self { uow }
    }

    pub fn get(&self, application_id: u64) -> StoreResult<Option<StoredApplication>> {
        self.uow.get_json(APPLICATIONS, &numeric_key(application_id))
    }

    /// Create an application with the next free id.
    pub fn create(&self, name: &str) -> StoreResult<StoredApplication> {
        let application = StoredApplication {
            id: self.uow.next_sequence(APPLICATION_SEQUENCE)?,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.uow
            .put_json(APPLICATIONS, &numeric_key(application.id), &application)?;
        Ok(application)
    }

    pub fn list(&self) -> StoreResult<Vec<StoredApplication>> {
        self.uow.scan_all_json(APPLICATIONS)
    }

    // =========================================================================
    // Versions
    // =========================================================================

    pub fn get_version(&self, application_key: &str) -> StoreResult<Option<StoredApplicationVersion>> {
        self.uow.get_json(APPLICATION_VERSIONS, application_key)
    }

    pub fn put_version(&self, version: &StoredApplicationVersion) -> StoreResult<()> {
        self.uow
            .put_json(APPLICATION_VERSIONS, &version.application_key, version)
    }

    pub fn list_versions(&self, application_id: u64) -> StoreResult<Vec<StoredApplicationVersion>> {
        let mut versions: Vec<StoredApplicationVersion> = self
            .uow
            .scan_all_json::<StoredApplicationVersion>(APPLICATION_VERSIONS)?
            .into_iter()
            .filter(|v| v.application_id == application_id)
            .collect();
        versions.sort_by_key(|v| v.created_at);
        Ok(versions)
    }

    // =========================================================================
    // Master key pairs
    // =========================================================================

    pub fn add_master_key_pair(&self, key_pair: &StoredMasterKeyPair) -> StoreResult<()> {
        let key = master_key_pair_key(key_pair);
        self.uow.put_json(MASTER_KEY_PAIRS, &key, key_pair)
    }

    /// Newest master key pair of an application.
    pub fn current_master_key_pair(
        &self,
        application_id: u64,
    ) -> StoreResult<Option<StoredMasterKeyPair>> {
        Ok(self.master_key_pairs(application_id)?.into_iter().next())
    }

    /// All master key pairs of an application, newest first.
    pub fn master_key_pairs(&self, application_id: u64) -> StoreResult<Vec<StoredMasterKeyPair>> {
        let start = format!("{}|", numeric_key(application_id));
        let end = format!("{}}}", numeric_key(application_id));
        self.uow.scan_json(MASTER_KEY_PAIRS, &start, &end)
    }
}

/// `{app}|{inverted created millis}|{id}` sorts newest first within an application.
fn master_key_pair_key(key_pair: &StoredMasterKeyPair) -> String {
    let created = key_pair.created_at.timestamp_millis().max(0) as u64;
    format!(
        "{}|{}|{}",
        numeric_key(key_pair.application_id),
        numeric_key(u64::MAX - created),
        key_pair.id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use tempfile::tempdir;

    fn key_pair(application_id: u64, id: &str, created_at: DateTime<Utc>) -> StoredMasterKeyPair {
        StoredMasterKeyPair {
            id: id.to_string(),
            application_id,
            name: id.to_string(),
            private_key: "cHJpdg==".to_string(),
            public_key: "cHVi".to_string(),
            created_at,
        }
    }

    #[test]
    fn application_ids_are_sequential() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("auth.redb"), Duration::from_secs(1)).unwrap();
        let uow = store.write().unwrap();
        let repo = ApplicationRepository::new(&uow);

        let first = repo.create("mobile").unwrap();
        let second = repo.create("web").unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(repo.get(2).unwrap().unwrap().name, "web");
        assert_eq!(repo.list().unwrap().len(), 2);
    }

    #[test]
    fn newest_master_key_pair_is_current() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("auth.redb"), Duration::from_secs(1)).unwrap();
        let uow = store.write().unwrap();
        let repo = ApplicationRepository::new(&uow);

        let now = Utc::now();
        repo.add_master_key_pair(&key_pair(1, "old", now - ChronoDuration::days(1)))
            .unwrap();
        repo.add_master_key_pair(&key_pair(1, "new", now)).unwrap();
        repo.add_master_key_pair(&key_pair(2, "other", now + ChronoDuration::days(1)))
            .unwrap();

        assert_eq!(repo.current_master_key_pair(1).unwrap().unwrap().id, "new");
        let ids: Vec<String> = repo.master_key_pairs(1).unwrap().into_iter().map(|k| k.id).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert!(repo.current_master_key_pair(3).unwrap().is_none());
    }

    #[test]
    fn versions_are_listed_per_application() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("auth.redb"), Duration::from_secs(1)).unwrap();
        let uow = store.write().unwrap();
        let repo = ApplicationRepository::new(&uow);

        for (app, key) in [(1, "k1"), (2, "k2"), (1, "k3")] {
            repo.put_version(&StoredApplicationVersion {
                application_id: app,
                name: "default".into(),
                application_key: key.into(),
                application_secret: "s".into(),
                supported: true,
                created_at: Utc::now(),
            })
            .unwrap();
        }

        assert_eq!(repo.list_versions(1).unwrap().len(), 2);
        assert_eq!(repo.get_version("k2").unwrap().unwrap().application_id, 2);
        assert!(repo.get_version("missing").unwrap().is_none());
    }
}
