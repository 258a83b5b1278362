// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only log of activation status changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::super::database::{
    numeric_key, time_key, time_key_after, StoreResult, UnitOfWork, ACTIVATION_HISTORY,
};
use super::activations::{ActivationRecord, ActivationStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivationHistoryRecord {
    pub id: String,
    pub activation_id: String,
    pub status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActivationHistoryRecord {
    /// Snapshot of the record's current status.
    pub fn of(record: &ActivationRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            activation_id: record.activation_id.clone(),
            status: record.status,
            blocked_reason: record.blocked_reason.clone(),
            timestamp,
        }
    }
}

const HISTORY_SEQUENCE: &str = "activation_history";

pub struct HistoryRepository<'a> {
    uow: &'a UnitOfWork,
}

impl<'a> HistoryRepository<'a> {
    pub fn new(uow: &'a UnitOfWork) -> Self {
        Self { uow }
    }

    /// Entries of the same millisecond keep their append order.
    pub fn append(&self, entry: &ActivationHistoryRecord) -> StoreResult<()> {
        let key = format!(
            "{}|{}|{}",
            entry.activation_id,
            time_key(entry.timestamp),
            numeric_key(self.uow.next_sequence(HISTORY_SEQUENCE)?)
        );
        self.uow.put_json(ACTIVATION_HISTORY, &key, entry)
    }

    /// Entries of one activation with `from <= timestamp <= to`, oldest first.
    pub fn list(
        &self,
        activation_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<ActivationHistoryRecord>> {
        let start = format!("{activation_id}|{}", time_key(from));
        let end = format!("{activation_id}|{}", time_key_after(to));
        self.uow.scan_json(ACTIVATION_HISTORY, &start, &end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use tempfile::tempdir;

    fn entry(activation_id: &str, status: ActivationStatus, timestamp: DateTime<Utc>) -> ActivationHistoryRecord {
        ActivationHistoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            activation_id: activation_id.to_string(),
            status,
            blocked_reason: None,
            timestamp,
        }
    }

    #[test]
    fn list_filters_by_activation_and_time() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("auth.redb"), Duration::from_secs(1)).unwrap();
        let uow = store.write().unwrap();
        let repo = HistoryRepository::new(&uow);

        let t0 = Utc::now();
        repo.append(&entry("a1", ActivationStatus::Created, t0)).unwrap();
        repo.append(&entry("a1", ActivationStatus::Active, t0 + ChronoDuration::seconds(10)))
            .unwrap();
        repo.append(&entry("a2", ActivationStatus::Created, t0)).unwrap();

        let all = repo
            .list("a1", t0 - ChronoDuration::hours(1), t0 + ChronoDuration::hours(1))
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].status, ActivationStatus::Created);
        assert_eq!(all[1].status, ActivationStatus::Active);

        let first_only = repo.list("a1", t0, t0).unwrap();
        assert_eq!(first_only.len(), 1);
    }
}
