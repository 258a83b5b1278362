// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded protocol database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! Every table maps a string key to a JSON document.
//!
//! - `applications`: `{application_id:020}` → StoredApplication
//! - `application_versions`: application key → StoredApplicationVersion
//! - `master_key_pairs`: `{application_id:020}|{inverted_created_ms:020}|{id}` → StoredMasterKeyPair
//! - `activations`: activation id → ActivationRecord
//! - `activation_short_ids`: short id → activation id (CREATED activations only)
//! - `user_activations`: `user_id\0activation_id` → empty
//! - `activation_history`: `activation_id|{ts_ms:020}|{uuid}` → ActivationHistoryRecord
//! - `signature_audit`: `{ts_ms:020}|{uuid}` → SignatureAuditRecord
//! - `tokens`: token id → StoredToken
//! - `sequences`: name → u64 (big-endian)

use std::path::Path;
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::locks::{RowGuard, RowLocks};

pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

// =============================================================================
// Table Definitions
// =============================================================================

pub const APPLICATIONS: JsonTable = TableDefinition::new("applications");
pub const APPLICATION_VERSIONS: JsonTable = TableDefinition::new("application_versions");
pub const MASTER_KEY_PAIRS: JsonTable = TableDefinition::new("master_key_pairs");
pub const ACTIVATIONS: JsonTable = TableDefinition::new("activations");
pub const ACTIVATION_SHORT_IDS: JsonTable = TableDefinition::new("activation_short_ids");
pub const USER_ACTIVATIONS: JsonTable = TableDefinition::new("user_activations");
pub const ACTIVATION_HISTORY: JsonTable = TableDefinition::new("activation_history");
pub const SIGNATURE_AUDIT: JsonTable = TableDefinition::new("signature_audit");
pub const TOKENS: JsonTable = TableDefinition::new("tokens");
pub const SEQUENCES: JsonTable = TableDefinition::new("sequences");

const ALL_TABLES: [JsonTable; 10] = [
    APPLICATIONS,
    APPLICATION_VERSIONS,
    MASTER_KEY_PAIRS,
    ACTIVATIONS,
    ACTIVATION_SHORT_IDS,
    USER_ACTIVATIONS,
    ACTIVATION_HISTORY,
    SIGNATURE_AUDIT,
    TOKENS,
    SEQUENCES,
];

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for row lock on {0}")]
    LockTimeout(String),

    #[error("write attempted in a read-only unit of work")]
    ReadOnly,
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Key Helpers
// =============================================================================

/// Fixed-width decimal key segment so lexical order matches numeric order.
pub fn numeric_key(value: u64) -> String {
    format!("{value:020}")
}

/// Millisecond timestamp key segment. Pre-epoch timestamps clamp to zero.
pub fn time_key(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    numeric_key(timestamp.timestamp_millis().max(0) as u64)
}

/// Exclusive upper bound for an inclusive `..=timestamp` scan.
pub fn time_key_after(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    numeric_key((timestamp.timestamp_millis().max(0) as u64).saturating_add(1))
}

// =============================================================================
// Store
// =============================================================================

/// Durable repository of all protocol state, with per-row locking.
pub struct Store {
    db: Database,
    locks: RowLocks,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path, lock_timeout: Duration) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        for table in ALL_TABLES {
            let _ = write_txn.open_table(table)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db,
            locks: RowLocks::new(lock_timeout),
        })
    }

    /// Consistent read-only snapshot.
    pub fn read(&self) -> StoreResult<UnitOfWork> {
        Ok(UnitOfWork {
            txn: Txn::Read(self.db.begin_read()?),
        })
    }

    /// Atomic read-write unit. Nothing persists until [`UnitOfWork::commit`].
    pub fn write(&self) -> StoreResult<UnitOfWork> {
        Ok(UnitOfWork {
            txn: Txn::Write(self.db.begin_write()?),
        })
    }

    /// Exclusive lock on one logical row, released when the guard drops.
    pub fn lock_row(&self, key: &str) -> StoreResult<RowGuard<'_>> {
        self.locks.acquire(key)
    }

    pub fn health_check(&self) -> StoreResult<()> {
        let uow = self.read()?;
        uow.get(SEQUENCES, "health")?;
        Ok(())
    }
}

// =============================================================================
// Unit of Work
// =============================================================================

enum Txn {
    Read(redb::ReadTransaction),
    Write(redb::WriteTransaction),
}

/// One transaction against the store. Dropping an uncommitted write aborts it.
pub struct UnitOfWork {
    txn: Txn,
}

impl UnitOfWork {
    pub fn get(&self, table: JsonTable, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match &self.txn {
            Txn::Read(txn) => read_value(&txn.open_table(table)?, key),
            Txn::Write(txn) => read_value(&txn.open_table(table)?, key),
        }
    }

    pub fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StoreResult<Option<T>> {
        match self.get(table, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, table: JsonTable, key: &str, value: &[u8]) -> StoreResult<()> {
        let Txn::Write(txn) = &self.txn else {
            return Err(StoreError::ReadOnly);
        };
        let mut table = txn.open_table(table)?;
        table.insert(key, value)?;
        Ok(())
    }

    pub fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StoreResult<()> {
        let json = serde_json::to_vec(value)?;
        self.put(table, key, &json)
    }

    /// Remove a key; returns whether it existed.
    pub fn remove(&self, table: JsonTable, key: &str) -> StoreResult<bool> {
        let Txn::Write(txn) = &self.txn else {
            return Err(StoreError::ReadOnly);
        };
        let mut table = txn.open_table(table)?;
        let existed = table.remove(key)?.is_some();
        Ok(existed)
    }

    /// All entries with `start <= key < end`, in key order.
    /// Entries with `start <= key < end`. An empty or inverted range matches
    /// nothing.
    pub fn scan(&self, table: JsonTable, start: &str, end: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        if start >= end {
            return Ok(Vec::new());
        }
        match &self.txn {
            Txn::Read(txn) => scan_range(&txn.open_table(table)?, start, end),
            Txn::Write(txn) => scan_range(&txn.open_table(table)?, start, end),
        }
    }

    pub fn scan_json<T: DeserializeOwned>(
        &self,
        table: JsonTable,
        start: &str,
        end: &str,
    ) -> StoreResult<Vec<T>> {
        self.scan(table, start, end)?
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(StoreError::from))
            .collect()
    }

    /// Every value in a table.
    pub fn scan_all_json<T: DeserializeOwned>(&self, table: JsonTable) -> StoreResult<Vec<T>> {
        match &self.txn {
            Txn::Read(txn) => all_values(&txn.open_table(table)?),
            Txn::Write(txn) => all_values(&txn.open_table(table)?),
        }
    }

    /// Increment and return a named sequence, starting at 1.
    pub fn next_sequence(&self, name: &str) -> StoreResult<u64> {
        let current = match self.get(SEQUENCES, name)? {
            Some(bytes) if bytes.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                u64::from_be_bytes(buf)
            }
            _ => 0,
        };
        let next = current + 1;
        self.put(SEQUENCES, name, &next.to_be_bytes())?;
        Ok(next)
    }

    pub fn commit(self) -> StoreResult<()> {
        match self.txn {
            Txn::Read(_) => Ok(()),
            Txn::Write(txn) => {
                txn.commit()?;
                Ok(())
            }
        }
    }
}

fn read_value<T>(table: &T, key: &str) -> StoreResult<Option<Vec<u8>>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    Ok(table.get(key)?.map(|value| value.value().to_vec()))
}

fn scan_range<T>(table: &T, start: &str, end: &str) -> StoreResult<Vec<(String, Vec<u8>)>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut out = Vec::new();
    for entry in table.range(start..end)? {
        let (key, value) = entry?;
        out.push((key.value().to_string(), value.value().to_vec()));
    }
    Ok(out)
}

fn all_values<T, V>(table: &T) -> StoreResult<Vec<V>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
    V: DeserializeOwned,
{
    let mut out = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        out.push(serde_json::from_slice(value.value())?);
    }
    Ok(out)
}
