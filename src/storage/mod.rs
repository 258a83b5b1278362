// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent protocol state in an embedded redb database.
//!
//! ## Consistency Model
//!
//! - Every engine operation runs inside one [`UnitOfWork`]
//! - A write unit persists only on `commit()`; any early return drops and
//!   aborts it, so failed operations leave no partial state
//! - Mutations of one activation hold its row lock from read to commit, which
//!   serializes counter updates for that activation only
//! - Read-only projections use a snapshot unit and take no lock
//!
//! ## Storage Layout
//!
//! ```text
//! $DATA_DIR/
//!   auth.redb   # all tables, see `database` for the key formats
//! ```

pub mod database;
pub mod locks;
pub mod repository;

pub use database::{Store, StoreError, StoreResult, UnitOfWork};
pub use locks::RowGuard;
pub use repository::{
    ActivationHistoryRecord, ActivationRecord, ActivationRepository, ActivationStatus,
    ApplicationRepository, AuditRepository, HistoryRepository, KeyValue, SignatureAuditRecord,
    StoredApplication, StoredApplicationVersion, StoredMasterKeyPair, StoredToken,
    TokenRepository,
};
