// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the store.
//!
//! Each repository borrows one [`UnitOfWork`](super::UnitOfWork), so
//! everything written through repositories of the same unit commits or
//! aborts together.

pub mod activations;
pub mod applications;
pub mod audit;
pub mod history;
pub mod tokens;

pub use activations::{ActivationRecord, ActivationRepository, ActivationStatus};
pub use applications::{
    ApplicationRepository, StoredApplication, StoredApplicationVersion, StoredMasterKeyPair,
};
pub use audit::{AuditRepository, KeyValue, SignatureAuditRecord};
pub use history::{ActivationHistoryRecord, HistoryRepository};
pub use tokens::{StoredToken, TokenRepository};
