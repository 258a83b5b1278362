// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signature audit log.
//!
//! Every verification attempt, valid or not, appends one record. Records are
//! never rewritten or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::super::database::{
    numeric_key, time_key, time_key_after, StoreResult, UnitOfWork, SIGNATURE_AUDIT,
};
use super::activations::{ActivationRecord, ActivationStatus};
use crate::crypto::signature::SignatureType;

/// One entry of an ordered key/value list attached to an audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureAuditRecord {
    pub id: String,
    pub activation_id: String,
    pub user_id: String,
    pub application_id: u64,
    /// Server counter at the time of the attempt.
    pub activation_counter: u64,
    pub activation_status: ActivationStatus,
    pub signature_type: SignatureType,
    pub signature: String,
    pub data: String,
    pub valid: bool,
    pub note: String,
    pub additional_info: Vec<KeyValue>,
    pub timestamp: DateTime<Utc>,
}

impl SignatureAuditRecord {
    /// Build a record from the activation state after the attempt.
    pub fn new(
        activation: &ActivationRecord,
        activation_counter: u64,
        signature_type: SignatureType,
        signature: &str,
        data: &str,
        valid: bool,
        note: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            activation_id: activation.activation_id.clone(),
            user_id: activation.user_id.clone(),
            application_id: activation.application_id,
            activation_counter,
            activation_status: activation.status,
            signature_type,
            signature: signature.to_string(),
            data: data.to_string(),
            valid,
            note: note.into(),
            additional_info: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_additional_info(mut self, info: Vec<KeyValue>) -> Self {
        self.additional_info = info;
        self
    }
}

const AUDIT_SEQUENCE: &str = "signature_audit";

pub struct AuditRepository<'a> {
    uow: &'a UnitOfWork,
}

impl<'a> AuditRepository<'a> {
    pub fn new(uow: &'a UnitOfWork) -> Self {
        Self { uow }
    }

    pub fn append(&self, record: &SignatureAuditRecord) -> StoreResult<()> {
        let key = format!(
            "{}|{}",
            time_key(record.timestamp),
            numeric_key(self.uow.next_sequence(AUDIT_SEQUENCE)?)
        );
        self.uow.put_json(SIGNATURE_AUDIT, &key, record)
    }

    /// Records of a user (optionally one application) with `from <= timestamp <= to`.
    pub fn list(
        &self,
        user_id: &str,
        application_id: Option<u64>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<SignatureAuditRecord>> {
        let records: Vec<SignatureAuditRecord> =
            self.uow
                .scan_json(SIGNATURE_AUDIT, &time_key(from), &time_key_after(to))?;
        Ok(records
            .into_iter()
            .filter(|r| r.user_id == user_id)
            .filter(|r| application_id.is_none_or(|app| r.application_id == app))
            .collect())
    }
}
