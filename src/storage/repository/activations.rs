// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Activation records and their secondary indexes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::super::database::{
    StoreResult, UnitOfWork, ACTIVATIONS, ACTIVATION_SHORT_IDS, USER_ACTIVATIONS,
};
use crate::crypto::key_storage::ServerPrivateKey;

/// Activation lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationStatus {
    Created,
    OtpUsed,
    Active,
    Blocked,
    Removed,
}

impl ActivationStatus {
    /// Numeric status used inside the encrypted status blob.
    pub fn code(self) -> u8 {
        match self {
            Self::Created => 1,
            Self::OtpUsed => 2,
            Self::Active => 3,
            Self::Blocked => 4,
            Self::Removed => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::OtpUsed => "OTP_USED",
            Self::Active => "ACTIVE",
            Self::Blocked => "BLOCKED",
            Self::Removed => "REMOVED",
        }
    }
}

/// A device paired with a user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationRecord {
    pub activation_id: String,
    pub activation_id_short: String,
    pub activation_otp: String,
    pub user_id: String,
    pub application_id: u64,
    pub activation_name: Option<String>,
    pub extras: Option<String>,
    pub status: ActivationStatus,
    pub blocked_reason: Option<String>,
    /// Base64 SEC1 point.
    pub server_public_key: String,
    pub server_private_key: ServerPrivateKey,
    /// Base64 SEC1 point; set once when pairing completes.
    pub device_public_key: Option<String>,
    pub counter: u64,
    pub failed_attempts: u64,
    pub max_failed_attempts: u64,
    /// Pairing deadline for CREATED and OTP_USED records.
    pub expire_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl ActivationRecord {
    /// Status as seen by callers at `now`. A pairing that missed its deadline
    /// reads as REMOVED; the stored status is left untouched.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ActivationStatus {
        match (self.status, self.expire_at) {
            (ActivationStatus::Created | ActivationStatus::OtpUsed, Some(deadline))
                if deadline < now =>
            {
                ActivationStatus::Removed
            }
            (status, _) => status,
        }
    }

    pub fn remaining_attempts(&self) -> u64 {
        self.max_failed_attempts.saturating_sub(self.failed_attempts)
    }
}

pub struct ActivationRepository<'a> {
    uow: &'a UnitOfWork,
}

impl<'a> ActivationRepository<'a> {
    pub fn new(uow: &'a UnitOfWork) -> Self {
        Self { uow }
    }

    pub fn get(&self, activation_id: &str) -> StoreResult<Option<ActivationRecord>> {
        self.uow.get_json(ACTIVATIONS, activation_id)
    }

    /// Insert or update a record and keep the indexes in step.
    ///
    /// The short id index only points at CREATED records, so a short id is
    /// reusable once its pairing has completed or been abandoned.
    pub fn put(&self, record: &ActivationRecord) -> StoreResult<()> {
        self.uow
            .put_json(ACTIVATIONS, &record.activation_id, record)?;
        self.uow.put(
            USER_ACTIVATIONS,
            &user_key(&record.user_id, &record.activation_id),
            &[],
        )?;

        if record.status == ActivationStatus::Created {
            self.uow.put(
                ACTIVATION_SHORT_IDS,
                &record.activation_id_short,
                record.activation_id.as_bytes(),
            )?;
        } else if self.short_id_owner(&record.activation_id_short)?.as_deref()
            == Some(record.activation_id.as_str())
        {
            self.uow
                .remove(ACTIVATION_SHORT_IDS, &record.activation_id_short)?;
        }
        Ok(())
    }

    /// CREATED activation currently holding a short id.
    pub fn find_by_short_id(&self, short_id: &str) -> StoreResult<Option<ActivationRecord>> {
        match self.short_id_owner(short_id)? {
            Some(activation_id) => self.get(&activation_id),
            None => Ok(None),
        }
    }

    pub fn list_by_user(&self, user_id: &str) -> StoreResult<Vec<ActivationRecord>> {
        let start = format!("{user_id}\0");
        let end = format!("{user_id}\u{1}");
        let mut records = Vec::new();
        for (key, _) in self.uow.scan(USER_ACTIVATIONS, &start, &end)? {
            let activation_id = &key[start.len()..];
            if let Some(record) = self.get(activation_id)? {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    fn short_id_owner(&self, short_id: &str) -> StoreResult<Option<String>> {
        Ok(self
            .uow
            .get(ACTIVATION_SHORT_IDS, short_id)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}

fn user_key(user_id: &str, activation_id: &str) -> String {
    format!("{user_id}\0{activation_id}")
}
