// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Read access to the signature audit log.

use std::sync::Arc;

use super::EngineContext;
use crate::error::ServiceResult;
use crate::models::{SignatureAuditItem, SignatureAuditRequest, SignatureAuditResponse};
use crate::storage::AuditRepository;

#[derive(Clone)]
pub struct AuditEngine {
    ctx: Arc<EngineContext>,
}

impl AuditEngine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Attempts of one user between two instants, both inclusive.
    pub fn list(&self, request: &SignatureAuditRequest) -> ServiceResult<SignatureAuditResponse> {
        if request.timestamp_from > request.timestamp_to {
            return Ok(SignatureAuditResponse { items: Vec::new() });
        }
        let uow = self.ctx.store.read()?;
        let items = AuditRepository::new(&uow)
            .list(
                &request.user_id,
                request.application_id,
                request.timestamp_from,
                request.timestamp_to,
            )?
            .into_iter()
            .map(|r| SignatureAuditItem {
                id: r.id,
                activation_id: r.activation_id,
                user_id: r.user_id,
                application_id: r.application_id,
                activation_counter: r.activation_counter,
                activation_status: r.activation_status,
                signature_type: r.signature_type,
                signature: r.signature,
                data: r.data,
                valid: r.valid,
                note: r.note,
                additional_info: r.additional_info,
                timestamp_created: r.timestamp,
            })
            .collect();
        Ok(SignatureAuditResponse { items })
    }
}
