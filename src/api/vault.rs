// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Vault unlock endpoint.

use axum::{extract::rejection::JsonRejection, extract::State, Json};

use super::{call, request_object};
use crate::{
    engine::AuthService,
    error::{ApiError, ErrorEnvelope},
    models::{
        RestRequest, RestResponse, VaultUnlockRequest, VaultUnlockResponse,
    },
    state::AppState,
};

/// Unlock the device vault with a signature of at least two factors.
#[utoipa::path(
    post,
    path = "/rest/v2/vault/unlock",
    tag = "Vault",
    request_body = RestRequest<VaultUnlockRequest>,
    responses(
        (status = 200, description = "Unlock verdict with the sealed vault key", body = RestResponse<VaultUnlockResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn vault_unlock(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<VaultUnlockRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<VaultUnlockResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::vault_unlock).await
}
