// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transport encryption key endpoints.

use axum::{extract::rejection::JsonRejection, extract::State, Json};

use super::{call, request_object};
use crate::{
    engine::AuthService,
    error::{ApiError, ErrorEnvelope},
    models::{
        ActivationEncryptionKeyRequest, ActivationEncryptionKeyResponse,
        ApplicationEncryptionKeyRequest, ApplicationEncryptionKeyResponse, RestRequest,
        RestResponse,
    },
    state::AppState,
};

#[utoipa::path(
    post,
    path = "/rest/v2/activation/encryption/key/create",
    tag = "Encryption",
    request_body = RestRequest<ActivationEncryptionKeyRequest>,
    responses(
        (status = 200, description = "Personalized key and its index", body = RestResponse<ActivationEncryptionKeyResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn activation_encryption_key(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<ActivationEncryptionKeyRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<ActivationEncryptionKeyResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::activation_encryption_key).await
}

#[utoipa::path(
    post,
    path = "/rest/v2/application/encryption/key/create",
    tag = "Encryption",
    request_body = RestRequest<ApplicationEncryptionKeyRequest>,
    responses(
        (status = 200, description = "Non-personalized key and its index", body = RestResponse<ApplicationEncryptionKeyResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn application_encryption_key(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<ApplicationEncryptionKeyRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<ApplicationEncryptionKeyResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::application_encryption_key).await
}
