// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token endpoints.

use axum::{extract::rejection::JsonRejection, extract::State, Json};

use super::{call, request_object};
use crate::{
    engine::AuthService,
    error::{ApiError, ErrorEnvelope},
    models::{
        CreateTokenRequest, CreateTokenResponse, RemoveTokenRequest, RemoveTokenResponse,
        RestRequest, RestResponse, ValidateTokenRequest, ValidateTokenResponse,
    },
    state::AppState,
};

#[utoipa::path(
    post,
    path = "/rest/v2/token/create",
    tag = "Token",
    request_body = RestRequest<CreateTokenRequest>,
    responses(
        (status = 200, description = "Token issued", body = RestResponse<CreateTokenResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn create_token(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<CreateTokenRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<CreateTokenResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::create_token).await
}

/// Check a token digest. Unknown tokens answer `tokenValid: false`.
#[utoipa::path(
    post,
    path = "/rest/v2/token/validate",
    tag = "Token",
    request_body = RestRequest<ValidateTokenRequest>,
    responses(
        (status = 200, description = "Validation verdict", body = RestResponse<ValidateTokenResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn validate_token(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<ValidateTokenRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<ValidateTokenResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::validate_token).await
}

#[utoipa::path(
    post,
    path = "/rest/v2/token/remove",
    tag = "Token",
    request_body = RestRequest<RemoveTokenRequest>,
    responses(
        (status = 200, description = "Removal result", body = RestResponse<RemoveTokenResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn remove_token(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<RemoveTokenRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<RemoveTokenResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::remove_token).await
}
