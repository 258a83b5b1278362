// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Activation lifecycle endpoints.

use axum::{extract::rejection::JsonRejection, extract::State, Json};

use super::{call, request_object};
use crate::{
    engine::AuthService,
    error::{ApiError, ErrorEnvelope},
    models::{
        ActivationHistoryRequest, ActivationHistoryResponse, ActivationIdRequest,
        ActivationListRequest, ActivationListResponse, ActivationStatusChangeResponse,
        ActivationStatusResponse, BlockActivationRequest, CommitActivationResponse,
        CreateActivationRequest, InitActivationRequest, InitActivationResponse, PairingResponse,
        PrepareActivationRequest, RemoveActivationResponse, RestRequest, RestResponse,
    },
    state::AppState,
};

/// Start pairing a device for a user.
///
/// Returns the short id and OTP to show to the user, signed with the
/// application master key.
#[utoipa::path(
    post,
    path = "/rest/v2/activation/init",
    tag = "Activation",
    request_body = RestRequest<InitActivationRequest>,
    responses(
        (status = 200, description = "Activation initialized", body = RestResponse<InitActivationResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn init_activation(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<InitActivationRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<InitActivationResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::init_activation).await
}

/// Exchange public keys using the short id and OTP from `init`.
#[utoipa::path(
    post,
    path = "/rest/v2/activation/prepare",
    tag = "Activation",
    request_body = RestRequest<PrepareActivationRequest>,
    responses(
        (status = 200, description = "Device key accepted", body = RestResponse<PairingResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn prepare_activation(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<PrepareActivationRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<PairingResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::prepare_activation).await
}

#[utoipa::path(
    post,
    path = "/rest/v2/activation/create",
    tag = "Activation",
    request_body = RestRequest<CreateActivationRequest>,
    responses(
        (status = 200, description = "Activation created and paired", body = RestResponse<PairingResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn create_activation(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<CreateActivationRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<PairingResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::create_activation).await
}

#[utoipa::path(
    post,
    path = "/rest/v2/activation/commit",
    tag = "Activation",
    request_body = RestRequest<ActivationIdRequest>,
    responses(
        (status = 200, description = "Activation committed", body = RestResponse<CommitActivationResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn commit_activation(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<ActivationIdRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<CommitActivationResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::commit_activation).await
}

/// Status of an activation with an encrypted blob for the device.
///
/// Unknown ids answer `REMOVED`.
#[utoipa::path(
    post,
    path = "/rest/v2/activation/status",
    tag = "Activation",
    request_body = RestRequest<ActivationIdRequest>,
    responses(
        (status = 200, description = "Activation status", body = RestResponse<ActivationStatusResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn activation_status(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<ActivationIdRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<ActivationStatusResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::activation_status).await
}

#[utoipa::path(
    post,
    path = "/rest/v2/activation/remove",
    tag = "Activation",
    request_body = RestRequest<ActivationIdRequest>,
    responses(
        (status = 200, description = "Activation removed", body = RestResponse<RemoveActivationResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn remove_activation(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<ActivationIdRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<RemoveActivationResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::remove_activation).await
}

/// Block an active activation. Blocking twice keeps the first reason.
#[utoipa::path(
    post,
    path = "/rest/v2/activation/block",
    tag = "Activation",
    request_body = RestRequest<BlockActivationRequest>,
    responses(
        (status = 200, description = "Activation blocked", body = RestResponse<ActivationStatusChangeResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn block_activation(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<BlockActivationRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<ActivationStatusChangeResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::block_activation).await
}

#[utoipa::path(
    post,
    path = "/rest/v2/activation/unblock",
    tag = "Activation",
    request_body = RestRequest<ActivationIdRequest>,
    responses(
        (status = 200, description = "Activation unblocked", body = RestResponse<ActivationStatusChangeResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn unblock_activation(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<ActivationIdRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<ActivationStatusChangeResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::unblock_activation).await
}

#[utoipa::path(
    post,
    path = "/rest/v2/activation/list",
    tag = "Activation",
    request_body = RestRequest<ActivationListRequest>,
    responses(
        (status = 200, description = "Activations of a user", body = RestResponse<ActivationListResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn activation_list(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<ActivationListRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<ActivationListResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::activation_list).await
}

#[utoipa::path(
    post,
    path = "/rest/v2/activation/history",
    tag = "Activation",
    request_body = RestRequest<ActivationHistoryRequest>,
    responses(
        (status = 200, description = "Status changes in the window", body = RestResponse<ActivationHistoryResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn activation_history(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<ActivationHistoryRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<ActivationHistoryResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::activation_history).await
}
