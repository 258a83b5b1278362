// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signature verification, offline payload and audit endpoints.

use axum::{extract::rejection::JsonRejection, extract::State, Json};

use super::{call, request_object};
use crate::{
    engine::AuthService,
    error::{ApiError, ErrorEnvelope},
    models::{
        NonPersonalizedOfflinePayloadRequest, OfflinePayloadResponse,
        PersonalizedOfflinePayloadRequest, RestRequest, RestResponse, SignatureAuditRequest,
        SignatureAuditResponse, VerifyEcdsaSignatureRequest, VerifyEcdsaSignatureResponse,
        VerifyOfflineSignatureRequest, VerifySignatureRequest, VerifySignatureResponse,
    },
    state::AppState,
};

/// Verify a multi-factor request signature.
///
/// A mismatch answers `signatureValid: false`, not an error.
#[utoipa::path(
    post,
    path = "/rest/v2/signature/verify",
    tag = "Signature",
    request_body = RestRequest<VerifySignatureRequest>,
    responses(
        (status = 200, description = "Verification verdict", body = RestResponse<VerifySignatureResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn verify_signature(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<VerifySignatureRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<VerifySignatureResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::verify_signature).await
}

#[utoipa::path(
    post,
    path = "/rest/v2/signature/offline/personalized/create",
    tag = "Signature",
    request_body = RestRequest<PersonalizedOfflinePayloadRequest>,
    responses(
        (status = 200, description = "Payload signed with the activation key", body = RestResponse<OfflinePayloadResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn create_personalized_offline_payload(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<PersonalizedOfflinePayloadRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<OfflinePayloadResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::create_personalized_offline_payload).await
}

#[utoipa::path(
    post,
    path = "/rest/v2/signature/offline/non-personalized/create",
    tag = "Signature",
    request_body = RestRequest<NonPersonalizedOfflinePayloadRequest>,
    responses(
        (status = 200, description = "Payload signed with the master key", body = RestResponse<OfflinePayloadResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn create_non_personalized_offline_payload(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<NonPersonalizedOfflinePayloadRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<OfflinePayloadResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::create_non_personalized_offline_payload).await
}

#[utoipa::path(
    post,
    path = "/rest/v2/signature/offline/verify",
    tag = "Signature",
    request_body = RestRequest<VerifyOfflineSignatureRequest>,
    responses(
        (status = 200, description = "Verification verdict", body = RestResponse<VerifySignatureResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn verify_offline_signature(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<VerifyOfflineSignatureRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<VerifySignatureResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::verify_offline_signature).await
}

/// Verify an ECDSA signature made with the device private key.
#[utoipa::path(
    post,
    path = "/rest/v2/signature/ecdsa/verify",
    tag = "Signature",
    request_body = RestRequest<VerifyEcdsaSignatureRequest>,
    responses(
        (status = 200, description = "Verification verdict", body = RestResponse<VerifyEcdsaSignatureResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn verify_ecdsa_signature(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<VerifyEcdsaSignatureRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<VerifyEcdsaSignatureResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::verify_ecdsa_signature).await
}

#[utoipa::path(
    post,
    path = "/rest/v2/signature/list",
    tag = "Signature",
    request_body = RestRequest<SignatureAuditRequest>,
    responses(
        (status = 200, description = "Audit records in the window", body = RestResponse<SignatureAuditResponse>),
        (status = 400, description = "Request rejected", body = ErrorEnvelope)
    )
)]
pub async fn signature_audit(
    State(state): State<AppState>,
    payload: Result<Json<RestRequest<SignatureAuditRequest>>, JsonRejection>,
) -> Result<Json<RestResponse<SignatureAuditResponse>>, ApiError> {
    call(&state, request_object(payload)?, AuthService::signature_audit).await
}
