// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # HTTP API
//!
//! Every protocol operation is a `POST` under `/rest/v2` taking
//! `{"requestObject": ...}` and answering `{"status": "OK", "responseObject": ...}`.
//! Failures answer HTTP 400 with an `ERROR` envelope carrying the error code.
//!
//! Engine calls block on the store and on activation row locks, so handlers
//! run them on the blocking pool.

use axum::{
    extract::rejection::JsonRejection,
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    engine::AuthService,
    error::{ApiError, ErrorEntry, ErrorEnvelope, ServiceError, ServiceResult},
    models::{RestRequest, RestResponse},
    state::AppState,
};

pub mod activation;
pub mod encryption;
pub mod health;
pub mod signature;
pub mod token;
pub mod vault;

pub const API_PREFIX: &str = "/rest/v2";

pub fn router(state: AppState) -> Router {
    let rest_routes = Router::new()
        // Activation
        .route("/activation/init", post(activation::init_activation))
        .route("/activation/prepare", post(activation::prepare_activation))
        .route("/activation/create", post(activation::create_activation))
        .route("/activation/commit", post(activation::commit_activation))
        .route("/activation/status", post(activation::activation_status))
        .route("/activation/remove", post(activation::remove_activation))
        .route("/activation/block", post(activation::block_activation))
        .route("/activation/unblock", post(activation::unblock_activation))
        .route("/activation/list", post(activation::activation_list))
        .route("/activation/history", post(activation::activation_history))
        // Signatures
        .route("/signature/verify", post(signature::verify_signature))
        .route(
            "/signature/offline/personalized/create",
            post(signature::create_personalized_offline_payload),
        )
        .route(
            "/signature/offline/non-personalized/create",
            post(signature::create_non_personalized_offline_payload),
        )
        .route("/signature/offline/verify", post(signature::verify_offline_signature))
        .route("/signature/ecdsa/verify", post(signature::verify_ecdsa_signature))
        .route("/signature/list", post(signature::signature_audit))
        // Vault
        .route("/vault/unlock", post(vault::vault_unlock))
        // Encryption
        .route(
            "/activation/encryption/key/create",
            post(encryption::activation_encryption_key),
        )
        .route(
            "/application/encryption/key/create",
            post(encryption::application_encryption_key),
        )
        // Tokens
        .route("/token/create", post(token::create_token))
        .route("/token/validate", post(token::validate_token))
        .route("/token/remove", post(token::remove_token));

    let health_routes = Router::new()
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    Router::new()
        .nest(API_PREFIX, rest_routes)
        .merge(health_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

/// Unwrap `requestObject`, reporting malformed JSON as an `ERROR` envelope.
pub(crate) fn request_object<T>(
    payload: Result<Json<RestRequest<T>>, JsonRejection>,
) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body.request_object)
        .map_err(|rejection| {
            tracing::debug!(error = %rejection, "Malformed request body");
            ApiError::bad_request(rejection.body_text())
        })
}

/// Run one service operation on the blocking pool and wrap its result.
pub(crate) async fn call<Req, Res>(
    state: &AppState,
    request: Req,
    operation: fn(&AuthService, Req) -> ServiceResult<Res>,
) -> Result<Json<RestResponse<Res>>, ApiError>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    let service = state.service.clone();
    let response = tokio::task::spawn_blocking(move || operation(&service, request))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Service task failed");
            ApiError::from(ServiceError::UnknownError)
        })??;
    Ok(Json(RestResponse::ok(response)))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        activation::init_activation,
        activation::prepare_activation,
        activation::create_activation,
        activation::commit_activation,
        activation::activation_status,
        activation::remove_activation,
        activation::block_activation,
        activation::unblock_activation,
        activation::activation_list,
        activation::activation_history,
        signature::verify_signature,
        signature::create_personalized_offline_payload,
        signature::create_non_personalized_offline_payload,
        signature::verify_offline_signature,
        signature::verify_ecdsa_signature,
        signature::signature_audit,
        vault::vault_unlock,
        encryption::activation_encryption_key,
        encryption::application_encryption_key,
        token::create_token,
        token::validate_token,
        token::remove_token,
        health::liveness,
        health::readiness
    ),
    components(schemas(ErrorEnvelope, ErrorEntry)),
    tags(
        (name = "Activation", description = "Device pairing and activation lifecycle"),
        (name = "Signature", description = "Request signatures, offline payloads and audit"),
        (name = "Vault", description = "Vault unlock"),
        (name = "Encryption", description = "End-to-end transport keys"),
        (name = "Token", description = "Lightweight bearer tokens"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApplicationBootstrap, EngineConfig};
    use crate::crypto::P256CryptoProvider;
    use crate::storage::Store;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app() -> (Router, AuthService, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("auth.redb"), Duration::from_secs(1)).unwrap();
        let service = AuthService::new(
            Arc::new(store),
            Arc::new(P256CryptoProvider::new()),
            EngineConfig::default(),
        );
        (router(AppState::new(service.clone())), service, dir)
    }

    async fn post_json(app: Router, path: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(format!("{API_PREFIX}{path}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    const ROUTES: [&str; 22] = [
        "/activation/init",
        "/activation/prepare",
        "/activation/create",
        "/activation/commit",
        "/activation/status",
        "/activation/remove",
        "/activation/block",
        "/activation/unblock",
        "/activation/list",
        "/activation/history",
        "/signature/verify",
        "/signature/offline/personalized/create",
        "/signature/offline/non-personalized/create",
        "/signature/offline/verify",
        "/signature/ecdsa/verify",
        "/signature/list",
        "/vault/unlock",
        "/activation/encryption/key/create",
        "/application/encryption/key/create",
        "/token/create",
        "/token/validate",
        "/token/remove",
    ];

    #[tokio::test]
    async fn every_operation_is_routed_and_documented() {
        let (app, _service, _dir) = app();
        for path in ROUTES {
            let (status, body) = post_json(app.clone(), path, json!({})).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{path}");
            assert_eq!(body["responseObject"][0]["code"], "INVALID_REQUEST", "{path}");
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api-doc/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        for path in ROUTES {
            assert!(
                doc["paths"].get(format!("{API_PREFIX}{path}")).is_some(),
                "{path} missing from OpenAPI document"
            );
        }
        assert!(doc["paths"].get("/health/ready").is_some());
    }

    #[tokio::test]
    async fn init_returns_ok_envelope() {
        let (app, service, _dir) = app();
        let application = service
            .applications()
            .ensure_application(&ApplicationBootstrap::default())
            .unwrap();

        let (status, body) = post_json(
            app,
            "/activation/init",
            json!({"requestObject": {"applicationId": application.application_id, "userId": "u1"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OK");
        assert_eq!(body["responseObject"]["userId"], "u1");
        assert_eq!(
            body["responseObject"]["activationIdShort"].as_str().unwrap().len(),
            11
        );
    }

    #[tokio::test]
    async fn domain_errors_use_error_envelope() {
        let (app, _service, _dir) = app();
        let (status, body) = post_json(
            app,
            "/activation/commit",
            json!({"requestObject": {"activationId": "missing"}}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "ERROR");
        assert_eq!(body["responseObject"][0]["code"], "ACTIVATION_NOT_FOUND");
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let (app, _service, _dir) = app();
        let (status, body) = post_json(app, "/token/validate", json!({"tokenId": "t"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["responseObject"][0]["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn liveness_is_ok() {
        let (app, _service, _dir) = app();
        let response = app
            .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
