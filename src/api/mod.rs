// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    models::{
        AddressesData, CheckNodeData, CheckNodeRequest, GetAddressesRequest, ResponseType,
        ServerType,
    },
    state::AppState,
};

pub mod health;
pub mod node;

pub fn router(state: AppState) -> Router {
    let peer_routes = Router::new()
        .route("/check-node", post(node::check_node))
        .route("/get-addresses", post(node::get_addresses))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .with_state(state);

    Router::new()
        .nest("/api", peer_routes)
        .nest("/health", health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        node::check_node,
        node::get_addresses,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            CheckNodeRequest,
            CheckNodeData,
            GetAddressesRequest,
            AddressesData,
            ResponseType,
            ServerType,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Peer", description = "Partner server protocol"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::config::Role;
    use crate::ledger::mock::MockLedger;
    use crate::relay::tests::test_relay;

    fn app(dir: &tempfile::TempDir) -> Router {
        let relay = test_relay(
            Role::Outgoing,
            Arc::new(MockLedger::new()),
            Arc::new(MockLedger::new()),
            dir,
        );
        router(AppState::new(Arc::new(relay)))
    }

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let dir = tempfile::tempdir().unwrap();
        let _ = app(&dir).into_make_service();
    }

    #[tokio::test]
    async fn malformed_body_gets_fail_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(&dir)
            .oneshot(
                Request::post("/api/check-node")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["type"], "FAIL");
        assert_eq!(body["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn get_addresses_round_trip_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(&dir)
            .oneshot(
                Request::post("/api/get-addresses")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"num_addresses": 2, "type": "SUBCHAIN", "account": "navrelay"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["type"], "SUCCESS");
        assert_eq!(body["data"]["addresses"].as_array().unwrap().len(), 2);
    }
}
