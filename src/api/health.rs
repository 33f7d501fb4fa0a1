// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::ledger::Ledger;
use crate::state::AppState;

/// Readiness response with per-component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// "ok" or "degraded".
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// "ok" or "paused".
    pub relay: String,
    /// "ok", "lagging" or "unreachable".
    pub primary: String,
    pub secondary: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

async fn check_ledger(ledger: &Ledger) -> String {
    match ledger.sync_status().await {
        Ok(status) if status.is_within(ledger.sync_threshold()) => "ok",
        Ok(_) => "lagging",
        Err(_) => "unreachable",
    }
    .to_string()
}

/// Liveness probe. Always 200 while the process runs.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe: both ledgers synced and the relay not paused.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Relay is ready", body = ReadyResponse),
        (status = 503, description = "Relay is paused or a ledger is unavailable", body = ReadyResponse)
    )
)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let relay = &state.relay;
    let checks = HealthChecks {
        relay: if relay.state().is_paused() { "paused" } else { "ok" }.to_string(),
        primary: check_ledger(relay.primary()).await,
        secondary: check_ledger(relay.secondary()).await,
    };
    let all_ok = [&checks.relay, &checks.primary, &checks.secondary]
        .iter()
        .all(|c| c.as_str() == "ok");

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let response = ReadyResponse {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        checks,
    };
    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Role;
    use crate::ledger::mock::MockLedger;
    use crate::ledger::RpcError;
    use crate::relay::tests::test_relay;

    #[tokio::test]
    async fn ready_when_synced_and_running() {
        let dir = tempfile::tempdir().unwrap();
        let relay = test_relay(
            Role::Incoming,
            Arc::new(MockLedger::new()),
            Arc::new(MockLedger::new()),
            &dir,
        );
        let (status, Json(body)) = readiness(State(AppState::new(Arc::new(relay)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn degraded_when_paused_or_ledger_down() {
        let dir = tempfile::tempdir().unwrap();
        let relay = test_relay(
            Role::Incoming,
            Arc::new(MockLedger::new().heights(10, 20)),
            Arc::new(
                MockLedger::new()
                    .fail_always("getblockchaininfo", RpcError::Transport("down".into())),
            ),
            &dir,
        );
        relay.state().pause();

        let (status, Json(body)) = readiness(State(AppState::new(Arc::new(relay)))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.checks.relay, "paused");
        assert_eq!(body.checks.primary, "lagging");
        assert_eq!(body.checks.secondary, "unreachable");
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        let Json(body) = liveness().await;
        assert_eq!(body.status, "ok");
    }
}
