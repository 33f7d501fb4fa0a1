// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Partner endpoints.
//!
//! Both handlers answer HTTP 200 with an envelope; a paused relay refuses
//! to hand out addresses so no new funds are routed to it.

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use chrono::Utc;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::models::{
    AddressesData, ApiResponse, CheckNodeData, CheckNodeRequest, GetAddressesRequest,
};
use crate::split::pick_addresses;
use crate::state::AppState;

/// Report balances, current public key, limits and fresh primary addresses.
#[utoipa::path(
    post,
    path = "/api/check-node",
    tag = "Peer",
    request_body = CheckNodeRequest,
    responses(
        (status = 200, description = "Node status envelope", body = CheckNodeData)
    )
)]
pub async fn check_node(
    State(state): State<AppState>,
    request: Result<Json<CheckNodeRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<CheckNodeData>>, ApiError> {
    let relay = &state.relay;
    if relay.state().is_paused() {
        return Err(ApiError::paused());
    }
    let Json(request) = request?;
    let settings = relay.settings();
    let count = request.num_addresses(settings.max_addresses_per_request)?;

    let primary = relay.primary();
    let nav_balance = primary.rpc().balance().await?;
    let sub_balance = relay.secondary().rpc().balance().await?;
    let now = Utc::now();
    let keys = relay.keys();
    let public_key = keys
        .prepare_current(now)
        .await
        .and_then(|_| keys.current_public_pem(now))
        .map_err(|e| ApiError::failure(e.code(), e.to_string()))?;

    let mut nav_addresses = Vec::with_capacity(count);
    for _ in 0..count {
        nav_addresses.push(primary.fresh_address(primary.account()).await?);
    }

    debug!(count, "check-node served");
    Ok(Json(ApiResponse::success(CheckNodeData {
        nav_balance,
        sub_balance,
        public_key,
        server_type: relay.role().into(),
        min_amount: settings.min_amount,
        max_amount: settings.max_amount,
        transaction_fee: settings.transaction_fee,
        server: settings.server.clone(),
        server_port: settings.server_port,
        md5: settings.md5.clone(),
        nav_addresses,
    })))
}

/// Hand out random secondary-ledger addresses of the service account.
#[utoipa::path(
    post,
    path = "/api/get-addresses",
    tag = "Peer",
    request_body = GetAddressesRequest,
    responses(
        (status = 200, description = "Address list envelope", body = AddressesData)
    )
)]
pub async fn get_addresses(
    State(state): State<AppState>,
    request: Result<Json<GetAddressesRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AddressesData>>, ApiError> {
    let relay = &state.relay;
    if relay.state().is_paused() {
        return Err(ApiError::paused());
    }
    let Json(request) = request?;
    let settings = relay.settings();
    let query = request.validate(settings.max_addresses_per_request)?;

    let secondary = relay.secondary();
    if query.account != secondary.account() {
        return Err(ApiError::fail(
            "UNKNOWN_ACCOUNT",
            format!("account {} is not served", query.account),
        ));
    }

    let mut known = secondary.rpc().addresses_by_account(&query.account).await?;
    while known.len() < query.num_addresses {
        known.push(secondary.fresh_address(&query.account).await?);
    }

    let picked = pick_addresses(
        &mut rand::thread_rng(),
        &known,
        query.num_addresses,
        settings.address_pick_attempts,
    );
    let addresses = picked.map_err(|e| {
        warn!(code = e.code(), error = %e, "could not pick addresses");
        ApiError::failure(e.code(), e.to_string())
    })?;

    Ok(Json(ApiResponse::success(AddressesData { addresses })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Role;
    use crate::keys::parse_public_key;
    use crate::ledger::mock::MockLedger;
    use crate::ledger::{Amount, RpcError};
    use crate::models::{ResponseType, ServerType};
    use crate::relay::tests::test_relay;

    fn state(
        role: Role,
        primary: MockLedger,
        secondary: MockLedger,
    ) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let relay = test_relay(role, Arc::new(primary), Arc::new(secondary), &dir);
        (AppState::new(Arc::new(relay)), dir)
    }

    fn check(n: usize) -> Result<Json<CheckNodeRequest>, JsonRejection> {
        Ok(Json(CheckNodeRequest {
            num_addresses: Some(n),
        }))
    }

    #[tokio::test]
    async fn check_node_reports_status_and_fresh_addresses() {
        let (state, _dir) = state(
            Role::Outgoing,
            MockLedger::new().balance(250.0),
            MockLedger::new().balance(3.0),
        );

        let Json(response) = check_node(State(state), check(4)).await.unwrap();

        assert_eq!(response.kind, ResponseType::Success);
        let data = response.data.unwrap();
        assert_eq!(data.server_type, ServerType::Outgoing);
        assert_eq!(data.nav_balance, Amount::from_coins(250.0));
        assert_eq!(data.sub_balance, Amount::from_coins(3.0));
        assert_eq!(data.nav_addresses.len(), 4);
        assert!(data.nav_addresses.iter().all(|a| a.starts_with("Nnavrelay")));
        assert!(parse_public_key(&data.public_key).is_ok());
    }

    #[tokio::test]
    async fn check_node_rejects_bad_counts() {
        let (state, _dir) = state(Role::Outgoing, MockLedger::new(), MockLedger::new());
        let err = check_node(State(state.clone()), check(0)).await.unwrap_err();
        assert_eq!(err.kind, ResponseType::Fail);
        assert_eq!(err.code, "INVALID_NUM_ADDRESSES");

        let err = check_node(State(state), Ok(Json(CheckNodeRequest::default())))
            .await
            .unwrap_err();
        assert_eq!(err.code, "MISSING_FIELD");
    }

    #[tokio::test]
    async fn ledger_failure_is_a_failure_envelope() {
        let (state, _dir) = state(
            Role::Outgoing,
            MockLedger::new().fail_always("getbalance", RpcError::Transport("down".into())),
            MockLedger::new(),
        );
        let err = check_node(State(state), check(2)).await.unwrap_err();
        assert_eq!(err.kind, ResponseType::Failure);
        assert_eq!(err.code, "RPC_TRANSPORT");
    }

    #[tokio::test]
    async fn paused_relay_refuses_requests() {
        let (state, _dir) = state(Role::Outgoing, MockLedger::new(), MockLedger::new());
        state.relay.state().pause();

        let err = check_node(State(state.clone()), check(2)).await.unwrap_err();
        assert_eq!(err.kind, ResponseType::Failure);
        assert_eq!(err.code, "SERVER_PAUSED");
        let err = get_addresses(
            State(state),
            Ok(Json(GetAddressesRequest::new(2, "navrelay"))),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "SERVER_PAUSED");
    }

    #[tokio::test]
    async fn get_addresses_picks_distinct_known_addresses() {
        let known: Vec<String> = (0..8).map(|i| format!("Sknown{i}")).collect();
        let (state, _dir) = state(
            Role::Outgoing,
            MockLedger::new(),
            MockLedger::new().account_addresses("navrelay", known.clone()),
        );

        let Json(response) = get_addresses(
            State(state),
            Ok(Json(GetAddressesRequest::new(5, "navrelay"))),
        )
        .await
        .unwrap();

        let mut addresses = response.data.unwrap().addresses;
        assert_eq!(addresses.len(), 5);
        assert!(addresses.iter().all(|a| known.contains(a)));
        addresses.sort();
        addresses.dedup();
        assert_eq!(addresses.len(), 5);
    }

    #[tokio::test]
    async fn get_addresses_tops_up_short_accounts() {
        let secondary = Arc::new(MockLedger::new());
        let dir = tempfile::tempdir().unwrap();
        let relay = test_relay(
            Role::Outgoing,
            Arc::new(MockLedger::new()),
            secondary.clone(),
            &dir,
        );
        let state = AppState::new(Arc::new(relay));

        let Json(response) = get_addresses(
            State(state),
            Ok(Json(GetAddressesRequest::new(3, "navrelay"))),
        )
        .await
        .unwrap();

        assert_eq!(response.data.unwrap().addresses.len(), 3);
        assert_eq!(secondary.calls("getnewaddress"), 3);
    }

    #[tokio::test]
    async fn get_addresses_serves_only_the_service_account() {
        let (state, _dir) = state(Role::Outgoing, MockLedger::new(), MockLedger::new());
        let err = get_addresses(
            State(state),
            Ok(Json(GetAddressesRequest::new(2, "someone-else"))),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ResponseType::Fail);
        assert_eq!(err.code, "UNKNOWN_ACCOUNT");
    }
}
