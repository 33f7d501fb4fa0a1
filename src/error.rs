// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::ledger::RpcError;
use crate::models::ResponseType;

/// Error answered to a peer.
///
/// Peers read the envelope `type`, so errors are sent with HTTP 200.
#[derive(Debug)]
pub struct ApiError {
    pub kind: ResponseType,
    pub code: &'static str,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: ResponseType,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// The request was invalid.
    pub fn fail(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ResponseType::Fail,
            code,
            message: message.into(),
        }
    }

    /// The request was valid but could not be served.
    pub fn failure(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ResponseType::Failure,
            code,
            message: message.into(),
        }
    }

    pub fn paused() -> Self {
        Self::failure("SERVER_PAUSED", "server is paused pending recovery")
    }
}

impl From<RpcError> for ApiError {
    fn from(error: RpcError) -> Self {
        Self::failure(error.code(), error.to_string())
    }
}

/// A body that does not parse is a rejected request, not a transport error.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::fail("INVALID_REQUEST", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            kind: self.kind,
            code: self.code,
            message: self.message,
        });
        (StatusCode::OK, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_kind_and_code() {
        let fail = ApiError::fail("MISSING_FIELD", "account is required");
        assert_eq!(fail.kind, ResponseType::Fail);
        assert_eq!(fail.code, "MISSING_FIELD");

        let failure = ApiError::from(RpcError::KeypoolRanOut);
        assert_eq!(failure.kind, ResponseType::Failure);
        assert_eq!(failure.code, "RPC_KEYPOOL_RAN_OUT");
    }

    #[tokio::test]
    async fn into_response_is_an_ok_envelope() {
        let response = ApiError::fail("MISSING_FIELD", "bad data").into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(
            body,
            r#"{"type":"FAIL","code":"MISSING_FIELD","message":"bad data"}"#
        );
    }
}
