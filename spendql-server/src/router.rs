use crate::{Gateway, Phase};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use spendql_core::SpendqlError;
use spendql_graphlette::{error_body, response_body};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// `POST /graphql` and `GET /health`, both served through `gateway`.
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/graphql", post(graphql))
        .route("/health", get(health))
        .with_state(gateway)
        .layer(cors)
}

async fn graphql(State(gateway): State<Arc<Gateway>>, body: axum::body::Bytes) -> Response {
    let request: async_graphql::Request = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(error_body(e))).into_response(),
    };

    match gateway.execute(request).await {
        Ok(response) => Json(response_body(&response)).into_response(),
        Err(e @ SpendqlError::NotReady(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(error_body(e))).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error_body(e))).into_response()
        }
    }
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Response {
    let phase = gateway.phase().await;
    let status = if phase == Phase::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(serde_json::json!({ "status": phase.as_str() }))).into_response()
}
