//! Mock settlement partner API for local development. First submission of
//! an external id settles and returns 200; replays return 400 with the
//! duplicate message and the original payment data, matching the real
//! partner's idempotency contract.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use expensed::Result;

const DUPLICATE_ID_MESSAGE: &str = "external id already exists";

#[derive(Clone, Default)]
pub struct StubState {
    // external_id -> generated payment id
    payments: Arc<DashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct PaymentRequest {
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    external_id: String,
}

#[derive(Debug, Serialize, Default)]
struct PaymentData {
    id: String,
    external_id: String,
    status: String,
}

#[derive(Debug, Serialize)]
struct PaymentResponse {
    data: PaymentData,
    #[serde(skip_serializing_if = "String::is_empty")]
    message: String,
}

pub fn router() -> Router {
    Router::new()
        .route("/v1/payments", post(create_payment))
        .with_state(StubState::default())
}

/// Serve the stub until `shutdown` resolves.
pub async fn serve(port: u16, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "mock payment partner listening");

    axum::serve(listener, router())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn create_payment(
    State(state): State<StubState>,
    Json(request): Json<PaymentRequest>,
) -> (StatusCode, Json<PaymentResponse>) {
    if request.external_id.is_empty() || request.amount <= 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(PaymentResponse {
                data: PaymentData::default(),
                message: "missing required fields".to_string(),
            }),
        );
    }

    let entry = state.payments.entry(request.external_id.clone());
    match entry {
        dashmap::mapref::entry::Entry::Occupied(existing) => (
            StatusCode::BAD_REQUEST,
            Json(PaymentResponse {
                data: PaymentData {
                    id: existing.get().clone(),
                    external_id: request.external_id,
                    status: "success".to_string(),
                },
                message: DUPLICATE_ID_MESSAGE.to_string(),
            }),
        ),
        dashmap::mapref::entry::Entry::Vacant(vacant) => {
            let id = Uuid::new_v4().to_string();
            vacant.insert(id.clone());
            info!(external_id = %request.external_id, payment_id = %id, "payment settled");

            (
                StatusCode::OK,
                Json(PaymentResponse {
                    data: PaymentData {
                        id,
                        external_id: request.external_id,
                        status: "success".to_string(),
                    },
                    message: String::new(),
                }),
            )
        }
    }
}
