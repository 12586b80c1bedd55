//! Toy business handlers the idempotency middleware sits in front of. Both
//! are deliberately trivial: the point of this sample is the middleware's
//! behavior, not the handlers'.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// In-process order counter, standing in for a real order-creation service.
pub struct AppState {
    next_order_id: AtomicU64,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            next_order_id: AtomicU64::new(1),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub quantity: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: u64,
    pub product_id: Option<String>,
    pub quantity: Option<u64>,
}

/// `POST /orders` — creates an order and returns its id. Exercises the
/// baseline replay behavior with no oversell guard involved.
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> (StatusCode, Json<CreateOrderResponse>) {
    let order_id = state.next_order_id.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order_id,
            product_id: req.product_id,
            quantity: req.quantity,
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub product_id: String,
    pub quantity: u64,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_id: u64,
    pub product_id: String,
    pub quantity: u64,
}

/// `POST /checkout` — the middleware's oversell guard has already reserved
/// `quantity` units of `product_id` by the time this handler runs; it only
/// has to record the order. A non-2xx return here triggers the middleware's
/// compensating restock.
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckoutRequest>,
) -> (StatusCode, Json<CheckoutResponse>) {
    // A magic product id lets integration tests force a downstream failure
    // after the oversell guard has already reserved stock, to exercise the
    // middleware's compensating restock.
    if req.product_id == "force-failure" {
        let order_id = state.next_order_id.fetch_add(1, Ordering::SeqCst);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(CheckoutResponse {
                order_id,
                product_id: req.product_id,
                quantity: req.quantity,
            }),
        );
    }
    let order_id = state.next_order_id.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::CREATED,
        Json(CheckoutResponse {
            order_id,
            product_id: req.product_id,
            quantity: req.quantity,
        }),
    )
}
