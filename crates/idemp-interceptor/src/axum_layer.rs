//! Thin axum adapter: an `axum::middleware::from_fn_with_state`-compatible
//! function that builds an [`IdempotentRequest`] from the inbound request,
//! drives the engine, and either replays a stored response or lets `next`
//! run the downstream handler and captures what it produced.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http_body_util::BodyExt;

use crate::engine::{Interceptor, Outcome};
use crate::facade::{CapturedResponse, IdempotentRequest};

/// Axum middleware entry point. Wire with
/// `axum::middleware::from_fn_with_state(interceptor, idempotency_middleware)`.
pub async fn idempotency_middleware(
    State(interceptor): State<Arc<Interceptor>>,
    request: Request,
    next: Next,
) -> Response {
    let header_name = interceptor.config().header_name.clone();
    let (parts, body) = request.into_parts();
    let header_key = parts
        .headers
        .get(&header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => {
            return CapturedResponse::json_error(400, "Invalid request body").into_response();
        }
    };

    let (body_key, resource_id, quantity) = if parts.method == axum::http::Method::POST {
        extract_body_fields(&body_bytes, &header_name)
    } else {
        (None, None, None)
    };

    let idempotent_request = IdempotentRequest {
        header_key,
        body_key,
        resource_id,
        quantity,
    };

    let request = Request::from_parts(parts, Body::from(body_bytes));
    // The engine calls this closure at most once (it is `FnOnce`), matching
    // `next`'s own single-use contract.
    let outcome = interceptor
        .process(idempotent_request, move || async move {
            let response = next.run(request).await;
            capture_response(response).await
        })
        .await;

    match outcome {
        Outcome::Replayed(captured) | Outcome::Executed(captured) | Outcome::PassedThrough(captured) => {
            captured.into_response()
        }
        Outcome::Rejected(err) => rejection_response(err),
    }
}

async fn capture_response(response: Response) -> CapturedResponse {
    let (parts, body) = response.into_parts();
    let bytes = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    CapturedResponse::new(parts.status.as_u16(), bytes.to_vec(), headers)
}

fn extract_body_fields(bytes: &[u8], header_name: &str) -> (Option<String>, Option<String>, Option<u64>) {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(bytes) else {
        return (None, None, None);
    };
    let field_name = header_name.to_ascii_lowercase().replace('-', "_");
    let body_key = value
        .get(&field_name)
        .or_else(|| value.get("idempotency_key"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let resource_id = value
        .get("product_id")
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_u64().map(|n| n.to_string())));
    let quantity = value.get("quantity").and_then(|v| v.as_u64());
    (body_key, resource_id, quantity)
}

fn rejection_response(err: idemp_types::IdempotencyError) -> Response {
    use idemp_types::IdempotencyError::*;
    let status = err.status_code();
    let body = match &err {
        InvalidKey(_) => serde_json::json!({ "error": "Invalid idempotency key" }),
        Concurrent { retry_after_secs, .. } => serde_json::json!({
            "error": "Concurrent request detected",
            "retry_after": retry_after_secs,
        }),
        OverSell(reason) => serde_json::json!({ "error": reason.message() }),
        Backend(_) | Programmer(_) => serde_json::json!({ "error": "Internal server error" }),
    };
    CapturedResponse::new(status, body.to_string().into_bytes(), vec![
        ("content-type".to_string(), "application/json".to_string()),
    ])
    .into_response()
}

impl IntoResponse for CapturedResponse {
    fn into_response(self) -> Response {
        let mut builder = Response::builder().status(self.status);
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        builder
            .body(Body::from(self.body))
            .unwrap_or_else(|_| Response::new(Body::empty()))
    }
}
