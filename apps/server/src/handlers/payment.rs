use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
};
use serde_json::Value;
use std::sync::Arc;

use crate::{
    error::BookingError,
    models::WebhookQuery,
    payment::signature,
    AppState,
};

/// Event type and payment id, from the query string or else the JSON body.
fn event_of(query: &WebhookQuery, body: &[u8]) -> (Option<String>, Option<String>) {
    let body: Value = serde_json::from_slice(body).unwrap_or(Value::Null);

    let kind = query
        .event_kind()
        .map(str::to_string)
        .or_else(|| body["type"].as_str().map(str::to_string));
    let id = query.payment_id().map(str::to_string).or_else(|| match &body["data"]["id"] {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    (kind, id)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// POST /api/payments/webhook - payment provider notification.
///
/// 200 tells the provider to stop; 500 asks it to deliver again.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let (kind, payment_id) = event_of(&query, &body);

    if let Some(secret) = &state.webhook_secret {
        if let Err(e) = signature::verify(
            secret,
            header(&headers, "x-signature"),
            header(&headers, "x-request-id"),
            payment_id.as_deref().unwrap_or_default(),
        ) {
            tracing::warn!(payment_id = payment_id.as_deref().unwrap_or("-"), "Webhook rejected: {}", e);
            return StatusCode::UNAUTHORIZED;
        }
    }

    match state
        .confirmations
        .handle_notification(kind.as_deref(), payment_id.as_deref())
        .await
    {
        Ok(outcome) => {
            tracing::info!(payment_id = payment_id.as_deref().unwrap_or("-"), ?outcome, "Webhook processed");
            StatusCode::OK
        }
        Err(e) if e.is_retryable() || matches!(e, BookingError::Database(_)) => {
            tracing::error!(payment_id = payment_id.as_deref().unwrap_or("-"), "Webhook failed, provider will retry: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Err(e) => {
            tracing::error!(payment_id = payment_id.as_deref().unwrap_or("-"), "Webhook dropped: {}", e);
            StatusCode::OK
        }
    }
}
