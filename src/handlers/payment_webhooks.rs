use axum::{extract::State, http::HeaderMap, http::StatusCode, response::Json};
use bytes::Bytes;
use serde::Serialize;
use tracing::info;

use crate::services::payments::{
    EVENT_ID_HEADER, RAZORPAY_SIGNATURE_HEADER, SIGNATURE_HEADER,
};
use crate::{errors::ServiceError, AppState};

#[derive(Debug, Serialize)]
pub struct WebhookAckBody {
    pub received: bool,
    pub outcome: &'static str,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// POST /api/v1/payments/webhook
///
/// Takes the raw body: the signature covers the exact bytes the gateway sent.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAckBody>), ServiceError> {
    let signature =
        header(&headers, SIGNATURE_HEADER).or_else(|| header(&headers, RAZORPAY_SIGNATURE_HEADER));
    let event_id = header(&headers, EVENT_ID_HEADER);

    let ack = state
        .services
        .payments
        .handle_webhook(&body, signature, event_id)
        .await?;

    info!(outcome = ack.as_str(), "payment webhook acknowledged");
    Ok((
        StatusCode::OK,
        Json(WebhookAckBody {
            received: true,
            outcome: ack.as_str(),
        }),
    ))
}
