use axum::{
    body::Bytes,
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    reconcile::{self, Outcome, ReconcileError},
    AppState,
};

/// GET|POST /api/webhooks/mercadopago
///
/// Always acknowledged with 200 so the provider does not retry forever;
/// failures are logged and left for the next delivery.
pub async fn mercadopago(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Json<Value> {
    let payload: Option<Value> = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Webhook body is not JSON: {}", e);
                None
            }
        }
    };

    match reconcile::handle_notification(&state, &query, payload.as_ref(), Utc::now()).await {
        Ok(Outcome::Ignored(reason)) => tracing::info!("Webhook ignored: {}", reason),
        Ok(Outcome::DepositApplied {
            appointment_id,
            payment_status,
        }) => tracing::info!(appointment_id, "Deposit reconciled ({:?})", payment_status),
        Ok(Outcome::InvoiceUpserted(invoice)) => tracing::info!(
            tenant_id = invoice.tenant_id,
            "Invoice {} is {}",
            invoice.provider_payment_id,
            invoice.state
        ),
        Ok(Outcome::SubscriptionUpdated { tenant_id, status }) => {
            tracing::info!(tenant_id, "Subscription status {}", status)
        }
        Err(
            e @ (ReconcileError::Database(_)
            | ReconcileError::MissingWebhookSecret
            | ReconcileError::MissingPlatformToken),
        ) => tracing::error!("Webhook processing failed: {}", e),
        Err(e) => tracing::warn!("Webhook not applied: {}", e),
    }

    Json(json!({ "received": true }))
}
