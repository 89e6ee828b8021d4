//! Mercado Pago webhook reconciliation.
//!
//! Notifications arrive in several shapes (query-only IPN, JSON body with
//! `type`/`data.id`, legacy `topic`/`resource`). They are reduced to a
//! [`RawEvent`], classified, and the authoritative state is fetched from the
//! provider before anything is written. Payload amounts are never trusted.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::{
    models::{Appointment, AppointmentStatus, Business, Invoice, PaymentStatus},
    payments::{is_resource_id, ProviderError},
    signing, AppState,
};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("provider lookup failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("MP_PLATFORM_ACCESS_TOKEN is not configured")]
    MissingPlatformToken,
    #[error("WEBHOOK_SECRET is not configured")]
    MissingWebhookSecret,
    #[error("invalid callback signature for appointment {appointment_id}")]
    InvalidSignature { appointment_id: i64 },
    #[error("tenant {0} has no connected payment account")]
    PaymentNotConfigured(i64),
    #[error("appointment {0} not found for tenant")]
    AppointmentNotFound(i64),
    #[error("could not resolve tenant for {0}")]
    UnresolvedTenant(String),
}

/// Topic and resource id pulled out of a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    pub topic: Option<String>,
    pub resource_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Payment,
    RecurringPayment,
    SubscriptionLifecycle,
    Unknown,
}

/// Signed deposit callback parameters carried on the notification URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositCallback {
    pub appointment_id: i64,
    pub tenant_id: i64,
    pub signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceState {
    Paid,
    Pending,
    Overdue,
}

impl InvoiceState {
    /// Maps a provider payment status. Unknown statuses stay pending.
    pub fn from_provider(status: &str) -> Self {
        match status {
            "approved" => InvoiceState::Paid,
            "rejected" | "cancelled" | "refunded" | "charged_back" => InvoiceState::Overdue,
            _ => InvoiceState::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceState::Paid => "paid",
            InvoiceState::Pending => "pending",
            InvoiceState::Overdue => "overdue",
        }
    }
}

/// Subscription status for a preapproval status.
pub fn subscription_status(preapproval_status: &str) -> &'static str {
    match preapproval_status {
        "authorized" => "active",
        "paused" => "paused",
        "cancelled" => "cancelled",
        _ => "pending",
    }
}

#[derive(Debug)]
pub enum Outcome {
    DepositApplied {
        appointment_id: i64,
        payment_status: PaymentStatus,
    },
    InvoiceUpserted(Invoice),
    SubscriptionUpdated {
        tenant_id: i64,
        status: &'static str,
    },
    Ignored(&'static str),
}

// ── Extraction ──

fn json_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn body_str<'a>(body: Option<&'a Value>, key: &str) -> Option<&'a str> {
    body?.get(key)?.as_str().filter(|s| !s.is_empty())
}

/// Topic implied by a resource URL such as `/v1/payments/123`.
fn resource_topic(resource: &str) -> Option<&'static str> {
    if resource.contains("authorized_payments") {
        Some("authorized_payment")
    } else if resource.contains("preapproval") {
        Some("preapproval")
    } else if resource.contains("payments") {
        Some("payment")
    } else {
        None
    }
}

pub fn extract_event(query: &HashMap<String, String>, body: Option<&Value>) -> RawEvent {
    let q = |key: &str| query.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
    let resource = body_str(body, "resource");

    let topic = q("type")
        .or_else(|| q("topic"))
        .map(str::to_string)
        .or_else(|| body_str(body, "type").map(str::to_string))
        .or_else(|| body_str(body, "topic").map(str::to_string))
        .or_else(|| {
            body_str(body, "action")
                .and_then(|action| action.split('.').next())
                .filter(|prefix| !prefix.is_empty())
                .map(str::to_string)
        })
        .or_else(|| resource.and_then(resource_topic).map(str::to_string));

    let resource_id = q("data.id")
        .or_else(|| q("id"))
        .map(str::to_string)
        .or_else(|| body.and_then(|b| b.get("data")?.get("id")).and_then(json_id))
        .or_else(|| body.and_then(|b| b.get("resource_id")).and_then(json_id))
        .or_else(|| body.and_then(|b| b.get("id")).and_then(json_id))
        .or_else(|| {
            resource
                .and_then(|r| r.trim_end_matches('/').rsplit('/').next())
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
        })
        .filter(|id| is_resource_id(id));

    RawEvent { topic, resource_id }
}

/// Recurring charges are matched first: `subscription_authorized_payment`
/// would otherwise fall through to a plain payment.
pub fn classify(topic: &str) -> EventKind {
    let topic = topic.to_ascii_lowercase();
    if topic.contains("authorized_payment") {
        EventKind::RecurringPayment
    } else if topic.contains("preapproval") {
        EventKind::SubscriptionLifecycle
    } else if topic.contains("payment") {
        EventKind::Payment
    } else {
        EventKind::Unknown
    }
}

pub fn deposit_callback(query: &HashMap<String, String>) -> Option<DepositCallback> {
    Some(DepositCallback {
        appointment_id: query.get("appointment_id")?.trim().parse().ok()?,
        tenant_id: query.get("tenant_id")?.trim().parse().ok()?,
        signature: query.get("signature")?.trim().to_string(),
    })
}

/// Platform billing reference `"{tenant_id}|{plan}"`; the plan is optional.
pub fn parse_external_reference(reference: &str) -> Option<(i64, Option<String>)> {
    let mut parts = reference.splitn(2, '|');
    let tenant_id = parts.next()?.trim().parse().ok()?;
    let plan = parts
        .next()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    Some((tenant_id, plan))
}

// ── Entry point ──

pub async fn handle_notification(
    state: &AppState,
    query: &HashMap<String, String>,
    body: Option<&Value>,
    now: DateTime<Utc>,
) -> Result<Outcome, ReconcileError> {
    let event = extract_event(query, body);
    let Some(topic) = event.topic.as_deref() else {
        return Ok(Outcome::Ignored("no event type"));
    };
    let kind = classify(topic);
    let Some(resource_id) = event.resource_id.as_deref() else {
        return Ok(Outcome::Ignored("no resource id"));
    };

    tracing::info!("Webhook {} ({:?}) resource={}", topic, kind, resource_id);

    match kind {
        EventKind::Payment => match deposit_callback(query) {
            Some(callback) => apply_deposit_payment(state, &callback, resource_id).await,
            None => apply_platform_payment(state, resource_id, now).await,
        },
        EventKind::RecurringPayment => apply_recurring_payment(state, resource_id, now).await,
        EventKind::SubscriptionLifecycle => apply_subscription(state, resource_id).await,
        EventKind::Unknown => Ok(Outcome::Ignored("unhandled event type")),
    }
}

// ── Deposits ──

async fn apply_deposit_payment(
    state: &AppState,
    callback: &DepositCallback,
    payment_id: &str,
) -> Result<Outcome, ReconcileError> {
    let secret = state
        .config
        .webhook_secret
        .as_deref()
        .ok_or(ReconcileError::MissingWebhookSecret)?;
    if !signing::verify_callback(
        secret,
        callback.appointment_id,
        callback.tenant_id,
        &callback.signature,
    ) {
        return Err(ReconcileError::InvalidSignature {
            appointment_id: callback.appointment_id,
        });
    }

    let business = sqlx::query_as::<_, Business>("SELECT * FROM businesses WHERE id = ?")
        .bind(callback.tenant_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(ReconcileError::PaymentNotConfigured(callback.tenant_id))?;
    let token = business
        .payment_token()
        .ok_or(ReconcileError::PaymentNotConfigured(callback.tenant_id))?;

    let payment = state.payments.get_payment(token, payment_id).await?;
    if payment
        .appointment_id
        .is_some_and(|id| id != callback.appointment_id)
    {
        tracing::warn!(
            appointment_id = callback.appointment_id,
            "payment {} belongs to another appointment, ignoring",
            payment.id
        );
        return Ok(Outcome::Ignored("payment metadata mismatch"));
    }
    if InvoiceState::from_provider(&payment.status) != InvoiceState::Paid {
        tracing::info!(
            appointment_id = callback.appointment_id,
            "deposit payment {} is {}",
            payment.id,
            payment.status
        );
        return Ok(Outcome::Ignored("payment not approved"));
    }

    let appointment = sqlx::query_as::<_, Appointment>(
        "SELECT * FROM appointments WHERE id = ? AND tenant_id = ?",
    )
    .bind(callback.appointment_id)
    .bind(callback.tenant_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(ReconcileError::AppointmentNotFound(callback.appointment_id))?;

    if appointment.status == AppointmentStatus::Cancelled.as_str() {
        tracing::warn!(
            appointment_id = appointment.id,
            "approved deposit {} for a cancelled appointment",
            payment.id
        );
        return Ok(Outcome::Ignored("appointment cancelled"));
    }

    let price: i64 = sqlx::query_scalar("SELECT price FROM services WHERE id = ?")
        .bind(appointment.service_id)
        .fetch_one(&state.db)
        .await?;

    let paid_amount = appointment.paid_amount.max(payment.amount);
    let payment_status = if paid_amount >= price {
        PaymentStatus::Paid
    } else {
        PaymentStatus::Partial
    };

    sqlx::query(
        "UPDATE appointments
         SET status = CASE WHEN status = ? THEN ? ELSE status END,
             payment_status = ?, paid_amount = ?, mp_payment_id = ?
         WHERE id = ?",
    )
    .bind(AppointmentStatus::Pending.as_str())
    .bind(AppointmentStatus::Confirmed.as_str())
    .bind(payment_status.as_str())
    .bind(paid_amount)
    .bind(&payment.id)
    .bind(appointment.id)
    .execute(&state.db)
    .await?;

    tracing::info!(
        appointment_id = callback.appointment_id,
        "Deposit {} applied: {} paid",
        payment.id,
        paid_amount
    );
    Ok(Outcome::DepositApplied {
        appointment_id: callback.appointment_id,
        payment_status,
    })
}

// ── Platform billing ──

fn platform_token(state: &AppState) -> Result<&str, ReconcileError> {
    state
        .config
        .mp_platform_access_token
        .as_deref()
        .ok_or(ReconcileError::MissingPlatformToken)
}

struct InvoiceDraft<'a> {
    tenant_id: i64,
    provider_payment_id: &'a str,
    provider_subscription_id: Option<&'a str>,
    amount: i64,
    currency: &'a str,
    state: InvoiceState,
    paid_at: Option<String>,
}

/// Keyed on the provider payment id so duplicate deliveries update one row.
/// A paid invoice never goes back to another state.
async fn upsert_invoice(
    db: &sqlx::SqlitePool,
    draft: &InvoiceDraft<'_>,
    now: DateTime<Utc>,
) -> Result<Invoice, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(
        "INSERT INTO invoices
            (tenant_id, provider_payment_id, provider_subscription_id, amount, currency, state, issued_at, paid_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(provider_payment_id) DO UPDATE SET
            provider_subscription_id = COALESCE(excluded.provider_subscription_id, invoices.provider_subscription_id),
            amount = excluded.amount,
            currency = excluded.currency,
            state = CASE WHEN invoices.state = 'paid' THEN 'paid' ELSE excluded.state END,
            paid_at = COALESCE(invoices.paid_at, excluded.paid_at)
         RETURNING id, tenant_id, provider_payment_id, provider_subscription_id,
                   amount, currency, state, issued_at, paid_at",
    )
    .bind(draft.tenant_id)
    .bind(draft.provider_payment_id)
    .bind(draft.provider_subscription_id)
    .bind(draft.amount)
    .bind(draft.currency)
    .bind(draft.state.as_str())
    .bind(now.to_rfc3339())
    .bind(draft.paid_at.as_deref())
    .fetch_one(db)
    .await
}

/// Tenant owning a platform charge: subscription id first, then the
/// `tenant|plan` external reference.
async fn resolve_tenant(
    db: &sqlx::SqlitePool,
    subscription_id: Option<&str>,
    external_reference: Option<&str>,
) -> Result<i64, ReconcileError> {
    if let Some(subscription_id) = subscription_id {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT id FROM businesses WHERE mp_preapproval_id = ?")
                .bind(subscription_id)
                .fetch_optional(db)
                .await?;
        if let Some(id) = found {
            return Ok(id);
        }
    }

    let reference = external_reference.unwrap_or_default();
    if let Some((tenant_id, _)) = parse_external_reference(reference) {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM businesses WHERE id = ?")
            .bind(tenant_id)
            .fetch_optional(db)
            .await?;
        if let Some(id) = exists {
            return Ok(id);
        }
    }

    Err(ReconcileError::UnresolvedTenant(
        subscription_id.unwrap_or(reference).to_string(),
    ))
}

fn plan_from(reference: Option<&str>) -> Option<String> {
    reference.and_then(parse_external_reference).and_then(|(_, plan)| plan)
}

async fn activate_subscription(
    db: &sqlx::SqlitePool,
    tenant_id: i64,
    plan: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE businesses
         SET subscription_status = 'active', subscription_plan = COALESCE(?, subscription_plan)
         WHERE id = ?",
    )
    .bind(plan)
    .bind(tenant_id)
    .execute(db)
    .await?;
    tracing::info!(tenant_id, "Subscription activated (plan {:?})", plan);
    Ok(())
}

async fn apply_platform_payment(
    state: &AppState,
    payment_id: &str,
    now: DateTime<Utc>,
) -> Result<Outcome, ReconcileError> {
    let token = platform_token(state)?;
    let payment = state.payments.get_payment(token, payment_id).await?;
    let tenant_id = resolve_tenant(
        &state.db,
        payment.subscription_id.as_deref(),
        payment.external_reference.as_deref(),
    )
    .await?;

    let invoice_state = InvoiceState::from_provider(&payment.status);
    let paid_at = (invoice_state == InvoiceState::Paid)
        .then(|| payment.date_approved.clone().unwrap_or_else(|| now.to_rfc3339()));
    let draft = InvoiceDraft {
        tenant_id,
        provider_payment_id: &payment.id,
        provider_subscription_id: payment.subscription_id.as_deref(),
        amount: payment.amount,
        currency: payment.currency.as_deref().unwrap_or(&state.config.currency),
        state: invoice_state,
        paid_at,
    };
    let invoice = upsert_invoice(&state.db, &draft, now).await?;

    if invoice_state == InvoiceState::Paid {
        let plan = plan_from(payment.external_reference.as_deref());
        activate_subscription(&state.db, tenant_id, plan.as_deref()).await?;
    }
    Ok(Outcome::InvoiceUpserted(invoice))
}

async fn apply_recurring_payment(
    state: &AppState,
    charge_id: &str,
    now: DateTime<Utc>,
) -> Result<Outcome, ReconcileError> {
    let token = platform_token(state)?;
    let charge = state.payments.get_authorized_payment(token, charge_id).await?;
    let tenant_id = resolve_tenant(
        &state.db,
        charge.preapproval_id.as_deref(),
        charge.external_reference.as_deref(),
    )
    .await?;

    let invoice_state = InvoiceState::from_provider(&charge.status);
    let paid_at = (invoice_state == InvoiceState::Paid)
        .then(|| charge.date_approved.clone().unwrap_or_else(|| now.to_rfc3339()));
    // The same charge also arrives as a plain payment event; both must land
    // on the invoice keyed by the underlying payment id.
    let draft = InvoiceDraft {
        tenant_id,
        provider_payment_id: charge.payment_id.as_deref().unwrap_or(&charge.id),
        provider_subscription_id: charge.preapproval_id.as_deref(),
        amount: charge.amount,
        currency: charge.currency.as_deref().unwrap_or(&state.config.currency),
        state: invoice_state,
        paid_at,
    };
    let invoice = upsert_invoice(&state.db, &draft, now).await?;

    if invoice_state == InvoiceState::Paid {
        let plan = plan_from(charge.external_reference.as_deref());
        activate_subscription(&state.db, tenant_id, plan.as_deref()).await?;
    }
    Ok(Outcome::InvoiceUpserted(invoice))
}

async fn apply_subscription(
    state: &AppState,
    preapproval_id: &str,
) -> Result<Outcome, ReconcileError> {
    let token = platform_token(state)?;
    let preapproval = state.payments.get_preapproval(token, preapproval_id).await?;
    let tenant_id = resolve_tenant(
        &state.db,
        Some(&preapproval.id),
        preapproval.external_reference.as_deref(),
    )
    .await?;

    let status = subscription_status(&preapproval.status);
    let plan = plan_from(preapproval.external_reference.as_deref());
    sqlx::query(
        "UPDATE businesses
         SET subscription_status = ?, subscription_plan = COALESCE(?, subscription_plan),
             mp_preapproval_id = ?
         WHERE id = ?",
    )
    .bind(status)
    .bind(plan.as_deref())
    .bind(&preapproval.id)
    .bind(tenant_id)
    .execute(&state.db)
    .await?;

    tracing::info!(
        tenant_id,
        "Subscription {} is now {} ({})",
        preapproval.id,
        status,
        preapproval.reason.as_deref().unwrap_or("-")
    );
    Ok(Outcome::SubscriptionUpdated { tenant_id, status })
}
