use url::Url;

use super::PreferenceRequest;
use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::Business,
    signing, AppState,
};

/// Credentials needed to issue a deposit preference.
#[derive(Debug, Clone, Copy)]
pub struct PaymentCredentials<'a> {
    pub webhook_secret: &'a str,
    pub access_token: &'a str,
}

/// Checks that online payments can be issued for `business`. Runs before the
/// appointment is inserted so configuration errors persist nothing.
pub fn ensure_ready<'a>(config: &'a Config, business: &'a Business) -> AppResult<PaymentCredentials<'a>> {
    let webhook_secret = config
        .webhook_secret
        .as_deref()
        .ok_or(AppError::MissingWebhookSecret)?;
    let access_token = business
        .payment_token()
        .ok_or(AppError::PaymentNotConfigured)?;
    Ok(PaymentCredentials {
        webhook_secret,
        access_token,
    })
}

/// Appointment data the deposit checkout is built from.
#[derive(Debug, Clone)]
pub struct DepositOrder {
    pub appointment_id: i64,
    pub customer_id: i64,
    pub service_name: String,
    pub deposit: i64,
    pub payer_email: Option<String>,
    pub cancellation_token: String,
}

/// Signed callback URL the provider notifies for this appointment.
pub fn notification_url(
    public_base_url: &str,
    secret: &str,
    appointment_id: i64,
    tenant_id: i64,
) -> AppResult<String> {
    let signature = signing::sign_callback(secret, appointment_id, tenant_id);
    let url = Url::parse_with_params(
        &format!("{public_base_url}/api/webhooks/mercadopago"),
        &[
            ("appointment_id", appointment_id.to_string()),
            ("tenant_id", tenant_id.to_string()),
            ("signature", signature),
        ],
    )
    .map_err(|e| AppError::InvalidField(format!("PUBLIC_BASE_URL inválida: {e}")))?;
    Ok(url.into())
}

/// Create the deposit checkout, store its id on the appointment and return
/// the redirect URL.
pub async fn issue_deposit_preference(
    state: &AppState,
    business: &Business,
    order: &DepositOrder,
) -> AppResult<String> {
    let credentials = ensure_ready(&state.config, business)?;
    let notification_url = notification_url(
        &state.config.public_base_url,
        credentials.webhook_secret,
        order.appointment_id,
        business.id,
    )?;
    let back_base = state
        .config
        .webapp_url
        .as_deref()
        .unwrap_or(&state.config.public_base_url);

    let request = PreferenceRequest {
        appointment_id: order.appointment_id,
        tenant_id: business.id,
        customer_id: order.customer_id,
        title: format!("Seña: {}", order.service_name),
        amount: order.deposit,
        currency: state.config.currency.clone(),
        payer_email: order.payer_email.clone(),
        notification_url,
        back_url: format!("{}/turnos/{}", back_base.trim_end_matches('/'), order.appointment_id),
        cancellation_token: order.cancellation_token.clone(),
    };

    let preference = state
        .payments
        .create_preference(credentials.access_token, &request)
        .await
        .map_err(|e| AppError::PaymentPreferenceFailed {
            appointment_id: order.appointment_id,
            reason: e.to_string(),
        })?;

    sqlx::query("UPDATE appointments SET mp_preference_id = ? WHERE id = ?")
        .bind(&preference.id)
        .bind(order.appointment_id)
        .execute(&state.db)
        .await?;

    Ok(preference.init_point)
}
