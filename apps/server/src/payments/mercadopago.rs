//! Mercado Pago REST adapter.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    is_resource_id, AuthorizedPaymentInfo, PaymentInfo, PaymentProvider, PreapprovalInfo,
    Preference, PreferenceRequest, ProviderError,
};

pub struct MercadoPago {
    client: reqwest::Client,
    api_base: String,
}

impl MercadoPago {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.into(),
        })
    }

    async fn get_resource(
        &self,
        access_token: &str,
        collection: &str,
        id: &str,
    ) -> Result<Value, ProviderError> {
        if !is_resource_id(id) {
            return Err(ProviderError::Malformed(format!("invalid resource id {id:?}")));
        }
        let path = format!("{collection}/{id}");
        let resp = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(access_token)
            .send()
            .await?;
        read_json(resp, &path).await
    }
}

async fn read_json(resp: reqwest::Response, what: &str) -> Result<Value, ProviderError> {
    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound(what.to_string()));
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!("Mercado Pago {} returned {}: {}", what, status, body);
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json().await?)
}

#[async_trait]
impl PaymentProvider for MercadoPago {
    async fn create_preference(
        &self,
        access_token: &str,
        request: &PreferenceRequest,
    ) -> Result<Preference, ProviderError> {
        let resp = self
            .client
            .post(format!("{}/checkout/preferences", self.api_base))
            .bearer_auth(access_token)
            .header("X-Idempotency-Key", format!("deposit-{}", request.appointment_id))
            .json(&preference_body(request))
            .send()
            .await?;

        let json = read_json(resp, "checkout/preferences").await?;
        let preference = parse_preference(&json)?;
        tracing::info!(
            appointment_id = request.appointment_id,
            "Mercado Pago preference created: {}",
            preference.id
        );
        Ok(preference)
    }

    async fn get_payment(&self, access_token: &str, id: &str) -> Result<PaymentInfo, ProviderError> {
        let json = self.get_resource(access_token, "/v1/payments", id).await?;
        parse_payment(&json)
    }

    async fn get_preapproval(
        &self,
        access_token: &str,
        id: &str,
    ) -> Result<PreapprovalInfo, ProviderError> {
        let json = self.get_resource(access_token, "/preapproval", id).await?;
        parse_preapproval(&json)
    }

    async fn get_authorized_payment(
        &self,
        access_token: &str,
        id: &str,
    ) -> Result<AuthorizedPaymentInfo, ProviderError> {
        let json = self
            .get_resource(access_token, "/authorized_payments", id)
            .await?;
        parse_authorized_payment(&json)
    }
}

fn preference_body(request: &PreferenceRequest) -> Value {
    let mut body = json!({
        "items": [{
            "id": format!("appointment-{}", request.appointment_id),
            "title": request.title,
            "quantity": 1,
            "currency_id": request.currency,
            "unit_price": request.amount,
        }],
        "external_reference": request.external_reference(),
        "notification_url": request.notification_url,
        "back_urls": {
            "success": request.back_url,
            "pending": request.back_url,
            "failure": request.back_url,
        },
        "auto_return": "approved",
        "metadata": {
            "appointment_id": request.appointment_id,
            "tenant_id": request.tenant_id,
            "customer_id": request.customer_id,
            "cancellation_token": request.cancellation_token,
        },
    });
    if let Some(email) = &request.payer_email {
        body["payer"] = json!({ "email": email });
    }
    body
}

// ── Response parsing ──

/// Ids arrive as JSON numbers or strings depending on the resource.
fn id_field(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Amounts are decimals on the wire; stored as whole currency units.
fn amount_field(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_f64)
        .map(|v| v.round() as i64)
        .unwrap_or(0)
}

fn required_id(value: &Value, what: &str) -> Result<String, ProviderError> {
    value
        .get("id")
        .and_then(id_field)
        .ok_or_else(|| ProviderError::Malformed(format!("{what} without id")))
}

fn parse_preference(value: &Value) -> Result<Preference, ProviderError> {
    let id = required_id(value, "preference")?;
    let init_point = str_field(value, "init_point")
        .ok_or_else(|| ProviderError::Malformed("preference without init_point".into()))?;
    Ok(Preference { id, init_point })
}

fn parse_payment(value: &Value) -> Result<PaymentInfo, ProviderError> {
    let appointment_id = value
        .get("metadata")
        .and_then(|m| m.get("appointment_id"))
        .and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        });

    // Subscription charges name their preapproval in one of these places.
    let subscription_id = value
        .get("metadata")
        .and_then(|m| m.get("preapproval_id"))
        .and_then(id_field)
        .or_else(|| {
            value
                .pointer("/point_of_interaction/transaction_data/subscription_id")
                .and_then(id_field)
        });

    Ok(PaymentInfo {
        id: required_id(value, "payment")?,
        status: str_field(value, "status").unwrap_or_default(),
        amount: amount_field(value, "transaction_amount"),
        currency: str_field(value, "currency_id"),
        external_reference: str_field(value, "external_reference"),
        date_approved: str_field(value, "date_approved"),
        appointment_id,
        subscription_id,
    })
}

fn parse_preapproval(value: &Value) -> Result<PreapprovalInfo, ProviderError> {
    Ok(PreapprovalInfo {
        id: required_id(value, "preapproval")?,
        status: str_field(value, "status").unwrap_or_default(),
        external_reference: str_field(value, "external_reference"),
        reason: str_field(value, "reason"),
    })
}

fn parse_authorized_payment(value: &Value) -> Result<AuthorizedPaymentInfo, ProviderError> {
    // The charge outcome lives under "payment" once processed.
    let payment = value.get("payment");
    let status = payment
        .and_then(|p| str_field(p, "status"))
        .or_else(|| str_field(value, "status"))
        .unwrap_or_default();

    Ok(AuthorizedPaymentInfo {
        id: required_id(value, "authorized payment")?,
        payment_id: payment.and_then(|p| p.get("id")).and_then(id_field),
        preapproval_id: value.get("preapproval_id").and_then(id_field),
        status,
        amount: amount_field(value, "transaction_amount"),
        currency: str_field(value, "currency_id"),
        external_reference: str_field(value, "external_reference"),
        date_approved: str_field(value, "debit_date").or_else(|| str_field(value, "date_created")),
    })
}
