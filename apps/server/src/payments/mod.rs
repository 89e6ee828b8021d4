pub mod mercadopago;
pub mod preference;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use mercadopago::MercadoPago;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("{0} not found")]
    NotFound(String),
}

/// Provider resource ids are ASCII alphanumerics and dashes. Anything else
/// is refused before it reaches a request path.
pub fn is_resource_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// Checkout preference for an appointment deposit.
#[derive(Debug, Clone, Serialize)]
pub struct PreferenceRequest {
    pub appointment_id: i64,
    pub tenant_id: i64,
    pub customer_id: i64,
    pub title: String,
    pub amount: i64,
    pub currency: String,
    pub payer_email: Option<String>,
    pub notification_url: String,
    pub back_url: String,
    pub cancellation_token: String,
}

impl PreferenceRequest {
    pub fn external_reference(&self) -> String {
        format!("appointment:{}", self.appointment_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preference {
    pub id: String,
    pub init_point: String,
}

/// One-off payment as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentInfo {
    pub id: String,
    pub status: String,
    pub amount: i64,
    pub currency: Option<String>,
    pub external_reference: Option<String>,
    pub date_approved: Option<String>,
    /// `appointment_id` from the preference metadata, when present.
    pub appointment_id: Option<i64>,
    /// Preapproval the payment was charged under, for subscription charges.
    pub subscription_id: Option<String>,
}

/// Recurring subscription authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreapprovalInfo {
    pub id: String,
    pub status: String,
    pub external_reference: Option<String>,
    pub reason: Option<String>,
}

/// A charge made under a preapproval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedPaymentInfo {
    pub id: String,
    /// Id of the underlying payment once the charge is processed.
    pub payment_id: Option<String>,
    pub preapproval_id: Option<String>,
    pub status: String,
    pub amount: i64,
    pub currency: Option<String>,
    pub external_reference: Option<String>,
    pub date_approved: Option<String>,
}

/// Payment provider seam: preference creation plus authoritative lookups
/// used when reconciling webhooks.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_preference(
        &self,
        access_token: &str,
        request: &PreferenceRequest,
    ) -> Result<Preference, ProviderError>;

    async fn get_payment(&self, access_token: &str, id: &str) -> Result<PaymentInfo, ProviderError>;

    async fn get_preapproval(
        &self,
        access_token: &str,
        id: &str,
    ) -> Result<PreapprovalInfo, ProviderError>;

    async fn get_authorized_payment(
        &self,
        access_token: &str,
        id: &str,
    ) -> Result<AuthorizedPaymentInfo, ProviderError>;
}
