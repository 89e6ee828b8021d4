use serde::{Deserialize, Serialize};

// ── Database models ──

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Business {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub deposit_percentage: Option<i64>,
    pub owner_email: Option<String>,
    pub owner_phone: Option<String>,
    #[serde(skip_serializing)]
    pub mp_access_token: Option<String>,
    pub mp_connected_at: Option<String>,
    pub subscription_plan: Option<String>,
    pub subscription_status: String,
    pub mp_preapproval_id: Option<String>,
    pub trial_ends_at: Option<String>,
}

impl Business {
    /// Payment provider access token, only when the account is connected.
    pub fn payment_token(&self) -> Option<&str> {
        self.mp_connected_at.as_ref()?;
        self.mp_access_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Professional {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub active: bool,
    pub commission_percentage: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WorkingHours {
    pub id: i64,
    pub professional_id: i64,
    pub weekday: i64,
    pub start_time: String,
    pub end_time: String,
    pub closed: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub price: i64,
    pub duration_min: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Appointment {
    pub id: i64,
    pub tenant_id: i64,
    pub service_id: i64,
    pub professional_id: i64,
    pub customer_id: i64,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
    pub payment_status: String,
    pub paid_amount: i64,
    pub deposit_amount: i64,
    pub payment_method: String,
    #[serde(skip_serializing)]
    pub cancellation_token: String,
    pub mp_preference_id: Option<String>,
    pub mp_payment_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Invoice {
    pub id: i64,
    pub tenant_id: i64,
    pub provider_payment_id: String,
    pub provider_subscription_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub state: String,
    pub issued_at: String,
    pub paid_at: Option<String>,
}

// ── Status vocabularies (stored as TEXT) ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Online,
    InPerson,
}

impl PaymentMethod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "online" => Some(PaymentMethod::Online),
            "in_person" | "in-person" | "presencial" => Some(PaymentMethod::InPerson),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Online => "online",
            PaymentMethod::InPerson => "in_person",
        }
    }
}

// ── API request/response types ──

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerInput {
    pub national_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Fields are optional so that missing values map to a 400 with a message
/// instead of a generic deserialization rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateBookingRequest {
    pub tenant_id: Option<i64>,
    pub service_id: Option<i64>,
    pub professional_id: Option<i64>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub customer: Option<CustomerInput>,
    pub payment_method: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingConfirmation {
    pub appointment_id: i64,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub service_name: String,
    pub professional_name: String,
    pub price: i64,
    pub deposit: i64,
    pub remainder: i64,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub cancellation_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub negocio_id: i64,
    pub profesional_id: i64,
    pub servicio_id: i64,
    pub fecha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeBlock {
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub date: String,
    pub professional_id: i64,
    pub service_id: i64,
    pub times: Vec<TimeBlock>,
}

#[derive(Debug, Deserialize)]
pub struct FinanceQuery {
    pub periodo: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn business(token: Option<&str>, connected: bool) -> Business {
        Business {
            id: 1,
            name: "Barbería Sur".into(),
            slug: "barberia-sur".into(),
            deposit_percentage: None,
            owner_email: None,
            owner_phone: None,
            mp_access_token: token.map(String::from),
            mp_connected_at: connected.then(|| "2026-01-01 10:00:00".to_string()),
            subscription_plan: None,
            subscription_status: "trial".into(),
            mp_preapproval_id: None,
            trial_ends_at: None,
        }
    }

    #[test]
    fn test_payment_token_requires_connection() {
        assert_eq!(business(Some("APP_USR-1"), true).payment_token(), Some("APP_USR-1"));
        assert_eq!(business(Some("APP_USR-1"), false).payment_token(), None);
        assert_eq!(business(None, true).payment_token(), None);
        assert_eq!(business(Some("  "), true).payment_token(), None);
    }

    #[test]
    fn test_payment_method_aliases() {
        assert_eq!(PaymentMethod::parse("online"), Some(PaymentMethod::Online));
        assert_eq!(PaymentMethod::parse("Presencial"), Some(PaymentMethod::InPerson));
        assert_eq!(PaymentMethod::parse("in-person"), Some(PaymentMethod::InPerson));
        assert_eq!(PaymentMethod::parse("crypto"), None);
    }

    #[test]
    fn test_api_response_error_shape() {
        let json = serde_json::to_value(ApiResponse::<()>::error("nope")).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "nope");
        assert!(json["data"].is_null());
    }
}
