use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::{models::ApiResponse, time::TimeError};

/// Errors surfaced to API callers by the booking and finance endpoints.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Validation ──
    #[error("Falta el campo obligatorio: {0}")]
    MissingField(&'static str),
    #[error("{0}")]
    InvalidField(String),
    #[error("DNI inválido: debe tener entre 7 y 9 dígitos")]
    InvalidNationalId,
    #[error("Método de pago inválido: {0}")]
    InvalidPaymentMethod(String),
    #[error("Hora inválida")]
    InvalidTime(#[from] TimeError),
    #[error("Período inválido: {0} (se espera YYYY-MM)")]
    InvalidPeriod(String),

    // ── Lookup ──
    #[error("Negocio no encontrado")]
    BusinessNotFound,
    #[error("Servicio no encontrado")]
    ServiceNotFound,
    #[error("Profesional no encontrado")]
    ProfessionalNotFound,

    // ── Slot state ──
    #[error("El profesional no atiende ese día")]
    ProfessionalNotWorking,
    #[error("El horario está fuera del horario de atención del profesional")]
    OutsideWorkingHours,
    #[error("El horario seleccionado ya pasó")]
    PastTimeSlot,
    #[error("El horario ya no está disponible")]
    SlotUnavailable,

    // ── Configuration ──
    #[error("El negocio no tiene configurados los pagos online")]
    PaymentNotConfigured,
    #[error("Falta configurar el secreto de firma de webhooks")]
    MissingWebhookSecret,

    // ── Upstream ──
    #[error("El turno #{appointment_id} fue reservado, pero no se pudo generar el pago de la seña")]
    PaymentPreferenceFailed { appointment_id: i64, reason: String },

    #[error("Error interno")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingField(_)
            | AppError::InvalidField(_)
            | AppError::InvalidNationalId
            | AppError::InvalidPaymentMethod(_)
            | AppError::InvalidTime(_)
            | AppError::InvalidPeriod(_)
            | AppError::ProfessionalNotWorking
            | AppError::OutsideWorkingHours
            | AppError::PastTimeSlot => StatusCode::BAD_REQUEST,
            AppError::BusinessNotFound | AppError::ServiceNotFound | AppError::ProfessionalNotFound => {
                StatusCode::NOT_FOUND
            }
            AppError::SlotUnavailable => StatusCode::CONFLICT,
            AppError::PaymentNotConfigured => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::MissingWebhookSecret
            | AppError::PaymentPreferenceFailed { .. }
            | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Database(e) => tracing::error!("database error: {}", e),
            AppError::MissingWebhookSecret => {
                tracing::error!("WEBHOOK_SECRET is not configured, online payments are disabled")
            }
            AppError::PaymentPreferenceFailed {
                appointment_id,
                reason,
            } => tracing::error!(
                appointment_id = appointment_id,
                "deposit preference failed: {}",
                reason
            ),
            _ => {}
        }

        let status = self.status_code();
        (status, Json(ApiResponse::<()>::error(self.to_string()))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
