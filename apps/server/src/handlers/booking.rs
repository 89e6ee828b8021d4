use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::{
    booking::{self, load_professional, load_service},
    error::{AppError, AppResult},
    models::*,
    scheduling::{self, SlotPolicy},
    time, AppState,
};

/// POST /api/turnos: create an appointment
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<BookingConfirmation>>> {
    let Json(request) =
        payload.map_err(|e| AppError::InvalidField(format!("Cuerpo inválido: {}", e.body_text())))?;

    let confirmation = booking::create_booking(&state, &request, Utc::now()).await?;
    Ok(Json(ApiResponse::success(confirmation)))
}

/// GET /api/disponibilidad: bookable start times for a service
pub async fn availability(
    State(state): State<Arc<AppState>>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> AppResult<Json<ApiResponse<AvailabilityResponse>>> {
    let Query(query) =
        query.map_err(|e| AppError::InvalidField(format!("Parámetros inválidos: {}", e.body_text())))?;
    let date = time::parse_date(&query.fecha)
        .ok_or_else(|| AppError::InvalidField(format!("Fecha inválida: {}", query.fecha)))?;

    let service = load_service(&state.db, query.negocio_id, query.servicio_id).await?;
    let professional = load_professional(&state.db, query.negocio_id, query.profesional_id).await?;

    let policy = SlotPolicy {
        clock: state.clock,
        now: Utc::now(),
        buffer_min: state.config.past_slot_buffer_min,
    };
    let duration = u32::try_from(service.duration_min).unwrap_or(0);
    let times = scheduling::bookable_times(
        &state.db,
        &policy,
        professional.id,
        date,
        duration,
        state.config.slot_step_min,
    )
    .await?;

    Ok(Json(ApiResponse::success(AvailabilityResponse {
        date: date.format("%Y-%m-%d").to_string(),
        professional_id: professional.id,
        service_id: service.id,
        times,
    })))
}
