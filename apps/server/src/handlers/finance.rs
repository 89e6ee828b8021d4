use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::{
    booking::load_business,
    error::{AppError, AppResult},
    finance::{self, FinanceSummary, Period},
    models::{ApiResponse, FinanceQuery},
    AppState,
};

/// GET /api/negocios/{tenant_id}/finanzas?periodo=YYYY-MM
///
/// Brings the period's commission and fixed-expense ledgers up to date, then
/// summarizes. Defaults to the current month in the business timezone.
pub async fn summary(
    State(state): State<Arc<AppState>>,
    tenant_id: Result<Path<i64>, PathRejection>,
    query: Result<Query<FinanceQuery>, QueryRejection>,
) -> AppResult<Json<ApiResponse<FinanceSummary>>> {
    let Path(tenant_id) =
        tenant_id.map_err(|e| AppError::InvalidField(format!("Negocio inválido: {}", e.body_text())))?;
    let Query(query) =
        query.map_err(|e| AppError::InvalidField(format!("Parámetros inválidos: {}", e.body_text())))?;
    let business = load_business(&state.db, tenant_id).await?;
    let today = state.clock.today(Utc::now());

    let period = match query.periodo.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(raw) => Period::parse(raw)?,
        None => Period::containing(today),
    };

    finance::sync_commissions(&state.db, business.id, period).await?;
    finance::sync_expense_payments(&state.db, business.id, period).await?;
    let summary = finance::summarize_period(&state.db, business.id, period, today).await?;

    Ok(Json(ApiResponse::success(summary)))
}
