//! Monthly finance ledger: professional commissions, fixed expense
//! instalments and the period summary.
//!
//! The sync steps only ever insert rows keyed by a unique constraint with
//! `ON CONFLICT DO NOTHING`, so they can run on every summary request and
//! concurrently without creating duplicates.

use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::fmt;

use crate::{
    deposit::percent_of,
    error::{AppError, AppResult},
    models::{AppointmentStatus, PaymentStatus},
};

/// Commission percentage when neither the service nor the professional sets one.
pub const DEFAULT_COMMISSION_PERCENTAGE: i64 = 40;
/// Months shown in the trailing history, the requested period included.
pub const HISTORY_MONTHS: u32 = 6;

const COMMISSIONS_CATEGORY: &str = "comisiones";

/// Accounting month, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period {
    first_day: NaiveDate,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|first_day| Self { first_day })
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        let invalid = || AppError::InvalidPeriod(raw.to_string());
        let (year, month) = raw.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self {
            first_day: date.with_day(1).unwrap_or(date),
        }
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day.pred_opt().unwrap_or(self.first_day)
    }

    pub fn prev(&self) -> Self {
        Self {
            first_day: self
                .first_day
                .checked_sub_months(Months::new(1))
                .unwrap_or(self.first_day),
        }
    }

    fn next(&self) -> Self {
        Self {
            first_day: self
                .first_day
                .checked_add_months(Months::new(1))
                .unwrap_or(self.first_day),
        }
    }

    /// Due date for a monthly `due_day`, clamped to the last day of the month.
    pub fn due_date(&self, due_day: u32) -> NaiveDate {
        let last = self.last_day();
        let day = due_day.clamp(1, last.day());
        self.first_day.with_day(day).unwrap_or(last)
    }

    /// `count` periods ending at this one, oldest first.
    pub fn trailing(&self, count: u32) -> Vec<Period> {
        let mut periods = Vec::with_capacity(count as usize);
        let mut cursor = *self;
        for _ in 0..count {
            periods.push(cursor);
            cursor = cursor.prev();
        }
        periods.reverse();
        periods
    }

    fn date_bounds(&self) -> (String, String) {
        (
            self.first_day.format("%Y-%m-%d").to_string(),
            self.last_day().format("%Y-%m-%d").to_string(),
        )
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first_day.format("%Y-%m"))
    }
}

// ── Sync ──

#[derive(sqlx::FromRow)]
struct CommissionSource {
    appointment_id: i64,
    professional_id: i64,
    paid_amount: i64,
    price: i64,
    percentage: i64,
}

/// Record a commission for every completed and fully paid appointment in the
/// period. Returns the number of new rows.
pub async fn sync_commissions(db: &SqlitePool, tenant_id: i64, period: Period) -> AppResult<u64> {
    let (from, to) = period.date_bounds();
    let sources = sqlx::query_as::<_, CommissionSource>(
        "SELECT a.id AS appointment_id, a.professional_id, a.paid_amount, s.price,
                COALESCE(sc.percentage, p.commission_percentage, ?) AS percentage
         FROM appointments a
         JOIN services s ON s.id = a.service_id
         JOIN professionals p ON p.id = a.professional_id
         LEFT JOIN service_commissions sc
                ON sc.professional_id = a.professional_id AND sc.service_id = a.service_id
         WHERE a.tenant_id = ? AND a.date BETWEEN ? AND ?
           AND a.status = ? AND a.payment_status = ?",
    )
    .bind(DEFAULT_COMMISSION_PERCENTAGE)
    .bind(tenant_id)
    .bind(&from)
    .bind(&to)
    .bind(AppointmentStatus::Completed.as_str())
    .bind(PaymentStatus::Paid.as_str())
    .fetch_all(db)
    .await?;

    let period_key = period.to_string();
    let mut created = 0;
    for source in sources {
        let service_amount = source.paid_amount.max(source.price);
        let result = sqlx::query(
            "INSERT INTO commissions
                (tenant_id, appointment_id, professional_id, period, service_amount, percentage, commission_amount)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(appointment_id, professional_id) DO NOTHING",
        )
        .bind(tenant_id)
        .bind(source.appointment_id)
        .bind(source.professional_id)
        .bind(&period_key)
        .bind(service_amount)
        .bind(source.percentage)
        .bind(percent_of(service_amount, source.percentage))
        .execute(db)
        .await?;
        created += result.rows_affected();
    }

    if created > 0 {
        tracing::info!(tenant_id, "Created {} commissions for {}", created, period_key);
    }
    Ok(created)
}

/// Create the period's instalment for every active fixed expense. Returns the
/// number of new rows.
pub async fn sync_expense_payments(db: &SqlitePool, tenant_id: i64, period: Period) -> AppResult<u64> {
    let definitions: Vec<(i64, i64, i64)> = sqlx::query_as(
        "SELECT id, amount, due_day FROM fixed_expenses WHERE tenant_id = ? AND active = 1",
    )
    .bind(tenant_id)
    .fetch_all(db)
    .await?;

    let period_key = period.to_string();
    let mut created = 0;
    for (fixed_expense_id, amount, due_day) in definitions {
        let due_date = period.due_date(due_day.clamp(1, 31) as u32);
        let result = sqlx::query(
            "INSERT INTO expense_payments (tenant_id, fixed_expense_id, period, amount, due_date)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(fixed_expense_id, period) DO NOTHING",
        )
        .bind(tenant_id)
        .bind(fixed_expense_id)
        .bind(&period_key)
        .bind(amount)
        .bind(due_date.format("%Y-%m-%d").to_string())
        .execute(db)
        .await?;
        created += result.rows_affected();
    }
    Ok(created)
}

// ── Summary ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodTotals {
    pub ingress: i64,
    pub egress: i64,
    pub balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryPoint {
    pub period: String,
    #[serde(flatten)]
    pub totals: PeriodTotals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingActions {
    pub expense_payments: i64,
    pub overdue_expense_payments: i64,
    pub commissions: i64,
}

/// Percentage change against the previous period; `None` when the previous
/// value is zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeriodChanges {
    pub ingress_pct: Option<f64>,
    pub egress_pct: Option<f64>,
    pub balance_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinanceSummary {
    pub period: String,
    #[serde(flatten)]
    pub totals: PeriodTotals,
    pub pending: PendingActions,
    pub changes: PeriodChanges,
    pub categories: Vec<CategoryTotal>,
    pub history: Vec<HistoryPoint>,
}

/// Change from `previous` to `current` in percent, one decimal.
pub fn percent_change(current: i64, previous: i64) -> Option<f64> {
    if previous == 0 {
        return None;
    }
    let pct = (current - previous) as f64 / previous.abs() as f64 * 100.0;
    Some((pct * 10.0).round() / 10.0)
}

async fn period_totals(db: &SqlitePool, tenant_id: i64, period: Period) -> AppResult<PeriodTotals> {
    let (from, to) = period.date_bounds();
    let period_key = period.to_string();

    let ingress: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(paid_amount), 0) FROM appointments
         WHERE tenant_id = ? AND date BETWEEN ? AND ? AND payment_status = 'paid'",
    )
    .bind(tenant_id)
    .bind(&from)
    .bind(&to)
    .fetch_one(db)
    .await?;

    let egress: i64 = sqlx::query_scalar(
        "SELECT
            (SELECT COALESCE(SUM(amount), 0) FROM expense_payments
              WHERE tenant_id = ? AND period = ? AND state = 'paid')
          + (SELECT COALESCE(SUM(commission_amount), 0) FROM commissions
              WHERE tenant_id = ? AND period = ? AND state = 'paid')
          + (SELECT COALESCE(SUM(amount), 0) FROM expenses
              WHERE tenant_id = ? AND date BETWEEN ? AND ? AND state = 'paid')",
    )
    .bind(tenant_id)
    .bind(&period_key)
    .bind(tenant_id)
    .bind(&period_key)
    .bind(tenant_id)
    .bind(&from)
    .bind(&to)
    .fetch_one(db)
    .await?;

    Ok(PeriodTotals {
        ingress,
        egress,
        balance: ingress - egress,
    })
}

async fn egress_by_category(db: &SqlitePool, tenant_id: i64, period: Period) -> AppResult<Vec<CategoryTotal>> {
    let (from, to) = period.date_bounds();
    let period_key = period.to_string();

    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT fe.category, ep.amount
         FROM expense_payments ep JOIN fixed_expenses fe ON fe.id = ep.fixed_expense_id
         WHERE ep.tenant_id = ? AND ep.period = ? AND ep.state = 'paid'
         UNION ALL
         SELECT ?, commission_amount FROM commissions
         WHERE tenant_id = ? AND period = ? AND state = 'paid'
         UNION ALL
         SELECT category, amount FROM expenses
         WHERE tenant_id = ? AND date BETWEEN ? AND ? AND state = 'paid'",
    )
    .bind(tenant_id)
    .bind(&period_key)
    .bind(COMMISSIONS_CATEGORY)
    .bind(tenant_id)
    .bind(&period_key)
    .bind(tenant_id)
    .bind(&from)
    .bind(&to)
    .fetch_all(db)
    .await?;

    let mut by_category: BTreeMap<String, i64> = BTreeMap::new();
    for (category, amount) in rows {
        *by_category.entry(category).or_insert(0) += amount;
    }
    let mut categories: Vec<CategoryTotal> = by_category
        .into_iter()
        .map(|(category, amount)| CategoryTotal { category, amount })
        .collect();
    categories.sort_by(|a, b| b.amount.cmp(&a.amount));
    Ok(categories)
}

async fn pending_actions(
    db: &SqlitePool,
    tenant_id: i64,
    period: Period,
    today: NaiveDate,
) -> AppResult<PendingActions> {
    let period_key = period.to_string();
    let today = today.format("%Y-%m-%d").to_string();

    let (expense_payments, overdue_expense_payments): (i64, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM(due_date >= ?), 0), COALESCE(SUM(due_date < ?), 0)
         FROM expense_payments
         WHERE tenant_id = ? AND period = ? AND state = 'pending'",
    )
    .bind(&today)
    .bind(&today)
    .bind(tenant_id)
    .bind(&period_key)
    .fetch_one(db)
    .await?;

    let commissions: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM commissions WHERE tenant_id = ? AND period = ? AND state = 'pending'",
    )
    .bind(tenant_id)
    .bind(&period_key)
    .fetch_one(db)
    .await?;

    Ok(PendingActions {
        expense_payments,
        overdue_expense_payments,
        commissions,
    })
}

/// Ingress, egress and balance for `period`, with the comparison against the
/// previous month, the egress breakdown and the trailing history.
pub async fn summarize_period(
    db: &SqlitePool,
    tenant_id: i64,
    period: Period,
    today: NaiveDate,
) -> AppResult<FinanceSummary> {
    let mut history = Vec::with_capacity(HISTORY_MONTHS as usize);
    for p in period.trailing(HISTORY_MONTHS) {
        history.push(HistoryPoint {
            period: p.to_string(),
            totals: period_totals(db, tenant_id, p).await?,
        });
    }

    let totals = history
        .last()
        .map(|h| h.totals)
        .unwrap_or(PeriodTotals {
            ingress: 0,
            egress: 0,
            balance: 0,
        });
    let previous = period_totals(db, tenant_id, period.prev()).await?;

    Ok(FinanceSummary {
        period: period.to_string(),
        totals,
        pending: pending_actions(db, tenant_id, period, today).await?,
        changes: PeriodChanges {
            ingress_pct: percent_change(totals.ingress, previous.ingress),
            egress_pct: percent_change(totals.egress, previous.egress),
            balance_pct: percent_change(totals.balance, previous.balance),
        },
        categories: egress_by_category(db, tenant_id, period).await?,
        history,
    })
}
