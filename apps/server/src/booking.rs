//! Booking transaction: validation, slot checks, customer resolution,
//! persistence and the optional deposit checkout.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    customers::{self, ContactDetails},
    db,
    deposit::{self, DepositSplit},
    error::{AppError, AppResult},
    models::{
        AppointmentStatus, BookingConfirmation, Business, CreateBookingRequest, PaymentMethod,
        PaymentStatus, Professional, Service,
    },
    notify::BookingNotice,
    payments::preference::{self, DepositOrder},
    scheduling::{self, SlotPolicy, LIVE_OVERLAP_SQL},
    time, AppState,
};

/// A booking request with every field present and well-formed.
#[derive(Debug, Clone)]
pub struct ValidatedBooking {
    pub tenant_id: i64,
    pub service_id: i64,
    pub professional_id: i64,
    pub date: NaiveDate,
    pub start_time: String,
    pub national_id: String,
    pub contact: ContactDetails,
    pub payment_method: PaymentMethod,
}

fn required<T>(value: Option<T>, field: &'static str) -> AppResult<T> {
    value.ok_or(AppError::MissingField(field))
}

fn required_text(value: Option<&str>, field: &'static str) -> AppResult<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(AppError::MissingField(field))
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn validate(request: &CreateBookingRequest) -> AppResult<ValidatedBooking> {
    let tenant_id = required(request.tenant_id, "tenant_id")?;
    let service_id = required(request.service_id, "service_id")?;
    let professional_id = required(request.professional_id, "professional_id")?;
    let date = required_text(request.date.as_deref(), "date")?;
    let start_time = required_text(request.start_time.as_deref(), "start_time")?;

    let customer = request.customer.clone().unwrap_or_default();
    let name = required_text(customer.name.as_deref(), "customer.name")?;
    let national_id = required_text(customer.national_id.as_deref(), "customer.national_id")?;

    let method = required_text(request.payment_method.as_deref(), "payment_method")?;
    let payment_method =
        PaymentMethod::parse(&method).ok_or(AppError::InvalidPaymentMethod(method))?;

    let date = time::parse_date(&date)
        .ok_or_else(|| AppError::InvalidField(format!("Fecha inválida: {date} (se espera YYYY-MM-DD)")))?;
    let national_id = customers::normalize_national_id(&national_id)?;

    Ok(ValidatedBooking {
        tenant_id,
        service_id,
        professional_id,
        date,
        start_time,
        national_id,
        contact: ContactDetails {
            name,
            email: optional_text(customer.email.as_deref()),
            phone: optional_text(customer.phone.as_deref()),
        },
        payment_method,
    })
}

// ── Loaders ──

pub async fn load_business(db: &SqlitePool, tenant_id: i64) -> AppResult<Business> {
    sqlx::query_as::<_, Business>(
        "SELECT id, name, slug, deposit_percentage, owner_email, owner_phone, mp_access_token,
                mp_connected_at, subscription_plan, subscription_status, mp_preapproval_id, trial_ends_at
         FROM businesses WHERE id = ?",
    )
    .bind(tenant_id)
    .fetch_optional(db)
    .await?
    .ok_or(AppError::BusinessNotFound)
}

pub async fn load_service(db: &SqlitePool, tenant_id: i64, service_id: i64) -> AppResult<Service> {
    sqlx::query_as::<_, Service>(
        "SELECT id, tenant_id, name, price, duration_min, active
         FROM services WHERE id = ? AND tenant_id = ? AND active = 1",
    )
    .bind(service_id)
    .bind(tenant_id)
    .fetch_optional(db)
    .await?
    .ok_or(AppError::ServiceNotFound)
}

pub async fn load_professional(
    db: &SqlitePool,
    tenant_id: i64,
    professional_id: i64,
) -> AppResult<Professional> {
    sqlx::query_as::<_, Professional>(
        "SELECT id, tenant_id, name, active, commission_percentage
         FROM professionals WHERE id = ? AND tenant_id = ? AND active = 1",
    )
    .bind(professional_id)
    .bind(tenant_id)
    .fetch_optional(db)
    .await?
    .ok_or(AppError::ProfessionalNotFound)
}

/// End of a service starting at `start`. Services running past midnight are
/// outside any working day.
pub fn service_end(start: &str, duration_min: i64) -> AppResult<String> {
    let minutes = u32::try_from(duration_min)
        .map_err(|_| AppError::InvalidField(format!("Duración inválida: {duration_min}")))?;
    if time::crosses_midnight(start, minutes)? {
        return Err(AppError::OutsideWorkingHours);
    }
    Ok(time::add_minutes_to_time(start, minutes)?)
}

// ── Persistence ──

pub(crate) struct NewAppointment<'a> {
    pub tenant_id: i64,
    pub service_id: i64,
    pub professional_id: i64,
    pub customer_id: i64,
    pub date: &'a str,
    pub start_time: &'a str,
    pub end_time: &'a str,
    pub deposit_amount: i64,
    pub payment_method: PaymentMethod,
    pub cancellation_token: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Insert only when no live appointment overlaps. Losing a race, either to
/// the overlap guard or to the live-slot unique index, is `SlotUnavailable`.
pub(crate) async fn insert_if_free(db: &SqlitePool, new: &NewAppointment<'_>) -> AppResult<i64> {
    let sql = format!(
        "INSERT INTO appointments
            (tenant_id, service_id, professional_id, customer_id, date, start_time, end_time,
             status, payment_status, paid_amount, deposit_amount, payment_method,
             cancellation_token, created_at)
         SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?
         WHERE NOT EXISTS (SELECT 1 FROM appointments WHERE {LIVE_OVERLAP_SQL})
         RETURNING id"
    );

    let inserted = sqlx::query_scalar::<_, i64>(&sql)
        .bind(new.tenant_id)
        .bind(new.service_id)
        .bind(new.professional_id)
        .bind(new.customer_id)
        .bind(new.date)
        .bind(new.start_time)
        .bind(new.end_time)
        .bind(AppointmentStatus::Pending.as_str())
        .bind(PaymentStatus::Pending.as_str())
        .bind(new.deposit_amount)
        .bind(new.payment_method.as_str())
        .bind(new.cancellation_token)
        .bind(new.created_at.to_rfc3339())
        .bind(new.professional_id)
        .bind(new.date)
        .bind(new.end_time)
        .bind(new.start_time)
        .fetch_optional(db)
        .await;

    match inserted {
        Ok(Some(id)) => Ok(id),
        Ok(None) => Err(AppError::SlotUnavailable),
        Err(e) if db::is_unique_violation(&e) => Err(AppError::SlotUnavailable),
        Err(e) => Err(e.into()),
    }
}

pub fn cancellation_url(public_base_url: &str, token: &str) -> String {
    format!("{public_base_url}/turnos/cancelar?token={token}")
}

// ── Transaction ──

pub async fn create_booking(
    state: &AppState,
    request: &CreateBookingRequest,
    now: DateTime<Utc>,
) -> AppResult<BookingConfirmation> {
    let booking = validate(request)?;

    let business = load_business(&state.db, booking.tenant_id).await?;
    let service = load_service(&state.db, booking.tenant_id, booking.service_id).await?;
    let professional =
        load_professional(&state.db, booking.tenant_id, booking.professional_id).await?;

    let start_time = time::normalize_time(&booking.start_time)?;
    let end_time = service_end(&start_time, service.duration_min)?;
    let date = booking.date.format("%Y-%m-%d").to_string();

    let policy = SlotPolicy {
        clock: state.clock,
        now,
        buffer_min: state.config.past_slot_buffer_min,
    };
    scheduling::check_availability(
        &state.db,
        &policy,
        professional.id,
        booking.date,
        &start_time,
        &end_time,
    )
    .await?;
    scheduling::ensure_slot_free(&state.db, professional.id, &date, &start_time, &end_time).await?;

    let online = booking.payment_method == PaymentMethod::Online;
    if online {
        preference::ensure_ready(&state.config, &business)?;
    }

    let customer_id = customers::resolve_customer(
        &state.db,
        business.id,
        &booking.national_id,
        &booking.contact,
    )
    .await?;

    let DepositSplit {
        deposit, remainder, ..
    } = deposit::compute_deposit(service.price, business.deposit_percentage);
    let token = Uuid::new_v4().simple().to_string();

    let appointment_id = insert_if_free(
        &state.db,
        &NewAppointment {
            tenant_id: business.id,
            service_id: service.id,
            professional_id: professional.id,
            customer_id,
            date: &date,
            start_time: &start_time,
            end_time: &end_time,
            deposit_amount: deposit,
            payment_method: booking.payment_method,
            cancellation_token: &token,
            created_at: now,
        },
    )
    .await?;

    tracing::info!(
        appointment_id,
        tenant_id = business.id,
        "Booked {} with {} on {} at {} ({})",
        service.name,
        professional.name,
        date,
        start_time,
        booking.payment_method.as_str()
    );

    let cancellation_url = cancellation_url(&state.config.public_base_url, &token);
    state.notifier.dispatch_booking(BookingNotice {
        appointment_id,
        business_name: business.name.clone(),
        customer_name: booking.contact.name.clone(),
        customer_email: booking.contact.email.clone(),
        customer_phone: booking.contact.phone.clone(),
        owner_email: business.owner_email.clone(),
        owner_phone: business.owner_phone.clone(),
        service_name: service.name.clone(),
        professional_name: professional.name.clone(),
        date: date.clone(),
        start_time: start_time.clone(),
        deposit,
        online,
        cancellation_url: cancellation_url.clone(),
    });

    let payment_url = if online {
        let order = DepositOrder {
            appointment_id,
            customer_id,
            service_name: service.name.clone(),
            deposit,
            payer_email: booking.contact.email.clone(),
            cancellation_token: token,
        };
        Some(preference::issue_deposit_preference(state, &business, &order).await?)
    } else {
        None
    };

    Ok(BookingConfirmation {
        appointment_id,
        date,
        start_time,
        end_time,
        service_name: service.name,
        professional_name: professional.name,
        price: service.price,
        deposit,
        remainder,
        status: AppointmentStatus::Pending,
        payment_status: PaymentStatus::Pending,
        payment_method: booking.payment_method,
        cancellation_url,
        payment_url,
    })
}
