//! Fixtures shared by the unit tests: an in-memory store, a seeded salon
//! and a scripted payment provider.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::{
    booking,
    config::Config,
    models::Business,
    notify::Dispatcher,
    payments::{
        AuthorizedPaymentInfo, PaymentInfo, PaymentProvider, PreapprovalInfo, Preference,
        PreferenceRequest, ProviderError,
    },
    time::BusinessClock,
    AppState,
};

/// A Monday and a Saturday in March 2026, after `reference_now`.
pub const MONDAY: &str = "2026-03-02";
pub const SATURDAY: &str = "2026-03-07";

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const TENANT_TOKEN: &str = "APP_USR-tenant";
pub const PLATFORM_TOKEN: &str = "APP_USR-platform";

/// Sunday 2026-03-01 12:00 in Buenos Aires.
pub fn reference_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 15, 0, 0).unwrap()
}

pub async fn test_pool() -> SqlitePool {
    let pool = crate::db::connect("sqlite::memory:", 1).await.unwrap();
    crate::db::run_migrations(&pool).await.unwrap();
    pool
}

pub fn test_config() -> Config {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("WEBHOOK_SECRET", WEBHOOK_SECRET),
        ("PUBLIC_BASE_URL", "https://turnos.test"),
        ("MP_PLATFORM_ACCESS_TOKEN", PLATFORM_TOKEN),
    ]);
    Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
}

/// Ids of the seeded salon.
#[derive(Debug, Clone, Copy, Default)]
pub struct Salon {
    pub tenant_id: i64,
    pub professional_id: i64,
    pub service_id: i64,
    pub customer_id: i64,
}

/// One business with online payments connected, one professional working
/// Monday to Friday 10:00-18:00, a 30-minute service at 10000 and one customer.
pub async fn seed_salon(db: &SqlitePool) -> Salon {
    let tenant_id: i64 = sqlx::query_scalar(
        "INSERT INTO businesses (name, slug, deposit_percentage, mp_access_token, mp_connected_at)
         VALUES ('Salón Demo', 'salon-demo', 50, ?, '2026-01-01T00:00:00Z') RETURNING id",
    )
    .bind(TENANT_TOKEN)
    .fetch_one(db)
    .await
    .unwrap();

    let professional_id: i64 = sqlx::query_scalar(
        "INSERT INTO professionals (tenant_id, name) VALUES (?, 'Lucía') RETURNING id",
    )
    .bind(tenant_id)
    .fetch_one(db)
    .await
    .unwrap();

    for weekday in 1..=5 {
        sqlx::query(
            "INSERT INTO working_hours (professional_id, weekday, start_time, end_time)
             VALUES (?, ?, '10:00:00', '18:00:00')",
        )
        .bind(professional_id)
        .bind(weekday)
        .execute(db)
        .await
        .unwrap();
    }

    let service_id: i64 = sqlx::query_scalar(
        "INSERT INTO services (tenant_id, name, price, duration_min)
         VALUES (?, 'Corte', 10000, 30) RETURNING id",
    )
    .bind(tenant_id)
    .fetch_one(db)
    .await
    .unwrap();

    let customer_id: i64 = sqlx::query_scalar(
        "INSERT INTO customers (tenant_id, national_id, name) VALUES (?, '20111222', 'Bruno') RETURNING id",
    )
    .bind(tenant_id)
    .fetch_one(db)
    .await
    .unwrap();

    Salon {
        tenant_id,
        professional_id,
        service_id,
        customer_id,
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_appointment(
    db: &SqlitePool,
    salon: &Salon,
    date: &str,
    start_time: &str,
    end_time: &str,
    status: &str,
    payment_status: &str,
    paid_amount: i64,
) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO appointments
            (tenant_id, service_id, professional_id, customer_id, date, start_time, end_time,
             status, payment_status, paid_amount, deposit_amount, payment_method,
             cancellation_token, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 5000, 'online', ?, ?)
         RETURNING id",
    )
    .bind(salon.tenant_id)
    .bind(salon.service_id)
    .bind(salon.professional_id)
    .bind(salon.customer_id)
    .bind(date)
    .bind(start_time)
    .bind(end_time)
    .bind(status)
    .bind(payment_status)
    .bind(paid_amount)
    .bind(uuid::Uuid::new_v4().simple().to_string())
    .bind(reference_now().to_rfc3339())
    .fetch_one(db)
    .await
    .unwrap()
}

pub async fn load_business(db: &SqlitePool, tenant_id: i64) -> Business {
    booking::load_business(db, tenant_id).await.unwrap()
}

// ── Payment provider double ──

#[derive(Default)]
struct MockInner {
    payments: HashMap<String, PaymentInfo>,
    preapprovals: HashMap<String, PreapprovalInfo>,
    authorized_payments: HashMap<String, AuthorizedPaymentInfo>,
    preferences: Vec<PreferenceRequest>,
    lookup_tokens: Vec<String>,
    fail_preferences: bool,
}

/// Serves scripted provider records and records what was asked of it.
#[derive(Default)]
pub struct MockProvider {
    inner: Mutex<MockInner>,
}

impl MockProvider {
    pub fn set_payment(&self, payment: PaymentInfo) {
        let mut inner = self.inner.lock().unwrap();
        inner.payments.insert(payment.id.clone(), payment);
    }

    pub fn set_preapproval(&self, preapproval: PreapprovalInfo) {
        let mut inner = self.inner.lock().unwrap();
        inner.preapprovals.insert(preapproval.id.clone(), preapproval);
    }

    pub fn set_authorized_payment(&self, payment: AuthorizedPaymentInfo) {
        let mut inner = self.inner.lock().unwrap();
        inner.authorized_payments.insert(payment.id.clone(), payment);
    }

    pub fn fail_preferences(&self) {
        self.inner.lock().unwrap().fail_preferences = true;
    }

    pub fn preferences(&self) -> Vec<PreferenceRequest> {
        self.inner.lock().unwrap().preferences.clone()
    }

    /// Access tokens used by lookups, in call order.
    pub fn lookup_tokens(&self) -> Vec<String> {
        self.inner.lock().unwrap().lookup_tokens.clone()
    }
}

fn found<T: Clone>(map: &HashMap<String, T>, id: &str) -> Result<T, ProviderError> {
    map.get(id)
        .cloned()
        .ok_or_else(|| ProviderError::NotFound(id.to_string()))
}

#[async_trait]
impl PaymentProvider for MockProvider {
    async fn create_preference(
        &self,
        _access_token: &str,
        request: &PreferenceRequest,
    ) -> Result<Preference, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_preferences {
            return Err(ProviderError::Status {
                status: 502,
                body: "bad gateway".into(),
            });
        }
        inner.preferences.push(request.clone());
        Ok(Preference {
            id: format!("pref-{}", request.appointment_id),
            init_point: format!("https://mp.test/checkout/{}", request.appointment_id),
        })
    }

    async fn get_payment(&self, access_token: &str, id: &str) -> Result<PaymentInfo, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        inner.lookup_tokens.push(access_token.to_string());
        found(&inner.payments, id)
    }

    async fn get_preapproval(
        &self,
        access_token: &str,
        id: &str,
    ) -> Result<PreapprovalInfo, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        inner.lookup_tokens.push(access_token.to_string());
        found(&inner.preapprovals, id)
    }

    async fn get_authorized_payment(
        &self,
        access_token: &str,
        id: &str,
    ) -> Result<AuthorizedPaymentInfo, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        inner.lookup_tokens.push(access_token.to_string());
        found(&inner.authorized_payments, id)
    }
}

/// Application state over a fresh in-memory store and a `MockProvider`.
pub async fn test_state() -> (Arc<AppState>, Arc<MockProvider>) {
    let config = test_config();
    let provider = Arc::new(MockProvider::default());
    let state = Arc::new(AppState {
        db: test_pool().await,
        clock: BusinessClock::new(config.business_tz),
        config,
        payments: provider.clone(),
        notifier: Dispatcher::default(),
        started_at: Instant::now(),
    });
    (state, provider)
}
