use sqlx::SqlitePool;

use crate::{
    db,
    error::{AppError, AppResult},
};

/// Contact details supplied with a booking.
#[derive(Debug, Clone, Default)]
pub struct ContactDetails {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Strip separators from a DNI and require 7 to 9 digits.
pub fn normalize_national_id(raw: &str) -> AppResult<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if !(7..=9).contains(&digits.len()) {
        return Err(AppError::InvalidNationalId);
    }
    Ok(digits)
}

/// Find the tenant's customer by national id or create it.
///
/// An existing customer takes the supplied name; email and phone are
/// refreshed only when new values are supplied.
pub async fn resolve_customer(
    db: &SqlitePool,
    tenant_id: i64,
    national_id: &str,
    contact: &ContactDetails,
) -> AppResult<i64> {
    if let Some(id) = find_customer(db, tenant_id, national_id).await? {
        refresh_contact(db, id, contact).await?;
        return Ok(id);
    }
    insert_customer(db, tenant_id, national_id, contact).await
}

async fn find_customer(
    db: &SqlitePool,
    tenant_id: i64,
    national_id: &str,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM customers WHERE tenant_id = ? AND national_id = ?")
        .bind(tenant_id)
        .bind(national_id)
        .fetch_optional(db)
        .await
}

async fn refresh_contact(
    db: &SqlitePool,
    customer_id: i64,
    contact: &ContactDetails,
) -> Result<(), sqlx::Error> {
    let name = contact.name.trim();
    sqlx::query(
        "UPDATE customers
         SET name = COALESCE(NULLIF(?, ''), name),
             email = COALESCE(?, email),
             phone = COALESCE(?, phone)
         WHERE id = ?",
    )
    .bind(name)
    .bind(contact.email.as_deref())
    .bind(contact.phone.as_deref())
    .bind(customer_id)
    .execute(db)
    .await?;
    Ok(())
}

/// Insert a customer; when a concurrent request created the same
/// (tenant, national id) first, update that row and return it instead.
pub(crate) async fn insert_customer(
    db: &SqlitePool,
    tenant_id: i64,
    national_id: &str,
    contact: &ContactDetails,
) -> AppResult<i64> {
    let inserted = sqlx::query_scalar::<_, i64>(
        "INSERT INTO customers (tenant_id, national_id, name, email, phone)
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(tenant_id)
    .bind(national_id)
    .bind(&contact.name)
    .bind(contact.email.as_deref())
    .bind(contact.phone.as_deref())
    .fetch_one(db)
    .await;

    match inserted {
        Ok(id) => Ok(id),
        Err(e) if db::is_unique_violation(&e) => {
            tracing::debug!(tenant_id, "customer created concurrently, re-reading");
            let id = find_customer(db, tenant_id, national_id)
                .await?
                .ok_or(AppError::Database(e))?;
            refresh_contact(db, id, contact).await?;
            Ok(id)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn contact(name: &str, email: Option<&str>, phone: Option<&str>) -> ContactDetails {
        ContactDetails {
            name: name.into(),
            email: email.map(Into::into),
            phone: phone.map(Into::into),
        }
    }

    #[test]
    fn test_national_id_separators_stripped() {
        assert_eq!(normalize_national_id("30.123.456").unwrap(), "30123456");
        assert_eq!(normalize_national_id(" 1234567 ").unwrap(), "1234567");
    }

    #[test]
    fn test_national_id_length_bounds() {
        assert!(matches!(normalize_national_id("123456"), Err(AppError::InvalidNationalId)));
        assert!(normalize_national_id("1234567890").is_err());
        assert!(normalize_national_id("abc").is_err());
        assert!(normalize_national_id("123456789").is_ok());
    }

    #[tokio::test]
    async fn test_resolve_creates_then_reuses() {
        let db = test_support::test_pool().await;
        let salon = test_support::seed_salon(&db).await;

        let first = resolve_customer(&db, salon.tenant_id, "30123456", &contact("Ana", Some("ana@example.com"), None))
            .await
            .unwrap();
        let second = resolve_customer(&db, salon.tenant_id, "30123456", &contact("Otra", None, Some("+5491100000000")))
            .await
            .unwrap();
        assert_eq!(first, second);

        let (name, email, phone): (String, Option<String>, Option<String>) =
            sqlx::query_as("SELECT name, email, phone FROM customers WHERE id = ?")
                .bind(first)
                .fetch_one(&db)
                .await
                .unwrap();
        assert_eq!(name, "Otra");
        assert_eq!(email.as_deref(), Some("ana@example.com"));
        assert_eq!(phone.as_deref(), Some("+5491100000000"));
    }

    #[tokio::test]
    async fn test_same_dni_other_tenant_is_separate() {
        let db = test_support::test_pool().await;
        let salon = test_support::seed_salon(&db).await;
        let other: i64 = sqlx::query_scalar(
            "INSERT INTO businesses (name, slug) VALUES ('Otro', 'otro') RETURNING id",
        )
        .fetch_one(&db)
        .await
        .unwrap();

        let a = resolve_customer(&db, salon.tenant_id, "30123456", &contact("Ana", None, None)).await.unwrap();
        let b = resolve_customer(&db, other, "30123456", &contact("Ana", None, None)).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_duplicate_insert_returns_existing_row() {
        let db = test_support::test_pool().await;
        let salon = test_support::seed_salon(&db).await;

        let first = insert_customer(&db, salon.tenant_id, "30123456", &contact("Ana", None, None)).await.unwrap();
        let raced = insert_customer(
            &db,
            salon.tenant_id,
            "30123456",
            &contact("Ana María Pérez", Some("ana@example.com"), None),
        )
        .await
        .unwrap();
        assert_eq!(first, raced);

        let (name, email): (String, Option<String>) =
            sqlx::query_as("SELECT name, email FROM customers WHERE id = ?")
                .bind(first)
                .fetch_one(&db)
                .await
                .unwrap();
        assert_eq!(name, "Ana María Pérez");
        assert_eq!(email.as_deref(), Some("ana@example.com"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers WHERE national_id = '30123456'")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
