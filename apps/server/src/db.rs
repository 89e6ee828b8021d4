use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Ordered migrations. Each runs once and is recorded in `_migrations`.
const MIGRATIONS: &[(&str, &str)] = &[("001_init", include_str!("../migrations/001_init.sql"))];

pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    // WAL for concurrent readers while a booking insert is in flight
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    for &(name, sql) in MIGRATIONS {
        let applied: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?")
                .bind(name)
                .fetch_one(pool)
                .await?;
        if applied {
            continue;
        }

        let mut tx = pool.begin().await?;
        for statement in split_statements(sql) {
            sqlx::query(&statement).execute(&mut *tx).await.map_err(|e| {
                anyhow::anyhow!("migration {name} failed on {:?}: {e}", first_line(&statement))
            })?;
        }
        sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("Applied migration: {}", name);
    }

    tracing::info!("Database migrations up to date");
    Ok(())
}

/// True when the store rejected a write because of a UNIQUE constraint.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

/// Split a migration file on `;`, dropping `--` comment lines and empty chunks.
fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .map(|stmt| stmt.trim().to_string())
        .filter(|stmt| !stmt.is_empty())
        .collect()
}

fn first_line(statement: &str) -> &str {
    statement.lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_drops_comments_and_blanks() {
        let sql = "-- header\nCREATE TABLE a (x INTEGER);\n\n-- note\nCREATE INDEX i ON a(x);\n-- trailing\n";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "CREATE TABLE a (x INTEGER)");
        assert_eq!(statements[1], "CREATE INDEX i ON a(x)");
    }

    #[test]
    fn test_init_migration_has_core_tables() {
        let statements = split_statements(MIGRATIONS[0].1);
        for table in ["businesses", "appointments", "invoices", "commissions", "expense_payments"] {
            assert!(
                statements
                    .iter()
                    .any(|s| s.starts_with(&format!("CREATE TABLE IF NOT EXISTS {table} ("))),
                "missing table {table}"
            );
        }
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = connect("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn test_unique_violation_detected() {
        let pool = connect("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let insert = "INSERT INTO businesses (name, slug) VALUES ('A', 'same-slug')";
        sqlx::query(insert).execute(&pool).await.unwrap();
        let err = sqlx::query(insert).execute(&pool).await.unwrap_err();
        assert!(is_unique_violation(&err));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
