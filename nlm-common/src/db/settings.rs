//! Settings database access
//!
//! Read/write settings from the settings table (key-value store).
//! All settings are global, values are stored as text.

use crate::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

/// Generic setting getter
///
/// Returns None if the key doesn't exist or holds NULL.
/// Parses value from string using FromStr trait.
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(db)
            .await?;

    match value.flatten() {
        Some(s) => match s.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter
///
/// Inserts or updates setting in database.
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    let value_str = value.to_string();

    sqlx::query(
        r#"
        INSERT INTO settings (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value_str)
    .execute(db)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;

    #[tokio::test]
    async fn test_missing_setting_is_none() {
        let db = init_memory_database().await.unwrap();
        let value: Option<u64> = get_setting(&db, "does_not_exist").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_generic_setting_get_set() {
        let db = init_memory_database().await.unwrap();

        set_setting(&db, "fv_batch_size", 250).await.unwrap();
        let value: Option<usize> = get_setting(&db, "fv_batch_size").await.unwrap();
        assert_eq!(value, Some(250));

        // Overwrite
        set_setting(&db, "fv_batch_size", 50).await.unwrap();
        let value: Option<usize> = get_setting(&db, "fv_batch_size").await.unwrap();
        assert_eq!(value, Some(50));
    }

    #[tokio::test]
    async fn test_unparseable_setting_is_config_error() {
        let db = init_memory_database().await.unwrap();
        set_setting(&db, "fv_batch_size", "lots").await.unwrap();

        let result: Result<Option<usize>> = get_setting(&db, "fv_batch_size").await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_schema_version_seeded() {
        let db = init_memory_database().await.unwrap();
        let version: Option<String> = get_setting(&db, "schema_version").await.unwrap();
        assert_eq!(version.as_deref(), Some(crate::db::SCHEMA_VERSION));
    }
}
