//! SQLite-backed form store

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use super::{FormStats, FormStore, FormUpdate, StoreError, StoreResult, StoredForm, Traffic};

/// Form counters in the `forms` table
#[derive(Debug, Clone)]
pub struct SqliteFormStore {
    db: SqlitePool,
}

impl SqliteFormStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Insert a form row, returning its internal id
    ///
    /// Form management lives elsewhere; this exists for seeding and tests.
    pub async fn create_form(&self, form_key: &str, name: &str) -> StoreResult<i64> {
        let result = sqlx::query("INSERT INTO forms (form_key, name) VALUES (?, ?)")
            .bind(form_key)
            .bind(name)
            .execute(&self.db)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// Id of the form with `form_key`, inserting the row first if needed
    pub async fn ensure_form(&self, form_key: &str) -> StoreResult<i64> {
        sqlx::query("INSERT OR IGNORE INTO forms (form_key) VALUES (?)")
            .bind(form_key)
            .execute(&self.db)
            .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM forms WHERE form_key = ?")
            .bind(form_key)
            .fetch_one(&self.db)
            .await?;

        Ok(id)
    }

    /// Remove a form row
    pub async fn delete_form(&self, form_key: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM forms WHERE form_key = ?")
            .bind(form_key)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn parse_traffic(raw: &str) -> StoreResult<Traffic> {
    if raw.trim().is_empty() {
        return Ok(Traffic::new());
    }
    Ok(serde_json::from_str(raw)?)
}

#[async_trait]
impl FormStore for SqliteFormStore {
    async fn find_form(&self, form_key: &str) -> StoreResult<Option<StoredForm>> {
        let row: Option<(i64, String, i64)> =
            sqlx::query_as("SELECT id, traffic, revision FROM forms WHERE form_key = ?")
                .bind(form_key)
                .fetch_optional(&self.db)
                .await?;

        match row {
            Some((id, traffic, revision)) => Ok(Some(StoredForm {
                id,
                traffic: parse_traffic(&traffic)?,
                revision,
            })),
            None => Ok(None),
        }
    }

    async fn update_form(&self, id: i64, update: FormUpdate) -> StoreResult<()> {
        let traffic = serde_json::to_string(&update.traffic)?;

        let result = sqlx::query(
            r#"
            UPDATE forms
            SET views = views + ?,
                traffic = ?,
                revision = revision + 1,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND revision = ?
            "#,
        )
        .bind(update.increment_views_by)
        .bind(traffic)
        .bind(id)
        .bind(update.expected_revision)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM forms WHERE id = ?)")
            .bind(id)
            .fetch_one(&self.db)
            .await?;

        if exists {
            debug!(form_id = id, expected = update.expected_revision, "Form revision moved");
            Err(StoreError::Conflict(id))
        } else {
            Err(StoreError::Missing(id))
        }
    }

    async fn form_stats(&self, form_key: &str) -> StoreResult<Option<FormStats>> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT views, traffic FROM forms WHERE form_key = ?")
                .bind(form_key)
                .fetch_optional(&self.db)
                .await?;

        match row {
            Some((views, traffic)) => Ok(Some(FormStats {
                form_key: form_key.to_string(),
                views,
                traffic: parse_traffic(&traffic)?,
            })),
            None => Ok(None),
        }
    }
}
