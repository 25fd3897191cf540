//! Persistent form counters
//!
//! The batcher only needs three capabilities from storage: look a form up by
//! its public key, apply a counter update, and (for the stats endpoint) read
//! the current totals.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::MemoryFormStore;
pub use sqlite::SqliteFormStore;

/// Referrer -> persisted view count
pub type Traffic = BTreeMap<String, i64>;

/// Form as seen by a flush: internal id, current traffic, and the revision
/// the traffic was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredForm {
    pub id: i64,
    pub traffic: Traffic,
    pub revision: i64,
}

/// Counter update for one form
///
/// `views` is incremented atomically. `traffic` replaces the stored mapping
/// only if the form is still at `expected_revision`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormUpdate {
    pub increment_views_by: i64,
    pub traffic: Traffic,
    pub expected_revision: i64,
}

/// Current totals for a form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormStats {
    pub form_key: String,
    pub views: i64,
    pub traffic: Traffic,
}

/// Form store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer updated the form since it was read
    #[error("Revision conflict on form {0}")]
    Conflict(i64),

    /// Form was deleted between lookup and update
    #[error("Form {0} no longer exists")]
    Missing(i64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid traffic data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Storage capability consumed by the view batcher
#[async_trait]
pub trait FormStore: Send + Sync {
    /// Look up a form by its public key
    async fn find_form(&self, form_key: &str) -> StoreResult<Option<StoredForm>>;

    /// Apply a counter update to the form with internal id `id`
    async fn update_form(&self, id: i64, update: FormUpdate) -> StoreResult<()>;

    /// Read current totals
    async fn form_stats(&self, form_key: &str) -> StoreResult<Option<FormStats>>;
}
