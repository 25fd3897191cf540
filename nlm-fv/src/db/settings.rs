//! Batcher settings stored in the settings table
//!
//! Each loader returns `None` when the key is absent so the caller can fall
//! through to the TOML file and compiled defaults. Present values are
//! clamped to a sane range.

use nlm_common::db::settings::get_setting;
use nlm_common::Result;
use sqlx::{Pool, Sqlite};

pub const BATCH_SIZE_KEY: &str = "fv_batch_size";
pub const PROCESSING_INTERVAL_KEY: &str = "fv_processing_interval_ms";
pub const SHUTDOWN_TIMEOUT_KEY: &str = "fv_shutdown_timeout_ms";

/// Load fv_batch_size (clamped to 1-10000)
pub async fn load_batch_size(db: &Pool<Sqlite>) -> Result<Option<usize>> {
    Ok(get_setting::<usize>(db, BATCH_SIZE_KEY)
        .await?
        .map(clamp_batch_size))
}

/// Load fv_processing_interval_ms (clamped to 10-600000ms)
pub async fn load_processing_interval_ms(db: &Pool<Sqlite>) -> Result<Option<u64>> {
    Ok(get_setting::<u64>(db, PROCESSING_INTERVAL_KEY)
        .await?
        .map(clamp_processing_interval_ms))
}

/// Load fv_shutdown_timeout_ms (clamped to 100-60000ms)
pub async fn load_shutdown_timeout_ms(db: &Pool<Sqlite>) -> Result<Option<u64>> {
    Ok(get_setting::<u64>(db, SHUTDOWN_TIMEOUT_KEY)
        .await?
        .map(clamp_shutdown_timeout_ms))
}

pub fn clamp_batch_size(value: usize) -> usize {
    value.clamp(1, 10_000)
}

pub fn clamp_processing_interval_ms(value: u64) -> u64 {
    value.clamp(10, 600_000)
}

pub fn clamp_shutdown_timeout_ms(value: u64) -> u64 {
    value.clamp(100, 60_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlm_common::db::init_memory_database;
    use nlm_common::db::settings::set_setting;

    #[tokio::test]
    async fn test_absent_settings_are_none() {
        let db = init_memory_database().await.unwrap();
        assert_eq!(load_batch_size(&db).await.unwrap(), None);
        assert_eq!(load_processing_interval_ms(&db).await.unwrap(), None);
        assert_eq!(load_shutdown_timeout_ms(&db).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_settings_are_clamped() {
        let db = init_memory_database().await.unwrap();
        set_setting(&db, BATCH_SIZE_KEY, 0).await.unwrap();
        set_setting(&db, PROCESSING_INTERVAL_KEY, 10_000_000).await.unwrap();
        set_setting(&db, SHUTDOWN_TIMEOUT_KEY, 2500).await.unwrap();

        assert_eq!(load_batch_size(&db).await.unwrap(), Some(1));
        assert_eq!(load_processing_interval_ms(&db).await.unwrap(), Some(600_000));
        assert_eq!(load_shutdown_timeout_ms(&db).await.unwrap(), Some(2500));
    }
}
