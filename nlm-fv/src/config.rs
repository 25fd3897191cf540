//! Configuration resolution for nlm-fv
//!
//! Each value is taken from the first tier that provides it:
//! command line / `NLM_FV_*` environment → settings table → TOML file →
//! compiled default.

use nlm_common::config::TomlConfig;
use nlm_common::Result;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::info;

use crate::batcher::{
    BatcherConfig, DEFAULT_BATCH_SIZE, DEFAULT_PROCESSING_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT,
};
use crate::db::settings::{
    clamp_batch_size, clamp_processing_interval_ms, clamp_shutdown_timeout_ms, load_batch_size,
    load_processing_interval_ms, load_shutdown_timeout_ms,
};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5810;

/// Batcher values given on the command line or through the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatcherOverrides {
    pub batch_size: Option<usize>,
    pub processing_interval_ms: Option<u64>,
    pub shutdown_timeout_ms: Option<u64>,
}

fn pick<T: Copy>(name: &str, tiers: [(&str, Option<T>); 3], default: T) -> T {
    for (source, value) in tiers {
        if let Some(value) = value {
            info!(setting = name, source, "Batcher setting resolved");
            return value;
        }
    }
    default
}

/// Resolve the batch window
///
/// `db` is optional so `--memory` runs can skip the settings tier.
pub async fn resolve_batcher_config(
    db: Option<&SqlitePool>,
    toml_config: &TomlConfig,
    overrides: &BatcherOverrides,
) -> Result<BatcherConfig> {
    let (db_batch, db_interval, db_timeout) = match db {
        Some(db) => (
            load_batch_size(db).await?,
            load_processing_interval_ms(db).await?,
            load_shutdown_timeout_ms(db).await?,
        ),
        None => (None, None, None),
    };

    let batch_size = pick(
        "batch_size",
        [
            ("command line", overrides.batch_size.map(clamp_batch_size)),
            ("database", db_batch),
            ("TOML", toml_config.batch_size.map(clamp_batch_size)),
        ],
        DEFAULT_BATCH_SIZE,
    );

    let processing_interval_ms = pick(
        "processing_interval_ms",
        [
            (
                "command line",
                overrides.processing_interval_ms.map(clamp_processing_interval_ms),
            ),
            ("database", db_interval),
            (
                "TOML",
                toml_config.processing_interval_ms.map(clamp_processing_interval_ms),
            ),
        ],
        DEFAULT_PROCESSING_INTERVAL.as_millis() as u64,
    );

    let shutdown_timeout_ms = pick(
        "shutdown_timeout_ms",
        [
            (
                "command line",
                overrides.shutdown_timeout_ms.map(clamp_shutdown_timeout_ms),
            ),
            ("database", db_timeout),
            (
                "TOML",
                toml_config.shutdown_timeout_ms.map(clamp_shutdown_timeout_ms),
            ),
        ],
        DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64,
    );

    Ok(BatcherConfig {
        batch_size,
        processing_interval: Duration::from_millis(processing_interval_ms),
        shutdown_timeout: Duration::from_millis(shutdown_timeout_ms),
    })
}

/// Listen address: command line → TOML → default
pub fn resolve_bind_addr(
    cli_host: Option<&str>,
    cli_port: Option<u16>,
    toml_config: &TomlConfig,
) -> String {
    let host = cli_host
        .or(toml_config.host.as_deref())
        .unwrap_or(DEFAULT_HOST);
    let port = cli_port.or(toml_config.port).unwrap_or(DEFAULT_PORT);
    format!("{}:{}", host, port)
}

/// Forms to register at startup: command line first, then TOML
///
/// Keys are trimmed; blanks and repeats are skipped.
pub fn startup_form_keys(cli_forms: &[String], toml_config: &TomlConfig) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for key in cli_forms.iter().chain(toml_config.forms.iter()) {
        let key = key.trim();
        if !key.is_empty() && !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlm_common::db::init_memory_database;
    use nlm_common::db::settings::set_setting;

    #[tokio::test]
    async fn test_defaults_without_any_tier() {
        let config = resolve_batcher_config(None, &TomlConfig::default(), &BatcherOverrides::default())
            .await
            .unwrap();
        assert_eq!(config, BatcherConfig::default());
    }

    #[tokio::test]
    async fn test_tier_priority() {
        let db = init_memory_database().await.unwrap();
        set_setting(&db, "fv_batch_size", 40).await.unwrap();
        set_setting(&db, "fv_processing_interval_ms", 2000).await.unwrap();

        let toml = TomlConfig {
            batch_size: Some(30),
            processing_interval_ms: Some(3000),
            shutdown_timeout_ms: Some(1500),
            ..Default::default()
        };
        let overrides = BatcherOverrides {
            batch_size: Some(50),
            ..Default::default()
        };

        let config = resolve_batcher_config(Some(&db), &toml, &overrides)
            .await
            .unwrap();

        // Command line beats database
        assert_eq!(config.batch_size, 50);
        // Database beats TOML
        assert_eq!(config.processing_interval, Duration::from_millis(2000));
        // TOML beats default
        assert_eq!(config.shutdown_timeout, Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_override_values_clamped() {
        let overrides = BatcherOverrides {
            batch_size: Some(0),
            processing_interval_ms: Some(1),
            shutdown_timeout_ms: Some(u64::MAX),
        };
        let config = resolve_batcher_config(None, &TomlConfig::default(), &overrides)
            .await
            .unwrap();

        assert_eq!(config.batch_size, 1);
        assert_eq!(config.processing_interval, Duration::from_millis(10));
        assert_eq!(config.shutdown_timeout, Duration::from_millis(60_000));
    }

    #[test]
    fn test_startup_form_keys_merge_cli_and_toml() {
        let toml = TomlConfig {
            forms: vec!["popup".to_string(), " footer ".to_string(), "".to_string()],
            ..Default::default()
        };
        let cli = vec!["footer".to_string()];

        assert_eq!(startup_form_keys(&cli, &toml), vec!["footer", "popup"]);
        assert!(startup_form_keys(&[], &TomlConfig::default()).is_empty());
    }

    #[test]
    fn test_bind_addr_resolution() {
        let toml = TomlConfig {
            host: Some("0.0.0.0".to_string()),
            port: Some(6000),
            ..Default::default()
        };

        assert_eq!(resolve_bind_addr(None, None, &TomlConfig::default()), "127.0.0.1:5810");
        assert_eq!(resolve_bind_addr(None, None, &toml), "0.0.0.0:6000");
        assert_eq!(resolve_bind_addr(Some("10.0.0.1"), Some(7000), &toml), "10.0.0.1:7000");
    }
}
