//! Shared helpers for nlm-fv integration tests

#![allow(dead_code)]

pub mod error_injection;

use nlm_fv::batcher::{BatcherConfig, ViewBatcher};
use nlm_fv::store::FormStore;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_INTERVAL: Duration = Duration::from_secs(5);

pub fn test_config(batch_size: usize) -> BatcherConfig {
    BatcherConfig {
        batch_size,
        processing_interval: TEST_INTERVAL,
        shutdown_timeout: Duration::from_secs(5),
    }
}

pub fn batcher(batch_size: usize, store: Arc<dyn FormStore>) -> Arc<ViewBatcher> {
    ViewBatcher::with_tokio(test_config(batch_size), store)
}

/// Let spawned flush tasks run to completion
///
/// With a paused clock, the runtime only advances time once every task is
/// idle, so a 1ms sleep returns after all ready work has finished.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn record_n(batcher: &ViewBatcher, form_key: &str, referrer: &str, n: usize) {
    for _ in 0..n {
        batcher.record_view(form_key, Some(referrer), None);
    }
}
