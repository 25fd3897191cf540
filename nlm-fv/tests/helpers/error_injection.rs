//! Form stores with injected failures and delays

use async_trait::async_trait;
use nlm_fv::store::{
    FormStats, FormStore, FormUpdate, MemoryFormStore, StoreError, StoreResult, StoredForm,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fails every update for the listed form ids
pub struct FailingStore {
    pub inner: Arc<MemoryFormStore>,
    failing_ids: HashSet<i64>,
}

impl FailingStore {
    pub fn new(inner: Arc<MemoryFormStore>, failing_ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            inner,
            failing_ids: failing_ids.into_iter().collect(),
        }
    }
}

#[async_trait]
impl FormStore for FailingStore {
    async fn find_form(&self, form_key: &str) -> StoreResult<Option<StoredForm>> {
        self.inner.find_form(form_key).await
    }

    async fn update_form(&self, id: i64, update: FormUpdate) -> StoreResult<()> {
        if self.failing_ids.contains(&id) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        self.inner.update_form(id, update).await
    }

    async fn form_stats(&self, form_key: &str) -> StoreResult<Option<FormStats>> {
        self.inner.form_stats(form_key).await
    }
}

/// Every update takes `delay` before touching the inner store
pub struct SlowStore {
    pub inner: Arc<MemoryFormStore>,
    pub delay: Duration,
}

#[async_trait]
impl FormStore for SlowStore {
    async fn find_form(&self, form_key: &str) -> StoreResult<Option<StoredForm>> {
        self.inner.find_form(form_key).await
    }

    async fn update_form(&self, id: i64, update: FormUpdate) -> StoreResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.update_form(id, update).await
    }

    async fn form_stats(&self, form_key: &str) -> StoreResult<Option<FormStats>> {
        self.inner.form_stats(form_key).await
    }
}

/// Simulates a concurrent writer: right before each of the first
/// `interference` updates reaches the store, another client adds one
/// "https://other.com" view to `form_key`
pub struct ConcurrentWriterStore {
    pub inner: Arc<MemoryFormStore>,
    form_key: String,
    remaining: AtomicUsize,
}

impl ConcurrentWriterStore {
    pub fn new(inner: Arc<MemoryFormStore>, form_key: &str) -> Self {
        Self::with_interference(inner, form_key, 1)
    }

    pub fn with_interference(
        inner: Arc<MemoryFormStore>,
        form_key: &str,
        interference: usize,
    ) -> Self {
        Self {
            inner,
            form_key: form_key.to_string(),
            remaining: AtomicUsize::new(interference),
        }
    }

    fn take_turn(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl FormStore for ConcurrentWriterStore {
    async fn find_form(&self, form_key: &str) -> StoreResult<Option<StoredForm>> {
        self.inner.find_form(form_key).await
    }

    async fn update_form(&self, id: i64, update: FormUpdate) -> StoreResult<()> {
        if self.take_turn() {
            let current = self
                .inner
                .find_form(&self.form_key)
                .await?
                .ok_or(StoreError::Missing(id))?;

            let mut traffic = current.traffic.clone();
            *traffic.entry("https://other.com".to_string()).or_insert(0) += 1;

            self.inner
                .update_form(
                    current.id,
                    FormUpdate {
                        increment_views_by: 1,
                        traffic,
                        expected_revision: current.revision,
                    },
                )
                .await?;
        }
        self.inner.update_form(id, update).await
    }

    async fn form_stats(&self, form_key: &str) -> StoreResult<Option<FormStats>> {
        self.inner.form_stats(form_key).await
    }
}

/// Updates never complete
pub struct HangingStore {
    pub inner: Arc<MemoryFormStore>,
}

#[async_trait]
impl FormStore for HangingStore {
    async fn find_form(&self, form_key: &str) -> StoreResult<Option<StoredForm>> {
        self.inner.find_form(form_key).await
    }

    async fn update_form(&self, _id: i64, _update: FormUpdate) -> StoreResult<()> {
        std::future::pending().await
    }

    async fn form_stats(&self, form_key: &str) -> StoreResult<Option<FormStats>> {
        self.inner.form_stats(form_key).await
    }
}
