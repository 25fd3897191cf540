//! In-memory form store
//!
//! Used by tests and by `--memory` runs where nothing should touch disk.
//! Such runs register their forms up front with [`MemoryFormStore::with_forms`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{FormStats, FormStore, FormUpdate, StoreError, StoreResult, StoredForm, Traffic};

#[derive(Debug, Clone)]
struct MemoryForm {
    form_key: String,
    views: i64,
    traffic: Traffic,
    revision: i64,
}

#[derive(Debug, Default)]
struct Inner {
    forms: HashMap<i64, MemoryForm>,
    next_id: i64,
}

/// Form counters held in a map
#[derive(Debug, Default)]
pub struct MemoryFormStore {
    inner: Mutex<Inner>,
    find_calls: AtomicU64,
    update_calls: AtomicU64,
}

impl MemoryFormStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Store holding one fresh form per key
    pub fn with_forms<I, S>(form_keys: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let store = Self::new();
        for form_key in form_keys {
            store.ensure_form(form_key.as_ref())?;
        }
        Ok(store)
    }

    /// Id of the form with `form_key`, adding it first if needed
    pub fn ensure_form(&self, form_key: &str) -> StoreResult<i64> {
        let existing = self
            .lock()?
            .forms
            .iter()
            .find(|(_, form)| form.form_key == form_key)
            .map(|(id, _)| *id);

        match existing {
            Some(id) => Ok(id),
            None => self.insert_form(form_key),
        }
    }

    /// Add a form, returning its internal id
    pub fn insert_form(&self, form_key: &str) -> StoreResult<i64> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.forms.insert(
            id,
            MemoryForm {
                form_key: form_key.to_string(),
                views: 0,
                traffic: Traffic::new(),
                revision: 0,
            },
        );
        Ok(id)
    }

    pub fn remove_form(&self, form_key: &str) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        let before = inner.forms.len();
        inner.forms.retain(|_, form| form.form_key != form_key);
        Ok(inner.forms.len() != before)
    }

    /// Number of `find_form` calls served
    pub fn find_calls(&self) -> u64 {
        self.find_calls.load(Ordering::Relaxed)
    }

    /// Number of `update_form` calls served
    pub fn update_calls(&self) -> u64 {
        self.update_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl FormStore for MemoryFormStore {
    async fn find_form(&self, form_key: &str) -> StoreResult<Option<StoredForm>> {
        self.find_calls.fetch_add(1, Ordering::Relaxed);
        let inner = self.lock()?;
        Ok(inner
            .forms
            .iter()
            .find(|(_, form)| form.form_key == form_key)
            .map(|(id, form)| StoredForm {
                id: *id,
                traffic: form.traffic.clone(),
                revision: form.revision,
            }))
    }

    async fn update_form(&self, id: i64, update: FormUpdate) -> StoreResult<()> {
        self.update_calls.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock()?;
        let form = inner.forms.get_mut(&id).ok_or(StoreError::Missing(id))?;

        if form.revision != update.expected_revision {
            return Err(StoreError::Conflict(id));
        }

        form.views = form.views.saturating_add(update.increment_views_by);
        form.traffic = update.traffic;
        form.revision += 1;
        Ok(())
    }

    async fn form_stats(&self, form_key: &str) -> StoreResult<Option<FormStats>> {
        let inner = self.lock()?;
        Ok(inner
            .forms
            .values()
            .find(|form| form.form_key == form_key)
            .map(|form| FormStats {
                form_key: form.form_key.clone(),
                views: form.views,
                traffic: form.traffic.clone(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_update_cycle() {
        let store = MemoryFormStore::new();
        let id = store.insert_form("f1").unwrap();

        let form = store.find_form("f1").await.unwrap().unwrap();
        assert_eq!(form.id, id);

        store
            .update_form(
                id,
                FormUpdate {
                    increment_views_by: 2,
                    traffic: Traffic::from([("direct".to_string(), 2)]),
                    expected_revision: form.revision,
                },
            )
            .await
            .unwrap();

        let stats = store.form_stats("f1").await.unwrap().unwrap();
        assert_eq!(stats.views, 2);
        assert_eq!(store.find_calls(), 1);
        assert_eq!(store.update_calls(), 1);
    }

    #[tokio::test]
    async fn test_with_forms_registers_each_key_once() {
        let store = MemoryFormStore::with_forms(["f1", "f2", "f1"]).unwrap();

        let f1 = store.find_form("f1").await.unwrap().unwrap();
        assert!(store.find_form("f2").await.unwrap().is_some());
        assert_eq!(store.ensure_form("f1").unwrap(), f1.id);
        assert_eq!(store.form_stats("f1").await.unwrap().unwrap().views, 0);
    }

    #[tokio::test]
    async fn test_memory_store_conflict_and_missing() {
        let store = MemoryFormStore::new();
        let id = store.insert_form("f1").unwrap();

        let stale = FormUpdate {
            increment_views_by: 1,
            traffic: Traffic::new(),
            expected_revision: 7,
        };
        assert!(matches!(
            store.update_form(id, stale.clone()).await,
            Err(StoreError::Conflict(_))
        ));

        assert!(store.remove_form("f1").unwrap());
        assert!(matches!(
            store.update_form(id, stale).await,
            Err(StoreError::Missing(_))
        ));
    }
}
