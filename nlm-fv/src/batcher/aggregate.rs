//! Per-flush aggregation of view events

use std::collections::BTreeMap;

use super::event::ViewEvent;

/// Counts for one form within a single flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormTally {
    pub count: u64,
    pub traffic_by_source: BTreeMap<String, u64>,
}

/// form_key -> tally, built fresh for every flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormAggregate {
    forms: BTreeMap<String, FormTally>,
}

impl FormAggregate {
    /// Fold a batch of events into per-form counts
    pub fn from_events<'a, I>(events: I) -> Self
    where
        I: IntoIterator<Item = &'a ViewEvent>,
    {
        let mut aggregate = Self::default();
        for event in events {
            aggregate.add(event);
        }
        aggregate
    }

    pub fn add(&mut self, event: &ViewEvent) {
        let tally = self.forms.entry(event.form_key.clone()).or_default();
        tally.count += 1;
        *tally
            .traffic_by_source
            .entry(event.referrer.clone())
            .or_insert(0) += 1;
    }

    pub fn get(&self, form_key: &str) -> Option<&FormTally> {
        self.forms.get(form_key)
    }

    pub fn len(&self) -> usize {
        self.forms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }

    /// Total events folded in
    pub fn total_events(&self) -> u64 {
        self.forms.values().map(|t| t.count).sum()
    }

    pub fn into_forms(self) -> impl Iterator<Item = (String, FormTally)> {
        self.forms.into_iter()
    }
}

/// Merge per-source counts into persisted traffic
///
/// Numeric addition per key, union of keys. Saturates rather than wrapping so
/// a counter can never go backwards.
pub fn merge_traffic(
    persisted: &BTreeMap<String, i64>,
    additions: &BTreeMap<String, u64>,
) -> BTreeMap<String, i64> {
    let mut merged = persisted.clone();
    for (source, count) in additions {
        let add = i64::try_from(*count).unwrap_or(i64::MAX);
        let entry = merged.entry(source.clone()).or_insert(0);
        *entry = entry.saturating_add(add);
    }
    merged
}
