//! Best-effort id -> display-name cache.
//!
//! Built from one bounded listing query and replaced wholesale on every
//! (re)load. Failures are logged and leave the cache usable with
//! placeholder labels; they never block or fail the primary fetch.

use std::collections::HashMap;
use std::sync::Arc;

use runlens_core::{Bindable, CompareOp, Predicate, QueryRequest, RecordStore, WherePredicate};

use crate::config::ReferenceConfig;
use crate::error::FetchError;
use crate::slot::{QuerySlot, Ticket};

/// Characters of the raw id kept in a placeholder label.
const PLACEHOLDER_ID_CHARS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStatus {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
    Failed,
}

/// One immutable generation of the cache.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSnapshot {
    pub status: CacheStatus,
    names: HashMap<String, String>,
}

impl ReferenceSnapshot {
    #[must_use]
    pub fn name(&self, id: &str) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    /// The display name for `id`, or a placeholder derived from it.
    #[must_use]
    pub fn label(&self, id: &str) -> String {
        self.name(id)
            .map_or_else(|| placeholder_label(id), str::to_owned)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Label used when no display name is known: `#` plus a short id prefix.
#[must_use]
pub fn placeholder_label(id: &str) -> String {
    let short: String = id.chars().take(PLACEHOLDER_ID_CHARS).collect();
    format!("#{short}")
}

/// Reference cache with its own request slot.
pub struct ReferenceCache {
    config: ReferenceConfig,
    slot: QuerySlot<ReferenceSnapshot>,
}

impl ReferenceCache {
    #[must_use]
    pub fn new(config: ReferenceConfig) -> Self {
        Self {
            config,
            slot: QuerySlot::new("references", ReferenceSnapshot::default()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<ReferenceSnapshot> {
        self.slot.snapshot()
    }

    /// The bounded listing query that builds the cache.
    #[must_use]
    pub fn listing_request(&self) -> QueryRequest {
        let filter = WherePredicate::new(Predicate::compare(
            "$type",
            CompareOp::Eq,
            Bindable::literal(self.config.record_type.as_str()),
        ));
        QueryRequest::new(Some(filter)).with_limit(self.config.limit)
    }

    /// Loads the cache unless it has already been loaded or is loading.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cancelled`] if a newer load superseded this one.
    /// Store failures are logged and recorded as [`CacheStatus::Failed`],
    /// not returned.
    pub async fn ensure_loaded<S: RecordStore>(&self, store: &S) -> Result<(), FetchError> {
        let started = self.slot.step(|snapshot| {
            if snapshot.status == CacheStatus::NotLoaded {
                (Self::loading(snapshot), Some(()))
            } else {
                (snapshot.clone(), None)
            }
        });
        match started {
            Some((ticket, ())) => self.load(&ticket, store).await,
            None => Ok(()),
        }
    }

    /// Reloads the cache, superseding any load in flight. Previously known
    /// names stay readable until the new listing arrives.
    ///
    /// # Errors
    ///
    /// As for [`ReferenceCache::ensure_loaded`].
    pub async fn refresh<S: RecordStore>(&self, store: &S) -> Result<(), FetchError> {
        let (ticket, ()) = self.slot.begin(|snapshot| (Self::loading(snapshot), ()));
        self.load(&ticket, store).await
    }

    fn loading(snapshot: &ReferenceSnapshot) -> ReferenceSnapshot {
        ReferenceSnapshot {
            status: CacheStatus::Loading,
            names: snapshot.names.clone(),
        }
    }

    /// Status after an abandoned load: names kept, nothing in flight.
    fn settled(snapshot: &ReferenceSnapshot) -> ReferenceSnapshot {
        ReferenceSnapshot {
            status: if snapshot.names.is_empty() {
                CacheStatus::NotLoaded
            } else {
                CacheStatus::Loaded
            },
            names: snapshot.names.clone(),
        }
    }

    async fn load<S: RecordStore>(&self, ticket: &Ticket, store: &S) -> Result<(), FetchError> {
        let request = self.listing_request();
        match self.slot.run(ticket, store.query(&request)).await {
            Ok(page) => {
                let names: HashMap<String, String> = page
                    .records
                    .iter()
                    .filter_map(|record| {
                        record
                            .field(&self.config.name_field)
                            .and_then(|name| name.as_str())
                            .map(|name| (record.id.clone(), name.to_owned()))
                    })
                    .collect();
                let count = names.len();
                if self.slot.complete_or_settle(
                    ticket,
                    move |_| ReferenceSnapshot {
                        status: CacheStatus::Loaded,
                        names,
                    },
                    Self::settled,
                ) {
                    tracing::debug!(names = count, "reference cache loaded");
                }
                Ok(())
            }
            Err(FetchError::Cancelled) => {
                self.slot.settle(ticket, Self::settled);
                Err(FetchError::Cancelled)
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "reference cache load failed; using placeholder labels"
                );
                self.slot.complete_or_settle(
                    ticket,
                    |_| ReferenceSnapshot {
                        status: CacheStatus::Failed,
                        names: HashMap::new(),
                    },
                    Self::settled,
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use runlens_core::{RecordEnvelope, SchemaValue};

    fn workflow(id: &str, name: &str) -> RecordEnvelope {
        let data: SchemaValue = [("name".to_string(), SchemaValue::from(name))]
            .into_iter()
            .collect();
        RecordEnvelope::new(id, "workflow", data)
    }

    fn store() -> MemoryRecordStore {
        MemoryRecordStore::with_records([
            workflow("wf-1", "Nightly build"),
            workflow("wf-2", "Deploy"),
            RecordEnvelope::new("run-1", "execution", SchemaValue::None),
        ])
    }

    #[test]
    fn placeholder_uses_short_id() {
        assert_eq!(placeholder_label("0123456789abcdef"), "#01234567");
        assert_eq!(placeholder_label("abc"), "#abc");
    }

    #[test]
    fn listing_request_is_bounded() {
        let cache = ReferenceCache::new(ReferenceConfig::default());
        let request = cache.listing_request();
        assert_eq!(request.limit, Some(1000));
        assert!(request.cursor.is_none());
    }

    #[tokio::test]
    async fn loads_once_and_labels_known_ids() {
        let store = store();
        let cache = ReferenceCache::new(ReferenceConfig::default());
        cache.ensure_loaded(&store).await.expect("load");
        cache.ensure_loaded(&store).await.expect("cached");
        assert_eq!(store.query_count(), 1);

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.status, CacheStatus::Loaded);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.label("wf-2"), "Deploy");
        assert_eq!(snapshot.label("wf-unknown-id"), "#wf-unkno");
    }

    #[tokio::test]
    async fn failure_degrades_to_placeholders() {
        let store = store();
        store.fail_next("listing unavailable");
        let cache = ReferenceCache::new(ReferenceConfig::default());
        cache.ensure_loaded(&store).await.expect("best effort");

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.status, CacheStatus::Failed);
        assert_eq!(snapshot.label("wf-1"), "#wf-1");

        cache.refresh(&store).await.expect("refresh");
        assert_eq!(cache.snapshot().label("wf-1"), "Nightly build");
    }

    #[tokio::test]
    async fn refresh_replaces_wholesale() {
        let store = store();
        let cache = ReferenceCache::new(ReferenceConfig::default());
        cache.ensure_loaded(&store).await.expect("load");

        store.upsert(workflow("wf-1", "Nightly build v2"));
        cache.refresh(&store).await.expect("refresh");
        assert_eq!(cache.snapshot().label("wf-1"), "Nightly build v2");
        assert_eq!(store.query_count(), 2);
    }
}
