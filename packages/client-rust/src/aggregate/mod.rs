//! Aggregation orchestrator: cross-source run records over a date range.
//!
//! One fetch builds a disjunctive query over the selected sources, walks
//! every page of the result, dedupes by id, derives a timestamp per record
//! and keeps the ones inside the half-open `[start, end)` range. The
//! id -> name [`ReferenceCache`] is loaded concurrently and applied when
//! entries are read, so names arriving after the primary results still show
//! up on the next read.

pub mod reference;

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use runlens_core::{
    Bindable, CompareOp, PageCursor, Params, Predicate, QueryRequest, RecordEnvelope,
    RecordStore, SchemaValue, WherePredicate,
};
use serde::Serialize;

pub use reference::{placeholder_label, CacheStatus, ReferenceCache, ReferenceSnapshot};

use crate::config::{AggregationConfig, ClientConfig};
use crate::error::{FetchError, FetchFailure};
use crate::slot::QuerySlot;

// ---------------------------------------------------------------------------
// Range
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("range start {start_ms} must be before end {end_ms}")]
    Empty { start_ms: i64, end_ms: i64 },
}

/// Half-open `[start_ms, end_ms)` interval in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    start_ms: i64,
    end_ms: i64,
}

impl DateRange {
    /// # Errors
    ///
    /// Returns [`RangeError::Empty`] unless `start_ms < end_ms`.
    pub fn new(start_ms: i64, end_ms: i64) -> Result<Self, RangeError> {
        if start_ms < end_ms {
            Ok(Self { start_ms, end_ms })
        } else {
            Err(RangeError::Empty { start_ms, end_ms })
        }
    }

    #[must_use]
    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    #[must_use]
    pub fn end_ms(&self) -> i64 {
        self.end_ms
    }

    #[must_use]
    pub fn contains(&self, timestamp_ms: i64) -> bool {
        self.start_ms <= timestamp_ms && timestamp_ms < self.end_ms
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// A record with its derived timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedRecord {
    pub record: RecordEnvelope,
    pub timestamp_ms: i64,
}

/// Orchestrator view state. Records are ordered by `(timestamp, id)`.
#[derive(Debug, Clone, Default)]
pub struct AggregationState {
    pub sources: BTreeSet<String>,
    pub range: Option<DateRange>,
    pub records: Arc<Vec<TimedRecord>>,
    pub is_loading: bool,
    /// Last failure; the previous records stay in place while it is set.
    pub error: Option<FetchFailure>,
}

impl AggregationState {
    fn settled(&self) -> Self {
        Self {
            is_loading: false,
            ..self.clone()
        }
    }
}

/// One displayable entry: a record enriched with its source label.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedRun {
    pub id: String,
    pub timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Display name from the reference cache, or a placeholder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub record: RecordEnvelope,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Fetches and merges run records across sources.
pub struct AggregationOrchestrator<S> {
    store: S,
    config: AggregationConfig,
    request_deadline: Option<Duration>,
    executions: QuerySlot<AggregationState>,
    references: ReferenceCache,
}

impl<S: RecordStore> AggregationOrchestrator<S> {
    #[must_use]
    pub fn new(store: S, config: &ClientConfig) -> Self {
        Self {
            store,
            config: config.aggregation.clone(),
            request_deadline: config.request_deadline,
            executions: QuerySlot::new("executions", AggregationState::default()),
            references: ReferenceCache::new(config.aggregation.reference.clone()),
        }
    }

    #[must_use]
    pub fn state(&self) -> Arc<AggregationState> {
        self.executions.snapshot()
    }

    #[must_use]
    pub fn references(&self) -> &ReferenceCache {
        &self.references
    }

    /// Cancels the in-flight primary fetch, if any.
    pub fn cancel(&self) {
        self.executions.cancel();
    }

    /// Fetches records of `sources` inside `range`, superseding any fetch in
    /// flight. The reference cache is loaded alongside on first use.
    ///
    /// An empty source set clears the results without contacting the store.
    ///
    /// # Errors
    ///
    /// [`FetchError::Cancelled`] when superseded or past the deadline (the
    /// state is left to the newer fetch); [`FetchError::Store`] when the
    /// primary fetch failed, which is also recorded on the state. Reference
    /// cache failures are never returned.
    pub async fn fetch(
        &self,
        sources: BTreeSet<String>,
        range: DateRange,
    ) -> Result<(), FetchError> {
        if sources.is_empty() {
            return self.fetch_executions(sources, range).await;
        }
        let (primary, references) = tokio::join!(
            self.fetch_executions(sources, range),
            self.references.ensure_loaded(&self.store),
        );
        if references.is_err() {
            tracing::debug!("reference cache load superseded");
        }
        primary
    }

    /// Re-runs the current fetch and rebuilds the reference cache.
    ///
    /// Does nothing before the first [`AggregationOrchestrator::fetch`].
    ///
    /// # Errors
    ///
    /// As for [`AggregationOrchestrator::fetch`].
    pub async fn reload(&self) -> Result<(), FetchError> {
        let state = self.state();
        let Some(range) = state.range else {
            return Ok(());
        };
        let (primary, references) = tokio::join!(
            self.fetch_executions(state.sources.clone(), range),
            self.references.refresh(&self.store),
        );
        if references.is_err() {
            tracing::debug!("reference cache refresh superseded");
        }
        primary
    }

    /// Current records, enriched with the latest reference names.
    #[must_use]
    pub fn entries(&self) -> Vec<AggregatedRun> {
        let state = self.executions.snapshot();
        let references = self.references.snapshot();
        state
            .records
            .iter()
            .map(|timed| {
                let source_id = text_field(&timed.record, &self.config.source_field);
                let source_label = source_id.as_deref().map(|id| references.label(id));
                AggregatedRun {
                    id: timed.record.id.clone(),
                    timestamp_ms: timed.timestamp_ms,
                    source_id,
                    source_label,
                    kind: text_field(&timed.record, &self.config.kind_field),
                    record: timed.record.clone(),
                }
            })
            .collect()
    }

    async fn fetch_executions(
        &self,
        sources: BTreeSet<String>,
        range: DateRange,
    ) -> Result<(), FetchError> {
        let filter = build_query(&self.config, &sources);
        let (ticket, ()) = self.executions.begin(|state| {
            let next = AggregationState {
                sources,
                range: Some(range),
                is_loading: filter.is_some(),
                ..state.clone()
            };
            (next, ())
        });

        let Some(filter) = filter else {
            self.executions.complete(&ticket, |state| AggregationState {
                records: Arc::default(),
                is_loading: false,
                error: None,
                ..state.clone()
            });
            return Ok(());
        };

        if let Some(deadline) = self.request_deadline {
            ticket.cancel_after(deadline);
        }
        let pages = collect_pages(
            &self.store,
            filter,
            self.config.page_limit,
            self.config.max_pages,
        );
        match self.executions.run(&ticket, pages).await {
            Ok(records) => {
                let fetched = records.len();
                let timed = finalize(records, &self.config.timestamp_fields, range);
                let kept = timed.len();
                if self.executions.complete_or_settle(
                    &ticket,
                    move |state| AggregationState {
                        records: Arc::new(timed),
                        is_loading: false,
                        error: None,
                        ..state.clone()
                    },
                    AggregationState::settled,
                ) {
                    tracing::info!(fetched, kept, "aggregation results applied");
                }
                Ok(())
            }
            Err(FetchError::Cancelled) => {
                self.executions.settle(&ticket, AggregationState::settled);
                Err(FetchError::Cancelled)
            }
            Err(err) => {
                tracing::warn!(
                    request_id = %ticket.request_id(),
                    error = %err,
                    "aggregation fetch failed"
                );
                let failure = FetchFailure::new(&ticket, &err);
                self.executions.complete_or_settle(
                    &ticket,
                    move |state| AggregationState {
                        is_loading: false,
                        error: Some(failure),
                        ..state.clone()
                    },
                    AggregationState::settled,
                );
                Err(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Query construction and post-processing
// ---------------------------------------------------------------------------

/// Builds `OR` over sources (and kinds) with each source id bound as a
/// parameter. Returns `None` for an empty source set.
#[must_use]
pub fn build_query(
    config: &AggregationConfig,
    sources: &BTreeSet<String>,
) -> Option<WherePredicate> {
    let mut clauses = Vec::new();
    let mut params = Params::new();
    for (index, source) in sources.iter().enumerate() {
        let bind = format!("source{index}");
        params.insert(bind.clone(), SchemaValue::from(source.as_str()));
        let source_match =
            Predicate::compare(&config.source_field, CompareOp::Eq, Bindable::bind(bind));
        if config.kinds.is_empty() {
            clauses.push(source_match);
            continue;
        }
        for kind in &config.kinds {
            clauses.extend(Predicate::and(vec![
                source_match.clone(),
                Predicate::compare(
                    &config.kind_field,
                    CompareOp::Eq,
                    Bindable::literal(kind.as_str()),
                ),
            ]));
        }
    }
    Predicate::or(clauses).map(|predicate| WherePredicate {
        predicate: Some(predicate),
        params,
    })
}

fn text_field(record: &RecordEnvelope, field: &str) -> Option<String> {
    if field.is_empty() {
        return None;
    }
    record
        .field(field)
        .and_then(SchemaValue::as_str)
        .map(str::to_owned)
}

/// Follows `next` tokens until the result set ends or `max_pages` is reached.
async fn collect_pages<S: RecordStore>(
    store: &S,
    filter: WherePredicate,
    page_limit: u32,
    max_pages: u32,
) -> anyhow::Result<Vec<RecordEnvelope>> {
    let mut request = QueryRequest::new(Some(filter)).with_limit(page_limit);
    let mut records = Vec::new();
    for _ in 0..max_pages {
        let page = store.query(&request).await?;
        records.extend(page.records);
        match page.next {
            Some(token) => request.cursor = Some(PageCursor::Forward(token)),
            None => return Ok(records),
        }
    }
    tracing::warn!(max_pages, "page limit reached; aggregation results truncated");
    Ok(records)
}

/// First finite timestamp found among `fields`, in epoch milliseconds.
///
/// Numbers are taken as-is (fractions truncated); strings must hold an
/// integer.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn derive_timestamp(record: &RecordEnvelope, fields: &[String]) -> Option<i64> {
    fields.iter().find_map(|field| match record.field(field)? {
        SchemaValue::Number(n) if n.is_finite() => Some(n.trunc() as i64),
        SchemaValue::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Dedupes by id (first occurrence wins), drops records without a timestamp
/// or outside `range`, and orders by `(timestamp, id)`.
fn finalize(records: Vec<RecordEnvelope>, fields: &[String], range: DateRange) -> Vec<TimedRecord> {
    let mut seen = HashSet::new();
    let mut untimed = 0_usize;
    let mut timed = Vec::new();
    for record in records {
        if !seen.insert(record.id.clone()) {
            continue;
        }
        match derive_timestamp(&record, fields) {
            Some(timestamp_ms) if range.contains(timestamp_ms) => {
                timed.push(TimedRecord {
                    record,
                    timestamp_ms,
                });
            }
            Some(_) => {}
            None => untimed += 1,
        }
    }
    if untimed > 0 {
        tracing::debug!(untimed, "excluded records without a timestamp");
    }
    timed.sort_by(|a, b| {
        a.timestamp_ms
            .cmp(&b.timestamp_ms)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    timed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
