//! In-memory [`RecordStore`] for tests and demos.
//!
//! Evaluates predicate trees against record payloads, applies multi-key
//! sorting and serves offset-based cursors. Cursor tokens are the hex form of
//! a little-endian `u64` offset: a forward token is the first offset of the
//! requested page, a backward token is the (exclusive) end of it.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use runlens_core::{
    Bindable, CompareOp, PageCursor, PageResult, Params, Predicate, QueryRequest,
    RecordEnvelope, RecordStore, SchemaValue, SortDirection, SortKey,
};

/// Pseudo-locations resolved against the envelope instead of the payload.
const ID_LOCATION: &str = "$id";
const TYPE_LOCATION: &str = "$type";
const VERSION_LOCATION: &str = "$version";

/// Vec-backed record store. Query order is insertion order unless sorted.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<Vec<RecordEnvelope>>,
    failures: Mutex<VecDeque<String>>,
    queries: AtomicU64,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = RecordEnvelope>) -> Self {
        let store = Self::new();
        for record in records {
            store.upsert(record);
        }
        store
    }

    /// Inserts a record, replacing any record with the same id in place.
    pub fn upsert(&self, record: RecordEnvelope) {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of queries received, including failed ones.
    #[must_use]
    pub fn query_count(&self) -> u64 {
        self.queries.load(AtomicOrdering::Relaxed)
    }

    /// Makes the next query fail with `message`. Calls queue up.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.failures.lock().push_back(message.into());
    }

    fn execute(&self, request: &QueryRequest) -> anyhow::Result<PageResult> {
        if let Some(message) = self.failures.lock().pop_front() {
            bail!(message);
        }

        let empty = Params::new();
        let (predicate, params) = match &request.r#where {
            Some(filter) => {
                filter.validate()?;
                (filter.predicate.as_ref(), &filter.params)
            }
            None => (None, &empty),
        };

        let mut matched = Vec::new();
        for record in self.records.read().iter() {
            let keep = match predicate {
                Some(predicate) => evaluate(predicate, record, params)?,
                None => true,
            };
            if keep {
                matched.push(record.clone());
            }
        }
        sort_records(&mut matched, &request.sort);

        let total = matched.len();
        let limit = request
            .limit
            .map_or(total, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
        let (start, end) = match &request.cursor {
            None => (0, limit.min(total)),
            Some(PageCursor::Forward(token)) => {
                let start = decode_offset(token)?.min(total);
                (start, start.saturating_add(limit).min(total))
            }
            Some(PageCursor::Backward(token)) => {
                let end = decode_offset(token)?.min(total);
                (end.saturating_sub(limit), end)
            }
        };

        let records = matched.drain(start..end).collect();
        Ok(PageResult {
            records,
            next: (end < total).then(|| encode_offset(end)),
            previous: (start > 0).then(|| encode_offset(start)),
        })
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn query(&self, request: &QueryRequest) -> anyhow::Result<PageResult> {
        self.queries.fetch_add(1, AtomicOrdering::Relaxed);
        self.execute(request)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn evaluate(
    predicate: &Predicate,
    record: &RecordEnvelope,
    params: &Params,
) -> anyhow::Result<bool> {
    match predicate {
        Predicate::And(children) => {
            for child in children {
                if !evaluate(child, record, params)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Predicate::Or(children) => {
            for child in children {
                if evaluate(child, record, params)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Predicate::Not(child) => Ok(!evaluate(child, record, params)?),
        Predicate::Compare(comparison) => {
            let left = locate(record, comparison.location());
            let right = match comparison.value() {
                Bindable::BindValue { name } => params
                    .get(name)
                    .cloned()
                    .ok_or_else(|| anyhow!("no value bound for parameter `{name}`"))?,
                Bindable::Literal { value } => value.clone(),
                Bindable::Locatable { path } => locate(record, path),
            };
            Ok(apply(comparison.operation(), &left, &right))
        }
        Predicate::Unknown(unknown) => {
            bail!("unsupported predicate kind {:?}", unknown.kind)
        }
    }
}

fn locate(record: &RecordEnvelope, location: &str) -> SchemaValue {
    match location {
        ID_LOCATION => SchemaValue::String(record.id.clone()),
        TYPE_LOCATION => SchemaValue::String(record.type_tag.clone()),
        #[allow(clippy::cast_precision_loss)]
        VERSION_LOCATION => SchemaValue::Number(record.version as f64),
        path => record.field(path).cloned().unwrap_or_default(),
    }
}

fn apply(op: CompareOp, left: &SchemaValue, right: &SchemaValue) -> bool {
    match op {
        CompareOp::Eq => left == right,
        CompareOp::Neq => left != right,
        CompareOp::Lt => left.compare(right) == Some(Ordering::Less),
        CompareOp::Lte => matches!(left.compare(right), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => left.compare(right) == Some(Ordering::Greater),
        CompareOp::Gte => matches!(
            left.compare(right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

/// Stable multi-key sort. Absent values sort last in either direction.
fn sort_records(records: &mut [RecordEnvelope], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        for key in keys {
            let left = locate(a, &key.column);
            let right = locate(b, &key.column);
            let ordering = match (left.is_none(), right.is_none()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => {
                    let ordering = left.compare(&right).unwrap_or(Ordering::Equal);
                    match key.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

// ---------------------------------------------------------------------------
// Cursors
// ---------------------------------------------------------------------------

fn encode_offset(offset: usize) -> String {
    hex::encode((offset as u64).to_le_bytes())
}

fn decode_offset(token: &str) -> anyhow::Result<usize> {
    let bytes = hex::decode(token).with_context(|| format!("malformed cursor {token:?}"))?;
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| anyhow!("cursor {token:?} must encode 8 bytes"))?;
    usize::try_from(u64::from_le_bytes(bytes)).context("cursor offset out of range")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
