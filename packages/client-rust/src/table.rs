//! Table controller: drives a [`NavigatorState`] against a [`RecordStore`].
//!
//! Every navigator transition that yields [`Effect::Reload`] issues a request
//! through the table's [`QuerySlot`], so at most one page request is live and
//! only the latest one is ever applied. Selection transitions never fetch.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use runlens_core::{
    Effect, EditError, NavigatorState, NodePath, Predicate, QueryRequest, RecordStore,
    WherePredicate,
};

use crate::config::ClientConfig;
use crate::error::{FetchError, FetchFailure};
use crate::slot::{QuerySlot, Ticket};

/// What a table renders.
#[derive(Debug, Clone, Default)]
pub struct TableView {
    pub navigator: NavigatorState,
    pub is_loading: bool,
    /// Last failure; cleared by the next successful load. The previous page
    /// stays displayed while it is set.
    pub error: Option<FetchFailure>,
}

impl TableView {
    /// The same view with loading cleared.
    fn settled(&self) -> Self {
        Self {
            is_loading: false,
            ..self.clone()
        }
    }
}

/// Owns one table's state and its page requests.
pub struct TableController<S> {
    store: S,
    slot: QuerySlot<TableView>,
    request_deadline: Option<Duration>,
}

impl<S: RecordStore> TableController<S> {
    #[must_use]
    pub fn new(store: S, config: &ClientConfig) -> Self {
        Self::with_state(store, NavigatorState::new(config.page_size), config)
    }

    /// Starts from a prepared navigator, e.g. one with a filter already set.
    #[must_use]
    pub fn with_state(store: S, navigator: NavigatorState, config: &ClientConfig) -> Self {
        Self {
            store,
            slot: QuerySlot::new(
                "table",
                TableView {
                    navigator,
                    ..TableView::default()
                },
            ),
            request_deadline: config.request_deadline,
        }
    }

    #[must_use]
    pub fn view(&self) -> Arc<TableView> {
        self.slot.snapshot()
    }

    /// Cancels the in-flight page request, if any.
    pub fn cancel(&self) {
        self.slot.cancel();
    }

    // ---- Reloading transitions ----

    /// Loads the current state verbatim (initial load, retry after failure).
    ///
    /// # Errors
    ///
    /// [`FetchError::Cancelled`] when superseded; [`FetchError::Store`] when
    /// the store failed, which is also recorded on the view.
    pub async fn refresh(&self) -> Result<Effect, FetchError> {
        self.dispatch(NavigatorState::refresh).await
    }

    /// # Errors
    ///
    /// [`FetchError::Cancelled`] when superseded; [`FetchError::Store`] when
    /// the store failed, which is also recorded on the view.
    pub async fn set_filter(&self, filter: WherePredicate) -> Result<Effect, FetchError> {
        self.dispatch(move |nav| nav.set_filter(filter)).await
    }

    /// # Errors
    ///
    /// [`FetchError::Cancelled`] when superseded; [`FetchError::Store`] when
    /// the store failed, which is also recorded on the view.
    pub async fn clear_filter(&self) -> Result<Effect, FetchError> {
        self.dispatch(NavigatorState::clear_filter).await
    }

    /// Replaces or removes one node of the standing filter, then reloads.
    ///
    /// An invalid edit leaves the state untouched and issues no request.
    ///
    /// # Errors
    ///
    /// Returns the [`EditError`] of an invalid edit in the outer result; the
    /// inner result carries the fetch outcome as for the other transitions.
    pub async fn edit_filter(
        &self,
        path: &NodePath,
        replacement: Option<Predicate>,
    ) -> Result<Result<Effect, FetchError>, EditError> {
        let mut invalid = None;
        let started = self.slot.step(|view| match view.navigator.edit_filter(path, replacement) {
            Ok((navigator, effect)) => Self::transition(view, navigator, effect),
            Err(err) => {
                invalid = Some(err);
                (view.clone(), None)
            }
        });
        if let Some(err) = invalid {
            return Err(err);
        }
        Ok(match started {
            Some((ticket, request)) => self.reload(ticket, request).await.map(|()| Effect::Reload),
            None => Ok(Effect::None),
        })
    }

    /// # Errors
    ///
    /// [`FetchError::Cancelled`] when superseded; [`FetchError::Store`] when
    /// the store failed, which is also recorded on the view.
    pub async fn toggle_sort(&self, column: &str) -> Result<Effect, FetchError> {
        self.dispatch(|nav| nav.toggle_sort(column)).await
    }

    /// No-op at the end of the result set.
    ///
    /// # Errors
    ///
    /// [`FetchError::Cancelled`] when superseded; [`FetchError::Store`] when
    /// the store failed, which is also recorded on the view.
    pub async fn next_page(&self) -> Result<Effect, FetchError> {
        self.dispatch(NavigatorState::next_page).await
    }

    /// No-op at the start of the result set.
    ///
    /// # Errors
    ///
    /// [`FetchError::Cancelled`] when superseded; [`FetchError::Store`] when
    /// the store failed, which is also recorded on the view.
    pub async fn prev_page(&self) -> Result<Effect, FetchError> {
        self.dispatch(NavigatorState::prev_page).await
    }

    /// # Errors
    ///
    /// [`FetchError::Cancelled`] when superseded; [`FetchError::Store`] when
    /// the store failed, which is also recorded on the view.
    pub async fn first_page(&self) -> Result<Effect, FetchError> {
        self.dispatch(NavigatorState::first_page).await
    }

    /// # Errors
    ///
    /// [`FetchError::Cancelled`] when superseded; [`FetchError::Store`] when
    /// the store failed, which is also recorded on the view.
    pub async fn set_page_size(&self, page_size: NonZeroU32) -> Result<Effect, FetchError> {
        self.dispatch(|nav| nav.set_page_size(page_size)).await
    }

    // ---- Selection ----

    pub fn toggle_row_selection(&self, id: &str) {
        self.slot.update(|view| TableView {
            navigator: without_reload(view.navigator.toggle_row_selection(id)),
            ..view.clone()
        });
    }

    pub fn toggle_select_all_on_page(&self) {
        self.slot.update(|view| TableView {
            navigator: without_reload(view.navigator.toggle_select_all_on_page()),
            ..view.clone()
        });
    }

    // ---- Internals ----

    /// Applies a navigator transition and, if it asks for one, runs the reload.
    ///
    /// Returns the transition's effect once the reload has been applied.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cancelled`] when a newer request superseded this
    /// one or its deadline fired (the view is not touched), and
    /// [`FetchError::Store`] when the store failed (recorded on the view).
    async fn dispatch<F>(&self, f: F) -> Result<Effect, FetchError>
    where
        F: FnOnce(&NavigatorState) -> (NavigatorState, Effect),
    {
        let started = self.slot.step(|view| {
            let (navigator, effect) = f(&view.navigator);
            Self::transition(view, navigator, effect)
        });
        match started {
            Some((ticket, request)) => self.reload(ticket, request).await.map(|()| Effect::Reload),
            None => Ok(Effect::None),
        }
    }

    fn transition(
        view: &TableView,
        navigator: NavigatorState,
        effect: Effect,
    ) -> (TableView, Option<QueryRequest>) {
        match effect {
            Effect::Reload => {
                let request = navigator.to_request();
                let next = TableView {
                    navigator,
                    is_loading: true,
                    error: view.error.clone(),
                };
                (next, Some(request))
            }
            Effect::None => (
                TableView {
                    navigator,
                    ..view.clone()
                },
                None,
            ),
        }
    }

    async fn reload(&self, ticket: Ticket, request: QueryRequest) -> Result<(), FetchError> {
        if let Some(deadline) = self.request_deadline {
            ticket.cancel_after(deadline);
        }
        match self.slot.run(&ticket, self.store.query(&request)).await {
            Ok(result) => {
                let count = result.records.len();
                if self.slot.complete_or_settle(
                    &ticket,
                    move |view| TableView {
                        navigator: view.navigator.with_page(result.into()),
                        is_loading: false,
                        error: None,
                    },
                    TableView::settled,
                ) {
                    tracing::debug!(records = count, "table page applied");
                }
                Ok(())
            }
            Err(FetchError::Cancelled) => {
                self.slot.settle(&ticket, TableView::settled);
                Err(FetchError::Cancelled)
            }
            Err(err) => {
                tracing::warn!(
                    request_id = %ticket.request_id(),
                    error = %err,
                    "table load failed"
                );
                let failure = FetchFailure::new(&ticket, &err);
                self.slot.complete_or_settle(
                    &ticket,
                    move |view| TableView {
                        navigator: view.navigator.clone(),
                        is_loading: false,
                        error: Some(failure),
                    },
                    TableView::settled,
                );
                Err(err)
            }
        }
    }
}

fn without_reload((navigator, effect): (NavigatorState, Effect)) -> NavigatorState {
    debug_assert_eq!(effect, Effect::None);
    navigator
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use runlens_core::{Bindable, CompareOp, RecordEnvelope, SchemaValue, SortKey};

    fn record(id: &str, status: &str, rank: i64) -> RecordEnvelope {
        let data: SchemaValue = [
            ("status".to_string(), SchemaValue::from(status)),
            ("rank".to_string(), SchemaValue::from(rank)),
        ]
        .into_iter()
        .collect();
        RecordEnvelope::new(id, "execution", data)
    }

    fn store() -> MemoryRecordStore {
        MemoryRecordStore::with_records((0..7).map(|i| {
            let status = if i % 2 == 0 { "ok" } else { "failed" };
            record(&format!("r{i}"), status, i)
        }))
    }

    fn ids(view: &TableView) -> Vec<&str> {
        view.navigator
            .page()
            .records
            .iter()
            .map(|r| r.id.as_str())
            .collect()
    }

    #[tokio::test]
    async fn pages_forward_and_back_through_results() {
        let table = TableController::new(store(), &ClientConfig::default());
        assert_eq!(table.refresh().await.expect("load"), Effect::Reload);
        assert_eq!(ids(&table.view()), ["r0", "r1", "r2"]);
        assert!(!table.view().navigator.has_previous());

        let _effect = table.next_page().await.expect("next");
        let _effect = table.next_page().await.expect("next");
        assert_eq!(ids(&table.view()), ["r6"]);
        assert!(!table.view().navigator.has_next());

        // At the edge: no fetch, state unchanged.
        assert_eq!(table.next_page().await.expect("edge"), Effect::None);
        assert_eq!(ids(&table.view()), ["r6"]);

        let _effect = table.prev_page().await.expect("prev");
        assert_eq!(ids(&table.view()), ["r3", "r4", "r5"]);
    }

    #[tokio::test]
    async fn filter_resets_to_first_page() {
        let table = TableController::new(store(), &ClientConfig::default());
        let _effect = table.refresh().await.expect("load");
        let _effect = table.next_page().await.expect("next");

        let filter = WherePredicate::new(Predicate::compare(
            "status",
            CompareOp::Eq,
            Bindable::bind("status"),
        ))
        .with_param("status", "failed");
        let _effect = table.set_filter(filter).await.expect("filter");

        assert_eq!(ids(&table.view()), ["r1", "r3", "r5"]);
        assert!(table.view().navigator.cursor().is_none());
    }

    #[tokio::test]
    async fn sort_toggle_reloads_in_new_order() {
        let table = TableController::new(store(), &ClientConfig::default());
        let _effect = table.refresh().await.expect("load");
        let _effect = table.toggle_sort("rank").await.expect("asc");
        let _effect = table.toggle_sort("rank").await.expect("desc");

        let view = table.view();
        assert_eq!(view.navigator.sort().keys(), [SortKey::desc("rank")]);
        assert_eq!(ids(&view), ["r6", "r5", "r4"]);
    }

    #[tokio::test]
    async fn invalid_edit_issues_no_request() {
        let store = Arc::new(store());
        let table = TableController::new(Arc::clone(&store), &ClientConfig::default());
        let _effect = table.refresh().await.expect("load");
        let before = store.query_count();

        let result = table.edit_filter(&NodePath::root(), None).await;
        assert!(matches!(result, Err(EditError::InvalidPath { .. })));
        assert_eq!(store.query_count(), before);
    }

    #[tokio::test]
    async fn edit_filter_removing_root_clears_filter() {
        let table = TableController::new(store(), &ClientConfig::default());
        let filter = WherePredicate::new(Predicate::compare(
            "status",
            CompareOp::Eq,
            Bindable::literal("ok"),
        ));
        let _effect = table.set_filter(filter).await.expect("filter");
        assert_eq!(ids(&table.view()), ["r0", "r2", "r4"]);

        let effect = table
            .edit_filter(&NodePath::root(), None)
            .await
            .expect("valid edit")
            .expect("reload");
        assert_eq!(effect, Effect::Reload);
        assert!(table.view().navigator.filter().is_none());
        assert_eq!(ids(&table.view()), ["r0", "r1", "r2"]);
    }

    #[tokio::test]
    async fn failure_keeps_last_page_and_selection() {
        let store = Arc::new(store());
        let table = TableController::new(Arc::clone(&store), &ClientConfig::default());
        let _effect = table.refresh().await.expect("load");
        table.toggle_row_selection("r1");

        store.fail_next("store offline");
        let err = table.refresh().await.expect_err("failure");
        assert!(!err.is_cancelled());

        let view = table.view();
        assert!(!view.is_loading);
        assert_eq!(ids(&view), ["r0", "r1", "r2"]);
        assert!(view.navigator.is_selected("r1"));
        let failure = view.error.as_ref().expect("error recorded");
        assert!(failure.message.contains("store offline"));

        let _effect = table.refresh().await.expect("retry");
        assert!(table.view().error.is_none());
    }

    #[tokio::test]
    async fn selection_survives_paging() {
        let table = TableController::new(store(), &ClientConfig::default());
        let _effect = table.refresh().await.expect("load");
        table.toggle_select_all_on_page();
        let _effect = table.next_page().await.expect("next");

        let view = table.view();
        assert_eq!(view.navigator.selection().len(), 3);
        assert!(view.navigator.is_selected("r0"));
        assert!(!view.is_loading);
    }
}
