//! Paginated Navigator: the filter/sort/pagination/selection state of one table.
//!
//! [`NavigatorState`] is an immutable value. Every transition returns the
//! next state together with an [`Effect`] telling the owner whether a reload
//! must be issued. The owner executes reloads and reconciles results with
//! [`NavigatorState::with_page`]; this module never performs I/O.
//!
//! Cursors are reset whenever the filter changes: a standing cursor refers to
//! a position in the old result set and must not be reused. Selection and
//! filter persist across page navigation.

use std::collections::BTreeMap;
use std::num::NonZeroU32;

use crate::messages::{PageCursor, PageResult, QueryRequest, RecordEnvelope};
use crate::predicate::edit::{self, EditError, NodePath};
use crate::predicate::{merge_where, Predicate, WherePredicate};
use crate::sort::SortSpec;

/// Default number of records per page.
pub const DEFAULT_PAGE_SIZE: NonZeroU32 = match NonZeroU32::new(3) {
    Some(size) => size,
    None => panic!("page size must be non-zero"),
};

/// What the owner of a [`NavigatorState`] must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Effect {
    /// Issue a reload built from [`NavigatorState::to_request`].
    Reload,
    /// Nothing to fetch.
    None,
}

/// The currently displayed page and its navigation tokens.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub records: Vec<RecordEnvelope>,
    pub next: Option<String>,
    pub previous: Option<String>,
}

impl From<PageResult> for Page {
    fn from(result: PageResult) -> Self {
        Self {
            records: result.records,
            next: result.next,
            previous: result.previous,
        }
    }
}

/// Per-table navigation state.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigatorState {
    page_size: NonZeroU32,
    sort: SortSpec,
    selection: BTreeMap<String, RecordEnvelope>,
    forward: Option<String>,
    backward: Option<String>,
    filter: Option<WherePredicate>,
    page: Page,
}

impl Default for NavigatorState {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl NavigatorState {
    /// Creates an empty state (no filter, sort, selection or cursors).
    #[must_use]
    pub fn new(page_size: NonZeroU32) -> Self {
        Self {
            page_size,
            sort: SortSpec::new(),
            selection: BTreeMap::new(),
            forward: None,
            backward: None,
            filter: None,
            page: Page::default(),
        }
    }

    // ---- Accessors ----

    #[must_use]
    pub fn page_size(&self) -> NonZeroU32 {
        self.page_size
    }

    #[must_use]
    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    #[must_use]
    pub fn filter(&self) -> Option<&WherePredicate> {
        self.filter.as_ref()
    }

    #[must_use]
    pub fn page(&self) -> &Page {
        &self.page
    }

    #[must_use]
    pub fn selection(&self) -> &BTreeMap<String, RecordEnvelope> {
        &self.selection
    }

    #[must_use]
    pub fn is_selected(&self, id: &str) -> bool {
        self.selection.contains_key(id)
    }

    /// The cursor the next reload will use, if any.
    #[must_use]
    pub fn cursor(&self) -> Option<PageCursor> {
        self.forward
            .clone()
            .map(PageCursor::Forward)
            .or_else(|| self.backward.clone().map(PageCursor::Backward))
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        self.page.next.is_some()
    }

    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.page.previous.is_some()
    }

    /// Builds the query a reload of this state issues.
    #[must_use]
    pub fn to_request(&self) -> QueryRequest {
        QueryRequest::new(self.filter.clone())
            .with_sort(&self.sort)
            .with_limit(self.page_size.get())
            .with_cursor(self.cursor())
    }

    // ---- Filter transitions ----

    /// Conjoins `filter` onto the standing filter and resets both cursors.
    pub fn set_filter(&self, filter: WherePredicate) -> (Self, Effect) {
        let next = Self {
            filter: merge_where(self.filter.clone(), Some(filter)),
            ..self.without_cursors()
        };
        (next, Effect::Reload)
    }

    /// Drops the standing filter and resets both cursors.
    pub fn clear_filter(&self) -> (Self, Effect) {
        let next = Self {
            filter: None,
            ..self.without_cursors()
        };
        (next, Effect::Reload)
    }

    /// Replaces (or removes) one node of the standing filter and resets both cursors.
    ///
    /// Params are kept. A filter whose predicate collapses away is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::InvalidPath`] when there is no filter predicate or
    /// `path` does not address a node, and the other errors of
    /// [`edit::replace_at`].
    pub fn edit_filter(
        &self,
        path: &NodePath,
        replacement: Option<Predicate>,
    ) -> Result<(Self, Effect), EditError> {
        let (root, params) = self
            .filter
            .as_ref()
            .and_then(|f| f.predicate.as_ref().map(|p| (p, &f.params)))
            .ok_or_else(|| EditError::InvalidPath { path: path.clone() })?;

        let filter = edit::replace_at(root, path, replacement)?.map(|predicate| WherePredicate {
            predicate: Some(predicate),
            params: params.clone(),
        });
        let next = Self {
            filter,
            ..self.without_cursors()
        };
        Ok((next, Effect::Reload))
    }

    // ---- Sort and paging transitions ----

    /// Advances `column` around the asc -> desc -> unset cycle.
    ///
    /// Sorting is part of the query, so this always reloads. The cursors are
    /// kept as-is; a store that cannot honour a cursor under a new ordering
    /// is expected to restart from the beginning.
    pub fn toggle_sort(&self, column: &str) -> (Self, Effect) {
        let next = Self {
            sort: self.sort.toggle(column),
            ..self.clone()
        };
        (next, Effect::Reload)
    }

    /// Moves forward using the last page's `next` token.
    ///
    /// At the end of the result set this is a no-op.
    pub fn next_page(&self) -> (Self, Effect) {
        match &self.page.next {
            Some(token) => {
                let next = Self {
                    forward: Some(token.clone()),
                    backward: None,
                    ..self.clone()
                };
                (next, Effect::Reload)
            }
            None => (self.clone(), Effect::None),
        }
    }

    /// Moves back using the last page's `previous` token.
    ///
    /// At the start of the result set this is a no-op.
    pub fn prev_page(&self) -> (Self, Effect) {
        match &self.page.previous {
            Some(token) => {
                let next = Self {
                    forward: None,
                    backward: Some(token.clone()),
                    ..self.clone()
                };
                (next, Effect::Reload)
            }
            None => (self.clone(), Effect::None),
        }
    }

    /// Returns to the first page.
    pub fn first_page(&self) -> (Self, Effect) {
        (self.without_cursors(), Effect::Reload)
    }

    /// Changes the page size and returns to the first page.
    pub fn set_page_size(&self, page_size: NonZeroU32) -> (Self, Effect) {
        let next = Self {
            page_size,
            ..self.without_cursors()
        };
        (next, Effect::Reload)
    }

    /// Reloads the current state verbatim.
    pub fn refresh(&self) -> (Self, Effect) {
        (self.clone(), Effect::Reload)
    }

    // ---- Selection transitions ----

    /// Selects or deselects one record by identity.
    ///
    /// Selecting requires the record to be on the current page (its snapshot
    /// is stored); deselecting works regardless of the page.
    pub fn toggle_row_selection(&self, id: &str) -> (Self, Effect) {
        let mut selection = self.selection.clone();
        if selection.remove(id).is_none() {
            if let Some(record) = self.page.records.iter().find(|r| r.id == id) {
                selection.insert(record.id.clone(), record.clone());
            }
        }
        (
            Self {
                selection,
                ..self.clone()
            },
            Effect::None,
        )
    }

    /// On an empty selection selects every record on the page; otherwise
    /// clears the whole selection.
    pub fn toggle_select_all_on_page(&self) -> (Self, Effect) {
        let selection = if self.selection.is_empty() {
            self.page
                .records
                .iter()
                .map(|r| (r.id.clone(), r.clone()))
                .collect()
        } else {
            BTreeMap::new()
        };
        (
            Self {
                selection,
                ..self.clone()
            },
            Effect::None,
        )
    }

    // ---- Reconciliation ----

    /// Applies a completed fetch: replaces the displayed page and its tokens.
    ///
    /// Selection is independent of the displayed page and is left untouched.
    #[must_use]
    pub fn with_page(&self, page: Page) -> Self {
        Self {
            page,
            ..self.clone()
        }
    }

    fn without_cursors(&self) -> Self {
        Self {
            forward: None,
            backward: None,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
