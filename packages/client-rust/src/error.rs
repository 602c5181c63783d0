//! Fetch error taxonomy.
//!
//! Only two outcomes leave a slot request other than success: it was
//! cancelled (superseded by a newer request, or its deadline fired), which is
//! never surfaced; or the store call failed, which is recorded on the view
//! state as a [`FetchFailure`] next to the last good results.

use uuid::Uuid;

use crate::slot::Ticket;

/// Errors returned by slot-driven fetches.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request cancelled")]
    Cancelled,
    #[error("store request failed: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl FetchError {
    /// Returns `true` for the silent, superseded-or-cancelled case.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A user-visible, retryable failure stored on view state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    /// Name of the slot whose request failed.
    pub slot: &'static str,
    /// Identifier of the failed request, as logged.
    pub request_id: Uuid,
    pub message: String,
}

impl FetchFailure {
    #[must_use]
    pub fn new(ticket: &Ticket, error: &FetchError) -> Self {
        Self {
            slot: ticket.slot(),
            request_id: ticket.request_id(),
            message: error.to_string(),
        }
    }
}
