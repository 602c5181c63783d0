//! Latest-wins request slot.
//!
//! A [`QuerySlot`] owns one piece of view state and at most one in-flight
//! request. Starting a request ([`QuerySlot::begin`]) cancels the previous
//! token, bumps the generation counter and hands out a [`Ticket`]. A
//! completion is applied only when its ticket's generation is still current,
//! and that check happens under the same lock that writes the state, so a
//! superseded response can never overwrite a newer one regardless of the
//! order in which responses arrive.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::FetchError;

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// Handle for one issued request.
#[derive(Debug, Clone)]
pub struct Ticket {
    slot: &'static str,
    generation: u64,
    request_id: Uuid,
    token: CancellationToken,
}

impl Ticket {
    #[must_use]
    pub fn slot(&self) -> &'static str {
        self.slot
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancels this request once `deadline` elapses.
    ///
    /// Spawns a timer on the current Tokio runtime. The timer exits early if
    /// the request is cancelled first.
    pub fn cancel_after(&self, deadline: Duration) {
        let token = self.token.clone();
        let slot = self.slot;
        let request_id = self.request_id;
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(deadline) => {
                    tracing::debug!(slot, %request_id, ?deadline, "request deadline elapsed");
                    token.cancel();
                }
            }
        });
    }
}

// ---------------------------------------------------------------------------
// QuerySlot
// ---------------------------------------------------------------------------

struct SlotInner<S> {
    generation: u64,
    token: CancellationToken,
    in_flight: bool,
    state: Arc<S>,
}

/// View state plus its single in-flight request.
pub struct QuerySlot<S> {
    name: &'static str,
    inner: Mutex<SlotInner<S>>,
}

impl<S> QuerySlot<S> {
    #[must_use]
    pub fn new(name: &'static str, initial: S) -> Self {
        Self {
            name,
            inner: Mutex::new(SlotInner {
                generation: 0,
                token: CancellationToken::new(),
                in_flight: false,
                state: Arc::new(initial),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current state. Cheap: clones an `Arc`.
    #[must_use]
    pub fn snapshot(&self) -> Arc<S> {
        Arc::clone(&self.inner.lock().state)
    }

    /// Generation of the most recently issued ticket.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Returns `true` while the current generation has not completed.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.inner.lock().in_flight
    }

    /// Returns `true` if `ticket` belongs to the most recent request.
    #[must_use]
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.inner.lock().generation == ticket.generation
    }

    /// Replaces the state without touching the in-flight request.
    pub fn update(&self, f: impl FnOnce(&S) -> S) {
        let mut inner = self.inner.lock();
        inner.state = Arc::new(f(&inner.state));
    }

    /// Replaces the state and starts a new request, superseding any other.
    pub fn begin<R>(&self, f: impl FnOnce(&S) -> (S, R)) -> (Ticket, R) {
        let mut inner = self.inner.lock();
        let (next, out) = f(&inner.state);
        inner.state = Arc::new(next);
        (self.issue(&mut inner), out)
    }

    /// Replaces the state and starts a new request only when `f` asks for one.
    ///
    /// The decision and the state write happen atomically. Returns `None`
    /// (leaving any in-flight request alone) when `f` returns `None`.
    pub fn step<R>(&self, f: impl FnOnce(&S) -> (S, Option<R>)) -> Option<(Ticket, R)> {
        let mut inner = self.inner.lock();
        let (next, out) = f(&inner.state);
        inner.state = Arc::new(next);
        out.map(|out| (self.issue(&mut inner), out))
    }

    fn issue(&self, inner: &mut SlotInner<S>) -> Ticket {
        inner.token.cancel();
        if inner.in_flight {
            tracing::debug!(
                slot = self.name,
                superseded = inner.generation,
                "superseding in-flight request"
            );
        }
        inner.generation += 1;
        inner.token = CancellationToken::new();
        inner.in_flight = true;
        Ticket {
            slot: self.name,
            generation: inner.generation,
            request_id: Uuid::new_v4(),
            token: inner.token.clone(),
        }
    }

    /// Drives `fut` to completion unless `ticket` is cancelled first.
    ///
    /// Cancellation is checked again as the first step after `fut` resolves:
    /// a request superseded while its response was being produced reports
    /// [`FetchError::Cancelled`] even though a value arrived.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cancelled`] when superseded or past its deadline,
    /// and [`FetchError::Store`] when `fut` fails.
    pub async fn run<T, F>(&self, ticket: &Ticket, fut: F) -> Result<T, FetchError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let span = tracing::info_span!(
            "slot_request",
            slot = self.name,
            generation = ticket.generation,
            request_id = %ticket.request_id,
        );
        async {
            let result = tokio::select! {
                biased;
                () = ticket.token.cancelled() => {
                    tracing::debug!("request cancelled before completion");
                    return Err(FetchError::Cancelled);
                }
                result = fut => result,
            };
            if ticket.token.is_cancelled() || !self.is_current(ticket) {
                tracing::debug!("discarding response of superseded request");
                return Err(FetchError::Cancelled);
            }
            result.map_err(FetchError::Store)
        }
        .instrument(span)
        .await
    }

    /// Applies a result for `ticket`.
    ///
    /// Returns `false` and leaves the state untouched when the ticket has
    /// been superseded or cancelled.
    pub fn complete(&self, ticket: &Ticket, f: impl FnOnce(&S) -> S) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != ticket.generation || ticket.token.is_cancelled() {
            tracing::debug!(
                slot = self.name,
                generation = ticket.generation,
                current = inner.generation,
                "dropping stale completion"
            );
            return false;
        }
        inner.state = Arc::new(f(&inner.state));
        inner.in_flight = false;
        true
    }

    /// Settles a cancelled `ticket`, applying `f` only if no newer request
    /// has been issued (e.g. a deadline fired on the current request).
    pub fn settle(&self, ticket: &Ticket, f: impl FnOnce(&S) -> S) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != ticket.generation {
            return false;
        }
        inner.state = Arc::new(f(&inner.state));
        inner.in_flight = false;
        true
    }

    /// Applies `apply` like [`QuerySlot::complete`]. A ticket that is still
    /// current but was cancelled after `run` returned (a deadline firing in
    /// between) gets `settle` instead, so the request never stays in flight.
    ///
    /// Returns `true` only when `apply` ran.
    pub fn complete_or_settle(
        &self,
        ticket: &Ticket,
        apply: impl FnOnce(&S) -> S,
        settle: impl FnOnce(&S) -> S,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != ticket.generation {
            tracing::debug!(
                slot = self.name,
                generation = ticket.generation,
                current = inner.generation,
                "dropping stale completion"
            );
            return false;
        }
        let applied = !ticket.token.is_cancelled();
        inner.state = Arc::new(if applied {
            apply(&inner.state)
        } else {
            tracing::debug!(slot = self.name, "request cancelled after its response arrived");
            settle(&inner.state)
        });
        inner.in_flight = false;
        applied
    }

    /// Cancels the in-flight request, if any.
    pub fn cancel(&self) {
        self.inner.lock().token.cancel();
    }
}

impl<S> Drop for QuerySlot<S> {
    fn drop(&mut self) {
        self.inner.get_mut().token.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[test]
    fn begin_bumps_generation_and_cancels_previous() {
        let slot = QuerySlot::new("test", 0u32);
        let (first, ()) = slot.begin(|s| (s + 1, ()));
        let (second, ()) = slot.begin(|s| (s + 1, ()));

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(second.generation(), first.generation() + 1);
        assert_eq!(*slot.snapshot(), 2);
        assert!(slot.is_in_flight());
    }

    #[test]
    fn stale_completion_is_dropped_in_either_order() {
        // Newer completes first, then the older tries.
        let slot = QuerySlot::new("test", "initial");
        let (a, ()) = slot.begin(|s| (*s, ()));
        let (b, ()) = slot.begin(|s| (*s, ()));
        assert!(slot.complete(&b, |_| "b"));
        assert!(!slot.complete(&a, |_| "a"));
        assert_eq!(*slot.snapshot(), "b");

        // Older completes first, then the newer.
        let slot = QuerySlot::new("test", "initial");
        let (a, ()) = slot.begin(|s| (*s, ()));
        let (b, ()) = slot.begin(|s| (*s, ()));
        assert!(!slot.complete(&a, |_| "a"));
        assert!(slot.complete(&b, |_| "b"));
        assert_eq!(*slot.snapshot(), "b");
        assert!(!slot.is_in_flight());
    }

    #[test]
    fn step_without_request_keeps_in_flight_ticket() {
        let slot = QuerySlot::new("test", 0u32);
        let (ticket, ()) = slot.begin(|s| (*s, ()));
        assert!(slot.step(|s| (s + 10, None::<()>)).is_none());

        assert!(!ticket.is_cancelled());
        assert!(slot.complete(&ticket, |s| s + 1));
        assert_eq!(*slot.snapshot(), 11);
    }

    #[test]
    fn settle_only_applies_to_current_generation() {
        let slot = QuerySlot::new("test", 0u32);
        let (a, ()) = slot.begin(|s| (*s, ()));
        a.cancel();
        assert!(!slot.complete(&a, |_| 1));
        assert!(slot.settle(&a, |_| 2));
        assert_eq!(*slot.snapshot(), 2);

        let (b, ()) = slot.begin(|s| (*s, ()));
        let (_c, ()) = slot.begin(|s| (*s, ()));
        assert!(!slot.settle(&b, |_| 3));
        assert_eq!(*slot.snapshot(), 2);
    }

    #[test]
    fn cancellation_after_response_settles_current_ticket() {
        let slot = QuerySlot::new("test", (0u32, true));
        let (ticket, ()) = slot.begin(|s| (*s, ()));
        ticket.cancel();

        assert!(!slot.complete_or_settle(&ticket, |_| (1, false), |s| (s.0, false)));
        assert_eq!(*slot.snapshot(), (0, false));
        assert!(!slot.is_in_flight());

        let (stale, ()) = slot.begin(|s| ((s.0, true), ()));
        let (current, ()) = slot.begin(|s| ((s.0, true), ()));
        assert!(!slot.complete_or_settle(&stale, |_| (2, false), |_| (3, false)));
        assert_eq!(*slot.snapshot(), (0, true));
        assert!(slot.complete_or_settle(&current, |_| (4, false), |_| (5, false)));
        assert_eq!(*slot.snapshot(), (4, false));
    }

    #[tokio::test]
    async fn run_returns_cancelled_when_superseded_mid_flight() {
        let slot = Arc::new(QuerySlot::new("test", ()));
        let (tx, rx) = oneshot::channel::<u32>();
        let (ticket, ()) = slot.begin(|()| ((), ()));

        let task = tokio::spawn({
            let slot = Arc::clone(&slot);
            async move {
                slot.run(&ticket, async move { rx.await.map_err(anyhow::Error::from) })
                    .await
            }
        });
        tokio::task::yield_now().await;

        let _newer = slot.begin(|()| ((), ()));
        let result = task.await.expect("task panicked");
        assert!(matches!(result, Err(FetchError::Cancelled)));
        // The response arriving later goes nowhere.
        assert!(tx.send(7).is_err());
    }

    #[tokio::test]
    async fn run_passes_through_value_and_store_errors() {
        let slot = QuerySlot::new("test", ());
        let (ticket, ()) = slot.begin(|()| ((), ()));
        let value = slot.run(&ticket, async { Ok::<_, anyhow::Error>(5) }).await.expect("ok");
        assert_eq!(value, 5);

        let (ticket, ()) = slot.begin(|()| ((), ()));
        let err = slot
            .run::<(), _>(&ticket, async { Err(anyhow::anyhow!("boom")) })
            .await
            .expect_err("store error");
        assert!(matches!(err, FetchError::Store(_)));
        assert!(!err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_like_supersession() {
        let slot = QuerySlot::new("test", ());
        let (ticket, ()) = slot.begin(|()| ((), ()));
        ticket.cancel_after(Duration::from_millis(50));

        let result = slot
            .run(&ticket, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, anyhow::Error>(())
            })
            .await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
        assert!(slot.is_current(&ticket));
    }
}
