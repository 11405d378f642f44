//! Shared state of one streaming response.
//!
//! The whole state is an immutable [`Snapshot`] that is replaced as a unit.
//! Every transition is a pure function from the old snapshot to the new one;
//! the side effects it implies (request demand, cancel the subscription) are
//! handed back to the one caller whose transition produced them, so each
//! effect runs exactly once no matter how many threads race.
//!
//! ```text
//!             with_subscription          increment / write slot
//!   Active ───────────────────> Active ─────────────────────────┐
//!     │                           │  ^                          │
//!     │                           │  └──────────────────────────┘
//!     │              with_aborted │ with_errored │ commit_flush(final)
//!     v                           v              v              v
//!  (terminal, sticky)          Aborted        Errored          Done
//! ```

use crate::streaming::source::Subscription;
use std::fmt;
use arc_swap::{ArcSwap, Guard};
use std::sync::Arc;

/// Identifies one submitted write.
pub type WriteId = u64;

// =============================================================================
// Snapshot
// =============================================================================

/// Fields that only exist while the stream is still running.
#[derive(Clone, Default)]
pub struct Active {
    /// Present only while the source is being demanded from.
    pub subscription: Option<Arc<dyn Subscription>>,
    /// The claimed or in-flight write, if any.
    pub pending_write: Option<WriteId>,
    /// Items delivered by the source so far.
    pub invocations: u64,
    /// Items requested from the source so far.
    pub demanded: u64,
    /// The source signalled completion.
    pub cursor_done: bool,
    /// A flush was triggered while the write slot was taken.
    pub flush_wanted: bool,
}

impl fmt::Debug for Active {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Active")
            .field("subscribed", &self.subscription.is_some())
            .field("pending_write", &self.pending_write)
            .field("invocations", &self.invocations)
            .field("demanded", &self.demanded)
            .field("cursor_done", &self.cursor_done)
            .field("flush_wanted", &self.flush_wanted)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Phase {
    Active(Active),
    Aborted,
    Errored,
    Done,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Phase::Active(_))
    }

    fn name(&self) -> &'static str {
        match self {
            Phase::Active(_) => "active",
            Phase::Aborted => "aborted",
            Phase::Errored => "errored",
            Phase::Done => "done",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    phase: Phase,
    /// The array-open bytes were committed to a write.
    opened: bool,
    /// At least one item was committed to a write. Never unset.
    items_written: bool,
    next_write: WriteId,
}

impl Snapshot {
    fn new() -> Self {
        Self {
            phase: Phase::Active(Active::default()),
            opened: false,
            items_written: false,
            next_write: 1,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn active(&self) -> Option<&Active> {
        match &self.phase {
            Phase::Active(active) => Some(active),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.phase.is_terminal()
    }

    pub fn items_written(&self) -> bool {
        self.items_written
    }

    pub fn opened(&self) -> bool {
        self.opened
    }

    fn map_active(&self, f: impl FnOnce(&mut Active)) -> Snapshot {
        let mut next = self.clone();
        if let Phase::Active(active) = &mut next.phase {
            f(active);
        }
        next
    }

    fn terminate(&self, outcome: Phase) -> Snapshot {
        debug_assert!(outcome.is_terminal());
        if self.phase.is_terminal() {
            return self.clone();
        }
        Snapshot {
            phase: outcome,
            ..self.clone()
        }
    }
}

/// Panics on transitions no caller may ever make.
fn check_transition(old: &Snapshot, new: &Snapshot) {
    if old.items_written && !new.items_written {
        panic!("invariant violated: items_written cannot go from true to false");
    }
    if old.opened && !new.opened {
        panic!("invariant violated: array-open cannot be unwritten");
    }
    if old.phase.is_terminal()
        && std::mem::discriminant(&old.phase) != std::mem::discriminant(&new.phase)
    {
        panic!(
            "invariant violated: terminal state {} replaced by {}",
            old.phase.name(),
            new.phase.name()
        );
    }
}

// =============================================================================
// Transition results
// =============================================================================

/// What the caller of [`StateCell::with_subscription`] must do.
pub enum SubscribeEffect {
    /// Subscription accepted; request the initial batch from it.
    Request(Arc<dyn Subscription>),
    /// Subscription refused; cancel it.
    Cancel(Arc<dyn Subscription>),
}

/// Returned to the single caller that moved the stream into a terminal state.
pub struct Terminated {
    /// Live subscription to cancel.
    pub subscription: Option<Arc<dyn Subscription>>,
    /// A write was claimed or in flight at the time.
    pub write_in_flight: bool,
}

/// Values read when the write slot was claimed, before draining the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushView {
    pub id: WriteId,
    /// Nothing has been written yet; the array-open bytes come first.
    pub first: bool,
    pub items_written: bool,
    /// The source completed. Everything it delivered is already queued.
    pub cursor_done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Granted(FlushView),
    /// Another caller owns the slot and will flush again after its write.
    Busy,
    /// The stream is over.
    Closed,
}

pub enum Commit {
    /// Submit the write. Cancel the subscription first if one is returned.
    Submit(Option<Arc<dyn Subscription>>),
    /// The stream ended while the buffer was being composed.
    Discard,
}

// =============================================================================
// StateCell
// =============================================================================

/// Holder of the current snapshot.
///
/// Readers never block. Writers build a new snapshot from the one they saw
/// and install it with a compare-and-swap, retrying on a lost race, so a
/// transition function may run more than once and must stay pure.
pub struct StateCell {
    current: ArcSwap<Snapshot>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::new()),
        }
    }

    pub fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Replace the snapshot with `f(current)` and return `(old, new)`.
    ///
    /// `old` is the snapshot the winning swap replaced, so effects derived
    /// from the pair happen exactly once.
    ///
    /// # Panics
    ///
    /// If the transition unsets `items_written` or leaves a terminal state.
    pub fn update<F>(&self, f: F) -> (Arc<Snapshot>, Arc<Snapshot>)
    where
        F: Fn(&Snapshot) -> Snapshot,
    {
        let mut old = self.current.load_full();
        loop {
            let new = Arc::new(f(&old));
            check_transition(&old, &new);
            let seen = self.current.compare_and_swap(&old, Arc::clone(&new));
            if Arc::ptr_eq(&*seen, &old) {
                return (old, new);
            }
            old = Guard::into_inner(seen);
        }
    }

    pub fn is_active(&self) -> bool {
        self.current.load().is_active()
    }

    /// Store the source's subscription and ask for the first batch.
    pub fn with_subscription(
        &self,
        subscription: Arc<dyn Subscription>,
        batch_size: u64,
    ) -> SubscribeEffect {
        let (_, new) = self.update(|s| match s.active() {
            Some(a) if a.subscription.is_none() && a.demanded == 0 => s.map_active(|a| {
                a.subscription = Some(Arc::clone(&subscription));
                a.demanded = batch_size;
            }),
            _ => s.clone(),
        });

        let accepted = new
            .active()
            .and_then(|a| a.subscription.as_ref())
            .is_some_and(|stored| Arc::ptr_eq(stored, &subscription));
        if accepted {
            SubscribeEffect::Request(subscription)
        } else {
            SubscribeEffect::Cancel(subscription)
        }
    }

    /// Count one delivered item. Returns true when the count reaches a
    /// multiple of `batch_size`; exactly one caller sees each boundary.
    pub fn increment(&self, batch_size: u64) -> bool {
        let (_, new) = self.update(|s| s.map_active(|a| a.invocations += 1));
        new.active().is_some_and(|a| a.invocations % batch_size == 0)
    }

    /// Record source completion. Returns true for the first call only.
    pub fn with_cursor_done(&self) -> bool {
        let (old, new) = self.update(|s| {
            s.map_active(|a| {
                a.cursor_done = true;
                a.subscription = None;
            })
        });
        let was_done = old.active().is_some_and(|a| a.cursor_done);
        let is_done = new.active().is_some_and(|a| a.cursor_done);
        !was_done && is_done
    }

    // -------------------------------------------------------------------------
    // Write slot
    // -------------------------------------------------------------------------

    /// Take the write slot if it is free, otherwise leave a note for its owner.
    pub fn claim_write(&self) -> Claim {
        let (old, new) = self.update(|s| match s.active() {
            Some(a) if a.pending_write.is_none() => {
                let mut next = s.map_active(|a| {
                    a.pending_write = Some(s.next_write);
                    a.flush_wanted = false;
                });
                next.next_write += 1;
                next
            }
            Some(_) => s.map_active(|a| a.flush_wanted = true),
            None => s.clone(),
        });

        match (old.active(), new.active()) {
            (Some(before), Some(after)) if before.pending_write.is_none() => {
                Claim::Granted(FlushView {
                    id: after.pending_write.unwrap_or(old.next_write),
                    first: !new.opened,
                    items_written: new.items_written,
                    cursor_done: after.cursor_done,
                })
            }
            (Some(_), Some(_)) => Claim::Busy,
            _ => Claim::Closed,
        }
    }

    /// Give up a claimed slot without writing.
    ///
    /// If another flush was requested meanwhile, the slot is kept and a fresh
    /// view is returned so the caller drains again.
    pub fn release_claim(&self, id: WriteId) -> Option<FlushView> {
        let (old, new) = self.update(|s| match s.active() {
            Some(a) if a.pending_write == Some(id) => {
                if a.flush_wanted {
                    s.map_active(|a| a.flush_wanted = false)
                } else {
                    s.map_active(|a| a.pending_write = None)
                }
            }
            Some(a) => panic!(
                "invariant violated: write {} released but slot holds {:?}",
                id, a.pending_write
            ),
            None => s.clone(),
        });

        let retry = old.active().is_some_and(|a| a.flush_wanted);
        match new.active() {
            Some(after) if retry => Some(FlushView {
                id,
                first: !new.opened,
                items_written: new.items_written,
                cursor_done: after.cursor_done,
            }),
            _ => None,
        }
    }

    /// Record what a composed write contains, just before it is submitted.
    pub fn commit_flush(&self, id: WriteId, wrote_items: bool, is_final: bool) -> Commit {
        let (old, _) = self.update(|s| match s.active() {
            Some(a) if a.pending_write == Some(id) => {
                let mut next = s.clone();
                next.opened = true;
                next.items_written |= wrote_items;
                if is_final {
                    next.phase = Phase::Done;
                }
                next
            }
            Some(a) => panic!(
                "invariant violated: write {} committed but slot holds {:?}",
                id, a.pending_write
            ),
            None => s.clone(),
        });

        match old.active() {
            Some(a) if is_final => Commit::Submit(a.subscription.clone()),
            Some(_) => Commit::Submit(None),
            None => Commit::Discard,
        }
    }

    /// Free the slot after a confirmed write. Returns the subscription to ask
    /// for another `batch_size` items when the previous demand is used up.
    pub fn complete_write(&self, id: WriteId, batch_size: u64) -> Option<Arc<dyn Subscription>> {
        let (old, _) = self.update(|s| match s.active() {
            Some(a) if a.pending_write == Some(id) => s.map_active(|a| {
                a.pending_write = None;
                if wants_more(a) {
                    a.demanded += batch_size;
                }
            }),
            Some(a) => panic!(
                "invariant violated: write {} completed but slot holds {:?}",
                id, a.pending_write
            ),
            None => s.clone(),
        });

        old.active()
            .filter(|a| wants_more(a))
            .and_then(|a| a.subscription.clone())
    }

    // -------------------------------------------------------------------------
    // Terminal transitions
    // -------------------------------------------------------------------------

    pub fn with_aborted(&self) -> Option<Terminated> {
        self.terminate(Phase::Aborted)
    }

    pub fn with_errored(&self) -> Option<Terminated> {
        self.terminate(Phase::Errored)
    }

    pub fn with_done(&self) -> Option<Terminated> {
        self.terminate(Phase::Done)
    }

    fn terminate(&self, outcome: Phase) -> Option<Terminated> {
        let (old, _) = self.update(|s| s.terminate(outcome.clone()));
        old.active().map(|a| Terminated {
            subscription: a.subscription.clone(),
            write_in_flight: a.pending_write.is_some(),
        })
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// The source has delivered everything it was asked for and may send more.
fn wants_more(a: &Active) -> bool {
    !a.cursor_done && a.subscription.is_some() && a.invocations >= a.demanded
}
