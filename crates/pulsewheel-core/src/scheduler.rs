//! The event scheduler: typed, lifecycle-safe deferred execution on top of
//! the time wheel.
//!
//! # Model
//!
//! A [`Scheduler`] is an explicit object (construct one per simulation, one
//! per test); there is no process-wide queue. It owns four things: the
//! [`PulseWheel`], an arena of pending [`EventRecord`]s, an arena of owner
//! lists, and the current pulse counter.
//!
//! Everything runs on one logical thread. "Scheduling a delay" never
//! blocks: the caller returns immediately and the deferred logic resumes as
//! a fresh callback invocation, with the payload carrying the resumed
//! state.
//!
//! # Firing protocol
//!
//! Each [`Scheduler::step`] call fires every event due at the current
//! pulse, then advances the counter by exactly one. Since `step` is the
//! only way time moves, the wheel's "never skip a pulse" requirement cannot
//! be violated. Per due event:
//!
//! 1. Pop the head of the current pulse's bucket while it is due.
//! 2. Detach the event from its owner list *before* the callback runs, so
//!    a callback that tears down its own owner never sees the firing event
//!    in the list.
//! 3. Invoke the callback with the payload and an [`OpQueue`].
//! 4. Settle the [`EventOutcome`]: reschedule, or finish and route the
//!    payload per the ownership flag.
//! 5. Apply the callback's queued ops, then continue the loop.
//!
//! Callbacks cannot touch the scheduler directly (it is mutably borrowed
//! for the whole step); side effects on other events go through the
//! [`OpQueue`], which is drained as soon as the firing event settles. A
//! cancellation queued there still lands before any later event of the
//! same pulse fires.

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use tracing::warn;

use crate::id::{EventId, EventKindId, OwnerId, Pulse, SlotId};
use crate::kind::KindRegistry;
use crate::wheel::{DEFAULT_BUCKETS, PulseWheel};

// ---------------------------------------------------------------------------
// Callbacks and outcomes
// ---------------------------------------------------------------------------

/// An event callback. Receives the event's payload and an op queue for
/// deferred scheduler mutations; returns what should happen to the event.
pub type EventCallback<P> = Box<dyn FnMut(&mut P, &mut OpQueue<P>) -> EventOutcome>;

/// What an event callback wants done with its event and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Done. The payload is dropped if the scheduler owns it, otherwise it
    /// is handed back through [`TickSummary::reclaimed`].
    Finished,
    /// Done, and the payload is always handed back, overriding the
    /// ownership flag. Used when the payload outlives the event that
    /// created it.
    FinishedKeepPayload,
    /// Done, and the payload is always dropped, overriding the ownership
    /// flag.
    FinishedDropPayload,
    /// Fire again this many pulses from now. A value of 0 is clamped to 1
    /// so an event can never fire twice within one pulse.
    RescheduleAfter(Pulse),
}

// ---------------------------------------------------------------------------
// Deferred ops
// ---------------------------------------------------------------------------

/// A scheduler mutation queued by a callback, applied right after the
/// firing event settles.
enum SchedulerOp<P> {
    Schedule {
        kind: EventKindId,
        payload: P,
        owns_payload: bool,
        owner: Option<OwnerId>,
        delay: Pulse,
        callback: EventCallback<P>,
    },
    Cancel(EventId),
    CancelKind(OwnerId, EventKindId),
    CancelOwner(OwnerId),
}

impl<P> std::fmt::Debug for SchedulerOp<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerOp::Schedule { kind, delay, .. } => f
                .debug_struct("Schedule")
                .field("kind", kind)
                .field("delay", delay)
                .finish_non_exhaustive(),
            SchedulerOp::Cancel(id) => f.debug_tuple("Cancel").field(id).finish(),
            SchedulerOp::CancelKind(owner, kind) => {
                f.debug_tuple("CancelKind").field(owner).field(kind).finish()
            }
            SchedulerOp::CancelOwner(owner) => {
                f.debug_tuple("CancelOwner").field(owner).finish()
            }
        }
    }
}

/// Deferred scheduler mutations available to a firing callback.
///
/// Ops are applied in queue order once the firing event has settled,
/// before the next due event pops. Payloads cancelled through ops are
/// dropped, not reclaimed.
#[derive(Debug)]
pub struct OpQueue<P> {
    ops: Vec<SchedulerOp<P>>,
}

impl<P> OpQueue<P> {
    fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Queue a new event. Mirrors [`Scheduler::schedule`]; a stale owner id
    /// drops the op with a warning when applied.
    pub fn schedule(
        &mut self,
        kind: EventKindId,
        payload: P,
        owns_payload: bool,
        owner: Option<OwnerId>,
        delay: Pulse,
        callback: EventCallback<P>,
    ) {
        self.ops.push(SchedulerOp::Schedule {
            kind,
            payload,
            owns_payload,
            owner,
            delay,
            callback,
        });
    }

    /// Queue cancellation of a single event.
    pub fn cancel(&mut self, id: EventId) {
        self.ops.push(SchedulerOp::Cancel(id));
    }

    /// Queue cancellation of the first event of a kind in an owner's list.
    pub fn cancel_kind(&mut self, owner: OwnerId, kind: EventKindId) {
        self.ops.push(SchedulerOp::CancelKind(owner, kind));
    }

    /// Queue bulk cancellation of everything an owner has pending. The
    /// firing event is already detached from the list; if it reschedules
    /// itself, the op cancels the rescheduled event too.
    pub fn cancel_owned(&mut self, owner: OwnerId) {
        self.ops.push(SchedulerOp::CancelOwner(owner));
    }

    /// Number of queued ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether no ops are queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Records and summaries
// ---------------------------------------------------------------------------

/// One pending event. `callback` and `payload` are taken out of the record
/// while the callback runs and restored on reschedule.
struct EventRecord<P> {
    kind: EventKindId,
    callback: Option<EventCallback<P>>,
    payload: Option<P>,
    owns_payload: bool,
    /// Wheel back-reference; `None` only while the event is firing.
    slot: Option<SlotId>,
    owner: Option<OwnerId>,
}

impl<P> std::fmt::Debug for EventRecord<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecord")
            .field("kind", &self.kind)
            .field("owns_payload", &self.owns_payload)
            .field("slot", &self.slot)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Result of one [`Scheduler::step`].
pub struct TickSummary<P> {
    /// The pulse that was just processed.
    pub pulse: Pulse,
    /// Number of callbacks invoked.
    pub fired: usize,
    /// Payloads handed back to the caller: finished events whose payload
    /// the scheduler did not own, plus [`EventOutcome::FinishedKeepPayload`].
    pub reclaimed: Vec<(EventKindId, P)>,
}

impl<P> std::fmt::Debug for TickSummary<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickSummary")
            .field("pulse", &self.pulse)
            .field("fired", &self.fired)
            .field("reclaimed", &self.reclaimed.len())
            .finish()
    }
}

/// Result of an [`Scheduler::advance`] call.
pub struct AdvanceSummary<P> {
    /// Number of steps actually executed.
    pub steps_run: u64,
    /// Total callbacks invoked across all steps.
    pub fired: usize,
    /// Concatenated reclaimed payloads from every step.
    pub reclaimed: Vec<(EventKindId, P)>,
}

impl<P> std::fmt::Debug for AdvanceSummary<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvanceSummary")
            .field("steps_run", &self.steps_run)
            .field("fired", &self.fired)
            .field("reclaimed", &self.reclaimed.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Config and errors
// ---------------------------------------------------------------------------

/// Scheduler construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Bucket count for the time wheel.
    pub buckets: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_BUCKETS,
        }
    }
}

/// Errors from [`Scheduler::schedule`].
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("unknown owner: {0:?}")]
    UnknownOwner(OwnerId),
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// The pulse-driven event scheduler. `P` is the collaborator-supplied
/// payload type, normally an enum with one variant per event kind.
pub struct Scheduler<P> {
    wheel: PulseWheel<EventId>,
    events: SlotMap<EventId, EventRecord<P>>,
    owners: SlotMap<OwnerId, Vec<EventId>>,
    kinds: KindRegistry,
    pulse: Pulse,
}

impl<P> std::fmt::Debug for Scheduler<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pulse", &self.pulse)
            .field("pending", &self.events.len())
            .field("owners", &self.owners.len())
            .field("kinds", &self.kinds.len())
            .finish_non_exhaustive()
    }
}

impl<P> Default for Scheduler<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Scheduler<P> {
    /// Create a scheduler with the default wheel size.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler from explicit config.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            wheel: PulseWheel::with_buckets(config.buckets),
            events: SlotMap::with_key(),
            owners: SlotMap::with_key(),
            kinds: KindRegistry::new(),
            pulse: 0,
        }
    }

    /// Current pulse. The next [`step`](Self::step) fires events due at
    /// this value.
    pub fn pulse(&self) -> Pulse {
        self.pulse
    }

    /// Number of pending events.
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    /// The kind registry (labels for diagnostics).
    pub fn kinds(&self) -> &KindRegistry {
        &self.kinds
    }

    /// Mutable kind registry, for startup registration.
    pub fn kinds_mut(&mut self) -> &mut KindRegistry {
        &mut self.kinds
    }

    /// Label for a kind; unknown kinds get the registry's sentinel label.
    pub fn name_of(&self, kind: EventKindId) -> &str {
        self.kinds.name_of(kind)
    }

    // -- Owners -------------------------------------------------------------

    /// Register an owner list for an entity. Events scheduled against it
    /// can be bulk-cancelled when the entity is destroyed.
    pub fn create_owner(&mut self) -> OwnerId {
        self.owners.insert(Vec::new())
    }

    /// Cancel everything the owner has pending, then drop the owner slot.
    /// Entity-destruction code calls this; skipping it leaves events that
    /// will fire against a dead entity.
    pub fn remove_owner(&mut self, owner: OwnerId) {
        if !self.owners.contains_key(owner) {
            warn!(?owner, "remove_owner on a stale owner handle");
            return;
        }
        self.cancel_owned(owner);
        self.owners.remove(owner);
    }

    /// Event ids currently pending for an owner, oldest first. Empty for a
    /// stale owner.
    pub fn owned_events(&self, owner: OwnerId) -> &[EventId] {
        self.owners.get(owner).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether the owner has any pending event of the given kind.
    pub fn has_kind(&self, owner: OwnerId, kind: EventKindId) -> bool {
        self.owned_events(owner)
            .iter()
            .any(|&e| self.events.get(e).is_some_and(|r| r.kind == kind))
    }

    // -- Scheduling ---------------------------------------------------------

    /// Schedule an event to fire `delay` pulses from now (0 = during the
    /// next `step`, i.e. this pulse).
    ///
    /// With `owns_payload` set, the scheduler drops the payload when the
    /// event completes or is cancelled; otherwise the payload is handed
    /// back (through [`cancel`](Self::cancel) or the tick summary).
    pub fn schedule(
        &mut self,
        kind: EventKindId,
        payload: P,
        owns_payload: bool,
        owner: Option<OwnerId>,
        delay: Pulse,
        callback: EventCallback<P>,
    ) -> Result<EventId, ScheduleError> {
        if let Some(o) = owner
            && !self.owners.contains_key(o)
        {
            return Err(ScheduleError::UnknownOwner(o));
        }

        let fire_at = self.pulse + delay;
        let id = self.events.insert(EventRecord {
            kind,
            callback: Some(callback),
            payload: Some(payload),
            owns_payload,
            slot: None,
            owner,
        });
        let slot = self.wheel.insert(id, fire_at);
        self.events[id].slot = Some(slot);

        if let Some(o) = owner {
            self.owners[o].push(id);
        }
        Ok(id)
    }

    /// Cancel a pending event. Synchronous and immediate: once this
    /// returns, the callback is guaranteed never to run.
    ///
    /// Returns the payload when the scheduler did not own it; `None` when
    /// it was dropped here. A stale handle logs a warning and no-ops.
    pub fn cancel(&mut self, id: EventId) -> Option<P> {
        self.cancel_inner(id, true).flatten()
    }

    /// Cancel the first pending event of `kind` in the owner's list
    /// (oldest first). Returns whether one was found. The payload is
    /// dropped; cancel individually to get it back.
    pub fn cancel_kind(&mut self, owner: OwnerId, kind: EventKindId) -> bool {
        let Some(list) = self.owners.get(owner) else {
            warn!(?owner, "cancel_kind on a stale owner handle");
            return false;
        };
        let found = list
            .iter()
            .copied()
            .find(|&e| self.events.get(e).is_some_and(|r| r.kind == kind));
        match found {
            Some(id) => {
                self.cancel_inner(id, true);
                true
            }
            None => false,
        }
    }

    /// Cancel everything in an owner's list. Returns the count cancelled.
    /// The list is detached from the owner slot before the per-event pass,
    /// so nothing can observe it half torn down; the owner stays
    /// registered, with an empty list.
    pub fn cancel_owned(&mut self, owner: OwnerId) -> usize {
        let Some(list) = self.owners.get_mut(owner) else {
            warn!(?owner, "cancel_owned on a stale owner handle");
            return 0;
        };
        let ids = std::mem::take(list);
        let mut cancelled = 0;
        for id in ids {
            if self.cancel_inner(id, false).is_some() {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Inner cancellation. Outer `None` means the handle was a no-op;
    /// `Some(payload)` means the event was cancelled, with the payload
    /// present when the scheduler did not own it.
    fn cancel_inner(&mut self, id: EventId, detach_owner: bool) -> Option<Option<P>> {
        match self.events.get(id) {
            None => {
                warn!(?id, "cancel of a stale event handle");
                return None;
            }
            Some(rec) if rec.slot.is_none() => {
                // Mid-fire handles are unreachable through the public API;
                // guard anyway.
                warn!(?id, "cancel of an event that is currently firing");
                return None;
            }
            Some(_) => {}
        }

        let mut rec = self.events.remove(id)?;
        if let Some(slot) = rec.slot {
            self.wheel.remove(slot);
        }
        if detach_owner
            && let Some(owner) = rec.owner
            && let Some(list) = self.owners.get_mut(owner)
        {
            list.retain(|&e| e != id);
        }

        let payload = rec.payload.take();
        if rec.owns_payload {
            Some(None) // dropped here
        } else {
            Some(payload)
        }
    }

    /// Pulses until a pending event fires (0 = due on the next step).
    /// `None` for a stale handle, with a warning.
    pub fn remaining(&self, id: EventId) -> Option<Pulse> {
        let Some(rec) = self.events.get(id) else {
            warn!(?id, "remaining-time query on a stale event handle");
            return None;
        };
        let slot = rec.slot?;
        self.wheel
            .fire_at(slot)
            .map(|fire_at| fire_at.saturating_sub(self.pulse))
    }

    // -- Driving ------------------------------------------------------------

    /// Fire every event due at the current pulse, then advance the counter
    /// by exactly one. The only way time moves; pulses cannot be skipped.
    pub fn step(&mut self) -> TickSummary<P> {
        let now = self.pulse;
        let mut summary = TickSummary {
            pulse: now,
            fired: 0,
            reclaimed: Vec::new(),
        };

        // Only the current pulse's bucket is consulted. Entries due on a
        // later wheel revolution keep the loop from popping past `now`.
        while let Some(key) = self.wheel.head_key(now) {
            if key > now {
                break;
            }
            let Some((_, id)) = self.wheel.pop_head(now) else {
                break;
            };
            self.fire_one(id, now, &mut summary);
        }

        self.pulse = now + 1;
        summary
    }

    /// Run `steps` pulses back-to-back.
    pub fn advance(&mut self, steps: u64) -> AdvanceSummary<P> {
        let mut summary = AdvanceSummary {
            steps_run: 0,
            fired: 0,
            reclaimed: Vec::new(),
        };
        for _ in 0..steps {
            let tick = self.step();
            summary.steps_run += 1;
            summary.fired += tick.fired;
            summary.reclaimed.extend(tick.reclaimed);
        }
        summary
    }

    /// Fire a single popped event: detach, invoke, settle, apply ops.
    fn fire_one(&mut self, id: EventId, now: Pulse, summary: &mut TickSummary<P>) {
        let Some(rec) = self.events.get_mut(id) else {
            // Wheel and arena out of sync would be an internal bug.
            warn!(?id, "due wheel entry without an event record");
            return;
        };
        rec.slot = None;
        let kind = rec.kind;
        let owns_payload = rec.owns_payload;
        let owner = rec.owner;
        let (mut callback, mut payload) = match (rec.callback.take(), rec.payload.take()) {
            (Some(cb), Some(p)) => (cb, p),
            _ => {
                self.events.remove(id);
                return;
            }
        };

        // Detach from the owner list before the callback runs.
        if let Some(o) = owner
            && let Some(list) = self.owners.get_mut(o)
        {
            list.retain(|&e| e != id);
        }

        let mut ops = OpQueue::new();
        let outcome = callback(&mut payload, &mut ops);
        summary.fired += 1;

        match outcome {
            EventOutcome::RescheduleAfter(delay) => {
                let delay = delay.max(1);
                let rec = &mut self.events[id];
                rec.callback = Some(callback);
                rec.payload = Some(payload);
                rec.slot = Some(self.wheel.insert(id, now + delay));
                if let Some(o) = owner
                    && let Some(list) = self.owners.get_mut(o)
                {
                    list.push(id);
                }
            }
            EventOutcome::Finished => {
                self.events.remove(id);
                if !owns_payload {
                    summary.reclaimed.push((kind, payload));
                }
            }
            EventOutcome::FinishedKeepPayload => {
                self.events.remove(id);
                summary.reclaimed.push((kind, payload));
            }
            EventOutcome::FinishedDropPayload => {
                self.events.remove(id);
                // payload dropped here
            }
        }

        self.apply_ops(ops);
    }

    /// Apply a callback's deferred ops, in queue order.
    fn apply_ops(&mut self, ops: OpQueue<P>) {
        for op in ops.ops {
            match op {
                SchedulerOp::Schedule {
                    kind,
                    payload,
                    owns_payload,
                    owner,
                    delay,
                    callback,
                } => {
                    if let Err(err) =
                        self.schedule(kind, payload, owns_payload, owner, delay, callback)
                    {
                        warn!(%err, "dropping schedule op from callback");
                    }
                }
                SchedulerOp::Cancel(id) => {
                    self.cancel_inner(id, true);
                }
                SchedulerOp::CancelKind(owner, kind) => {
                    self.cancel_kind(owner, kind);
                }
                SchedulerOp::CancelOwner(owner) => {
                    self.cancel_owned(owner);
                }
            }
        }
    }

    // -- Teardown -----------------------------------------------------------

    /// Drop every pending event and owned payload without invoking any
    /// callback. The shutdown path; owners stay registered but empty.
    pub fn clear(&mut self) {
        self.wheel.clear();
        self.events.clear();
        for (_, list) in self.owners.iter_mut() {
            list.clear();
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
