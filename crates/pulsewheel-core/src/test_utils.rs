//! Shared helpers for unit and integration tests. Compiled only for tests
//! or with the `test-utils` feature.

use std::cell::Cell;
use std::rc::Rc;

use crate::id::Pulse;
use crate::scheduler::{EventCallback, EventOutcome};

/// Shared counter for observing firings or drops from outside a callback.
pub type FireCount = Rc<Cell<u32>>;

/// Fresh counter at zero.
pub fn fire_count() -> FireCount {
    Rc::new(Cell::new(0))
}

/// Callback that bumps the counter and finishes.
pub fn count_and_finish<P>(count: &FireCount) -> EventCallback<P> {
    let count = count.clone();
    Box::new(move |_payload, _ops| {
        count.set(count.get() + 1);
        EventOutcome::Finished
    })
}

/// Callback that bumps the counter and reschedules itself `times` more
/// times at the given period, then finishes.
pub fn count_and_reschedule<P>(count: &FireCount, period: Pulse, times: u32) -> EventCallback<P> {
    let count = count.clone();
    let mut remaining = times;
    Box::new(move |_payload, _ops| {
        count.set(count.get() + 1);
        if remaining == 0 {
            EventOutcome::Finished
        } else {
            remaining -= 1;
            EventOutcome::RescheduleAfter(period)
        }
    })
}

/// Callback that tears down its own owner and finishes. The firing event
/// is already detached, so only siblings (and any reschedule) die.
pub fn cancel_owner_and_finish<P>(owner: crate::id::OwnerId) -> EventCallback<P> {
    Box::new(move |_payload, ops| {
        ops.cancel_owned(owner);
        EventOutcome::Finished
    })
}

/// Payload fragment that tallies drops on a shared counter. Lets tests
/// assert exactly-once destruction across cancel paths.
pub struct DropProbe {
    drops: FireCount,
}

impl DropProbe {
    pub fn new(drops: &FireCount) -> Self {
        Self {
            drops: drops.clone(),
        }
    }
}

impl Drop for DropProbe {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

impl std::fmt::Debug for DropProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropProbe").finish_non_exhaustive()
    }
}

// Clone makes another live probe on the same tally; each copy counts its
// own drop. Equality is tally identity, enough for payload enums that
// want to derive comparisons.
impl Clone for DropProbe {
    fn clone(&self) -> Self {
        Self {
            drops: self.drops.clone(),
        }
    }
}

impl PartialEq for DropProbe {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.drops, &other.drops)
    }
}

impl Eq for DropProbe {}
