use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

/// Pulses are the atomic unit of scheduler time. One pulse is one game
/// tick; all delays are whole pulse counts, never wall-clock durations.
pub type Pulse = u64;

new_key_type! {
    /// Identifies a pending event in the scheduler's event arena.
    ///
    /// Handles stay valid until the event finishes or is cancelled; after
    /// that they go stale and every scheduler operation treats them as a
    /// defensive no-op.
    pub struct EventId;

    /// Identifies a registered owner list (a character, object, or room
    /// in the embedding game). Owners exist so that all of an entity's
    /// pending events can be cancelled in one call when it is destroyed.
    pub struct OwnerId;

    /// Identifies a slot inside the time wheel's arena. Internal to
    /// [`crate::wheel::PulseWheel`]; the scheduler holds these as
    /// back-references for O(1) cancellation.
    pub struct SlotId;
}

/// Identifies an event kind (delayed damage, casting, regen, ...).
/// Issued by [`crate::kind::KindRegistry`]. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKindId(pub u16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_id_equality() {
        let a = EventKindId(0);
        let b = EventKindId(0);
        let c = EventKindId(1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn event_kind_id_copy() {
        let a = EventKindId(7);
        let b = a; // Copy
        assert_eq!(a, b);
    }

    #[test]
    fn ids_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(EventKindId(0), "hurt");
        map.insert(EventKindId(1), "casting");
        assert_eq!(map[&EventKindId(0)], "hurt");
    }
}
