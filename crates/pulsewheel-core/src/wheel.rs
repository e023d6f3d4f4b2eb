//! Bucketed time wheel: the raw priority queue under the scheduler.
//!
//! Values are ordered by an absolute [`Pulse`] fire time. The wheel keeps a
//! fixed array of `N` buckets; a value due at pulse `t` lives in bucket
//! `t % N`, in a doubly-linked list sorted by fire time. Because the driver
//! consults exactly one bucket per pulse, items due at similar times
//! cluster, so the sorted insert scans a short list instead of the whole
//! pending set.
//!
//! The links are arena indices into a [`SlotMap`], not pointers: removal by
//! handle is an O(1) unlink, stale handles are harmless, and teardown is a
//! plain drop.
//!
//! The wheel is payload-agnostic and clock-less. It never rejects or
//! interprets the values it stores, and it does not advance time itself:
//! the caller asks for the head of the *current* pulse's bucket, one pulse
//! at a time. Skipping a pulse would leave that bucket unread until the
//! wheel wraps; [`crate::scheduler::Scheduler::step`] is built so that
//! cannot happen.

use slotmap::SlotMap;

use crate::id::{Pulse, SlotId};

/// Default number of buckets. Matches the typical pending-event spread of a
/// game server: delays cluster well under 100 pulses.
pub const DEFAULT_BUCKETS: usize = 100;

// ---------------------------------------------------------------------------
// Slots and buckets
// ---------------------------------------------------------------------------

/// One scheduled entry: the stored value plus its intrusive links.
#[derive(Debug)]
struct Slot<T> {
    value: T,
    fire_at: Pulse,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

/// Head/tail pair for one bucket's doubly-linked list.
#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    head: Option<SlotId>,
    tail: Option<SlotId>,
}

// ---------------------------------------------------------------------------
// PulseWheel
// ---------------------------------------------------------------------------

/// A bucketed time wheel ordering opaque values by absolute fire time.
#[derive(Debug)]
pub struct PulseWheel<T> {
    slots: SlotMap<SlotId, Slot<T>>,
    buckets: Vec<Bucket>,
}

impl<T> Default for PulseWheel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PulseWheel<T> {
    /// Create a wheel with [`DEFAULT_BUCKETS`] buckets.
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKETS)
    }

    /// Create a wheel with the given bucket count.
    /// A count of 0 is clamped to 1.
    pub fn with_buckets(buckets: usize) -> Self {
        let buckets = buckets.max(1);
        Self {
            slots: SlotMap::with_key(),
            buckets: vec![Bucket::default(); buckets],
        }
    }

    /// Number of buckets in the wheel.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of values currently stored.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the wheel holds no values.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn bucket_index(&self, fire_at: Pulse) -> usize {
        (fire_at % self.buckets.len() as u64) as usize
    }

    /// Insert a value due at the given pulse. Returns a handle usable with
    /// [`remove`](Self::remove) and [`fire_at`](Self::fire_at).
    ///
    /// The insertion point is found by scanning backward from the bucket's
    /// tail to the first entry with an equal or earlier fire time and
    /// inserting after it. Equal fire times therefore keep submission
    /// order (FIFO among exact ties).
    pub fn insert(&mut self, value: T, fire_at: Pulse) -> SlotId {
        let bucket = self.bucket_index(fire_at);
        let id = self.slots.insert(Slot {
            value,
            fire_at,
            prev: None,
            next: None,
        });

        // Backward scan from the tail for the first entry due no later
        // than the new one.
        let mut after = self.buckets[bucket].tail;
        while let Some(cur) = after {
            if self.slots[cur].fire_at <= fire_at {
                break;
            }
            after = self.slots[cur].prev;
        }

        match after {
            Some(prev) => {
                let next = self.slots[prev].next;
                self.slots[id].prev = Some(prev);
                self.slots[id].next = next;
                self.slots[prev].next = Some(id);
                match next {
                    Some(n) => self.slots[n].prev = Some(id),
                    None => self.buckets[bucket].tail = Some(id),
                }
            }
            None => {
                // Everything in the bucket is due later; new head.
                let old_head = self.buckets[bucket].head;
                self.slots[id].next = old_head;
                match old_head {
                    Some(h) => self.slots[h].prev = Some(id),
                    None => self.buckets[bucket].tail = Some(id),
                }
                self.buckets[bucket].head = Some(id);
            }
        }

        id
    }

    /// Remove a value by handle, unlinking it in O(1).
    /// Returns `None` for a stale handle.
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let slot = self.slots.remove(id)?;
        let bucket = self.bucket_index(slot.fire_at);
        match slot.prev {
            Some(p) => self.slots[p].next = slot.next,
            None => self.buckets[bucket].head = slot.next,
        }
        match slot.next {
            Some(n) => self.slots[n].prev = slot.prev,
            None => self.buckets[bucket].tail = slot.prev,
        }
        Some(slot.value)
    }

    /// Fire time of the head of the current pulse's bucket, or `None` if
    /// that bucket is empty. The driver compares this against `now` to
    /// decide whether anything is due.
    pub fn head_key(&self, now: Pulse) -> Option<Pulse> {
        let bucket = self.bucket_index(now);
        self.buckets[bucket].head.map(|h| self.slots[h].fire_at)
    }

    /// Pop the head of the current pulse's bucket, returning its fire time
    /// and value. Pops unconditionally; callers guard with
    /// [`head_key`](Self::head_key) so that entries due on a later wheel
    /// revolution stay put.
    pub fn pop_head(&mut self, now: Pulse) -> Option<(Pulse, T)> {
        let bucket = self.bucket_index(now);
        let head = self.buckets[bucket].head?;
        let fire_at = self.slots[head].fire_at;
        let value = self.remove(head)?;
        Some((fire_at, value))
    }

    /// Fire time of a stored value, or `None` for a stale handle.
    pub fn fire_at(&self, id: SlotId) -> Option<Pulse> {
        self.slots.get(id).map(|s| s.fire_at)
    }

    /// Drop every stored value and empty all buckets.
    pub fn clear(&mut self) {
        self.slots.clear();
        for bucket in &mut self.buckets {
            *bucket = Bucket::default();
        }
    }

    /// Remove and return every stored value, in no particular order.
    /// Teardown helper; the caller is responsible for whatever the values
    /// refer to.
    pub fn drain(&mut self) -> Vec<T> {
        for bucket in &mut self.buckets {
            *bucket = Bucket::default();
        }
        let slots = std::mem::take(&mut self.slots);
        slots.into_iter().map(|(_, slot)| slot.value).collect()
    }

    /// Walk every bucket list and assert the structural invariants:
    /// modulus placement, non-decreasing fire times, consistent prev/next
    /// links, and that every arena slot is reachable from exactly one
    /// bucket. Panics on violation.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn check_invariants(&self) {
        let mut reachable = 0usize;
        for (b, bucket) in self.buckets.iter().enumerate() {
            let mut prev: Option<SlotId> = None;
            let mut last_fire: Option<Pulse> = None;
            let mut cur = bucket.head;
            while let Some(id) = cur {
                let slot = &self.slots[id];
                assert_eq!(
                    self.bucket_index(slot.fire_at),
                    b,
                    "slot in wrong bucket"
                );
                assert_eq!(slot.prev, prev, "broken prev link");
                if let Some(last) = last_fire {
                    assert!(last <= slot.fire_at, "bucket not sorted");
                }
                last_fire = Some(slot.fire_at);
                reachable += 1;
                prev = cur;
                cur = slot.next;
            }
            assert_eq!(bucket.tail, prev, "tail does not match last entry");
        }
        assert_eq!(reachable, self.slots.len(), "unreachable slots in arena");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Test 1: empty wheel
    // -----------------------------------------------------------------------
    #[test]
    fn new_wheel_is_empty() {
        let wheel: PulseWheel<u32> = PulseWheel::new();
        assert_eq!(wheel.bucket_count(), DEFAULT_BUCKETS);
        assert_eq!(wheel.len(), 0);
        assert!(wheel.is_empty());
        assert_eq!(wheel.head_key(0), None);
    }

    // -----------------------------------------------------------------------
    // Test 2: zero bucket count is clamped
    // -----------------------------------------------------------------------
    #[test]
    fn zero_buckets_clamped_to_one() {
        let wheel: PulseWheel<u32> = PulseWheel::with_buckets(0);
        assert_eq!(wheel.bucket_count(), 1);
    }

    // -----------------------------------------------------------------------
    // Test 3: insert places value in the modulus bucket
    // -----------------------------------------------------------------------
    #[test]
    fn insert_lands_in_modulus_bucket() {
        let mut wheel = PulseWheel::with_buckets(10);
        wheel.insert("a", 23);
        // Bucket 3 is consulted at pulses 3, 13, 23, ...
        assert_eq!(wheel.head_key(3), Some(23));
        assert_eq!(wheel.head_key(13), Some(23));
        assert_eq!(wheel.head_key(4), None);
        wheel.check_invariants();
    }

    // -----------------------------------------------------------------------
    // Test 4: bucket list is sorted by fire time
    // -----------------------------------------------------------------------
    #[test]
    fn bucket_sorted_by_fire_time() {
        let mut wheel = PulseWheel::with_buckets(10);
        // All three land in bucket 5.
        wheel.insert("late", 25);
        wheel.insert("early", 5);
        wheel.insert("mid", 15);
        wheel.check_invariants();

        assert_eq!(wheel.pop_head(5), Some((5, "early")));
        assert_eq!(wheel.pop_head(5), Some((15, "mid")));
        assert_eq!(wheel.pop_head(5), Some((25, "late")));
        assert_eq!(wheel.pop_head(5), None);
    }

    // -----------------------------------------------------------------------
    // Test 5: FIFO among equal fire times
    // -----------------------------------------------------------------------
    #[test]
    fn equal_fire_times_pop_fifo() {
        let mut wheel = PulseWheel::with_buckets(16);
        wheel.insert("a", 7);
        wheel.insert("b", 7);
        wheel.insert("c", 7);
        wheel.check_invariants();

        assert_eq!(wheel.pop_head(7), Some((7, "a")));
        assert_eq!(wheel.pop_head(7), Some((7, "b")));
        assert_eq!(wheel.pop_head(7), Some((7, "c")));
    }

    // -----------------------------------------------------------------------
    // Test 6: ties interleaved with earlier and later entries
    // -----------------------------------------------------------------------
    #[test]
    fn ties_insert_after_equal_entries() {
        let mut wheel = PulseWheel::with_buckets(8);
        wheel.insert("b", 10);
        wheel.insert("early", 2);
        wheel.insert("c", 10);
        wheel.insert("late", 18);
        wheel.insert("d", 10);
        wheel.check_invariants();

        assert_eq!(wheel.pop_head(2), Some((2, "early")));
        assert_eq!(wheel.pop_head(2), Some((10, "b")));
        assert_eq!(wheel.pop_head(2), Some((10, "c")));
        assert_eq!(wheel.pop_head(2), Some((10, "d")));
        assert_eq!(wheel.pop_head(2), Some((18, "late")));
    }

    // -----------------------------------------------------------------------
    // Test 7: remove unlinks from the middle of a list
    // -----------------------------------------------------------------------
    #[test]
    fn remove_middle_of_list() {
        let mut wheel = PulseWheel::with_buckets(4);
        let _a = wheel.insert("a", 0);
        let b = wheel.insert("b", 4);
        let _c = wheel.insert("c", 8);

        assert_eq!(wheel.remove(b), Some("b"));
        wheel.check_invariants();
        assert_eq!(wheel.len(), 2);

        assert_eq!(wheel.pop_head(0), Some((0, "a")));
        assert_eq!(wheel.pop_head(0), Some((8, "c")));
    }

    // -----------------------------------------------------------------------
    // Test 8: remove head and tail update bucket pointers
    // -----------------------------------------------------------------------
    #[test]
    fn remove_head_and_tail() {
        let mut wheel = PulseWheel::with_buckets(4);
        let a = wheel.insert("a", 0);
        let _b = wheel.insert("b", 4);
        let c = wheel.insert("c", 8);

        assert_eq!(wheel.remove(a), Some("a"));
        wheel.check_invariants();
        assert_eq!(wheel.head_key(0), Some(4));

        assert_eq!(wheel.remove(c), Some("c"));
        wheel.check_invariants();
        assert_eq!(wheel.pop_head(0), Some((4, "b")));
        assert!(wheel.is_empty());
    }

    // -----------------------------------------------------------------------
    // Test 9: stale handles are harmless
    // -----------------------------------------------------------------------
    #[test]
    fn stale_handle_is_noop() {
        let mut wheel = PulseWheel::with_buckets(4);
        let a = wheel.insert(1u32, 3);
        assert_eq!(wheel.remove(a), Some(1));
        assert_eq!(wheel.remove(a), None);
        assert_eq!(wheel.fire_at(a), None);
    }

    // -----------------------------------------------------------------------
    // Test 10: fire_at reports the scheduled pulse
    // -----------------------------------------------------------------------
    #[test]
    fn fire_at_reports_key() {
        let mut wheel = PulseWheel::with_buckets(100);
        let id = wheel.insert((), 42);
        assert_eq!(wheel.fire_at(id), Some(42));
    }

    // -----------------------------------------------------------------------
    // Test 11: head_key ignores other buckets
    // -----------------------------------------------------------------------
    #[test]
    fn head_key_only_sees_current_bucket() {
        let mut wheel = PulseWheel::with_buckets(10);
        wheel.insert("x", 5);
        for now in 0..10 {
            if now == 5 {
                assert_eq!(wheel.head_key(now), Some(5));
            } else {
                assert_eq!(wheel.head_key(now), None);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Test 12: a far-future entry shares a bucket with a near one
    // -----------------------------------------------------------------------
    #[test]
    fn wrap_around_entry_stays_behind_near_entry() {
        let mut wheel = PulseWheel::with_buckets(10);
        // Both land in bucket 5: one due this revolution, one due two
        // revolutions later.
        wheel.insert("far", 25);
        wheel.insert("near", 5);

        // At pulse 5, the head is the near entry; popping it leaves the
        // far entry as head with a key in the future.
        assert_eq!(wheel.head_key(5), Some(5));
        assert_eq!(wheel.pop_head(5), Some((5, "near")));
        assert_eq!(wheel.head_key(5), Some(25));
    }

    // -----------------------------------------------------------------------
    // Test 13: clear empties everything
    // -----------------------------------------------------------------------
    #[test]
    fn clear_empties_wheel() {
        let mut wheel = PulseWheel::with_buckets(10);
        for t in 0..50 {
            wheel.insert(t, t);
        }
        assert_eq!(wheel.len(), 50);
        wheel.clear();
        assert!(wheel.is_empty());
        for now in 0..10 {
            assert_eq!(wheel.head_key(now), None);
        }
        wheel.check_invariants();
    }

    // -----------------------------------------------------------------------
    // Test 14: drain returns every value exactly once
    // -----------------------------------------------------------------------
    #[test]
    fn drain_returns_all_values() {
        let mut wheel = PulseWheel::with_buckets(7);
        for t in 0..20u64 {
            wheel.insert(t, t * 3);
        }
        let mut drained = wheel.drain();
        drained.sort_unstable();
        assert_eq!(drained, (0..20).collect::<Vec<_>>());
        assert!(wheel.is_empty());
        wheel.check_invariants();
    }

    // -----------------------------------------------------------------------
    // Test 15: single-bucket wheel degenerates to one sorted list
    // -----------------------------------------------------------------------
    #[test]
    fn single_bucket_wheel() {
        let mut wheel = PulseWheel::with_buckets(1);
        wheel.insert("c", 30);
        wheel.insert("a", 10);
        wheel.insert("b", 20);
        wheel.check_invariants();

        assert_eq!(wheel.pop_head(0), Some((10, "a")));
        assert_eq!(wheel.pop_head(0), Some((20, "b")));
        assert_eq!(wheel.pop_head(0), Some((30, "c")));
    }
}
