//! Pulsewheel Core -- pulse-driven event scheduling for game servers.
//!
//! This crate provides the timing backbone of a tick-driven game loop: a
//! bucketed time wheel ordered by discrete pulse, and a typed event
//! scheduler layered on top of it for deferred callbacks, periodic
//! effects, and per-entity event lifecycles.
//!
//! # Pulse Loop
//!
//! Time is a monotonic [`id::Pulse`] counter owned by the scheduler. Each
//! call to [`scheduler::Scheduler::step`] fires every event due at the
//! current pulse, then advances the counter by exactly one. Because `step`
//! is the only way time moves, no pulse's bucket can ever be skipped.
//!
//! Everything runs on one logical thread. A callback that needs to touch
//! the scheduler queues the mutation on its [`scheduler::OpQueue`], which
//! is applied as soon as the firing event settles.
//!
//! # Scheduling Pattern
//!
//! ```rust,ignore
//! let id = sched.schedule(
//!     hurt,
//!     Payload::Hurt { victim, damage: 50 },
//!     true,          // scheduler owns the payload
//!     Some(victim_owner),
//!     5,             // pulses from now
//!     Box::new(|payload, ops| {
//!         apply_damage(payload);
//!         EventOutcome::Finished
//!     }),
//! )?;
//! ```
//!
//! # Key Types
//!
//! - [`scheduler::Scheduler`] -- Explicit scheduler object: event arena,
//!   owner lists, wheel, and the pulse counter.
//! - [`wheel::PulseWheel`] -- Bucketed priority queue keyed by absolute
//!   fire pulse, with O(1) cancellation via stable slot handles.
//! - [`scheduler::EventOutcome`] -- What a callback wants done next:
//!   finish (with payload routing) or reschedule.
//! - [`scheduler::OpQueue`] -- Deferred scheduler mutations available to a
//!   firing callback.
//! - [`kind::KindRegistry`] -- Dense kind-id allocation and diagnostic
//!   labels.
//! - [`id`] -- Arena key types ([`id::EventId`], [`id::OwnerId`],
//!   [`id::SlotId`]) and the [`id::Pulse`] counter.

pub mod id;
pub mod kind;
pub mod scheduler;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod wheel;
