//! Tilefall core: protocol messages, domain types, XP curve, and clock.
//!
//! Shared between the game server and tooling. Everything here is
//! transport-agnostic: the wire envelope and payload types live in
//! [`messages`], the domain vocabulary (directions, equipment slots,
//! entity states) in [`types`], and the immutable reference-data records
//! in [`defs`].

pub mod clock;
pub mod constants;
pub mod defs;
pub mod messages;
pub mod skills;
pub mod types;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use messages::{Envelope, ErrorPayload};
pub use skills::{level_for_xp, xp_for_level, SkillType, HITPOINTS_START_LEVEL};
pub use types::{
    chebyshev, CombatTargetType, Direction, EntityBehavior, EntityState, EquipmentSlot, Position,
};
