//! Game services: the rule-enforcing layer between the dispatcher and the
//! state managers.
//!
//! Each service validates a command, runs the game rules, and mutates
//! state through the managers only. Every fallible call returns
//! [`ServiceResult`]; the dispatcher translates errors into wire
//! `resp_error` envelopes.

pub mod combat;
pub mod hp;
pub mod movement;
pub mod result;

pub use combat::{AttackResolution, CombatService, EntityAttackOutcome, PlayerDeathOutcome};
pub use hp::HpService;
pub use movement::{MovementOutcome, MovementService};
pub use result::{ErrorCode, ServiceError, ServiceResult};
