//! codebot: Discord community companion.
//!
//! The core is a reconciliation and scheduling engine that keeps voice room
//! labels in step with what their occupants are doing:
//!
//! - **Resource Cache** ([`resources`]): last known channel handles.
//! - **AI Response Cache** ([`ai`]): bounded LRU in front of the text
//!   generator, with fixed fallbacks on failure.
//! - **Label State Machine** ([`labels`]): `Idle`/`Active(subject)` per room,
//!   one serialized writer per room.
//! - **Reconciliation Scheduler** ([`scheduler`]): drift sweep, history
//!   retention and the presence cycle.
//! - **Event Dispatcher** ([`dispatch`]): the event fast path, cooldowns and
//!   slash commands.
//!
//! [`platform`] holds the outbound contract and the Discord adapter;
//! [`runtime`] wires everything together.

pub mod ai;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod labels;
pub mod platform;
pub mod resources;
pub mod runtime;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::BotConfig;
pub use error::{BotError, Result};
pub use labels::{LabelMachine, LabelOutcome, LabelState};
pub use platform::{Platform, PlatformEvent};
pub use runtime::{Companion, run_bot};
pub use scheduler::Scheduler;
