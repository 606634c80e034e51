//! Participant side of a lexigrid session.
//!
//! A [`Participant`] applies its own tile moves speculatively, snapshots its play
//! state under a [`CheckpointPolicy`](lexigrid_protocol::CheckpointPolicy), and rolls
//! back (retracting what it already sent) when the coordinator rejects an action or a
//! peer retracts messages this participant had already acted on.
//!
//! Like the coordinator, it does no I/O: feed it server messages and user input, and
//! send whatever client messages it hands back.

mod checkpoint;
mod clock;
mod message_log;
mod participant;
mod state;

pub use crate::checkpoint::*;
pub use crate::clock::*;
pub use crate::message_log::*;
pub use crate::participant::*;
pub use crate::state::*;
