//! Shared data types and wire messages for Lexigrid sessions.
//!
//! Everything that crosses the network (or is shared between the arbiter and the
//! participants) lives here: ids, grid positions, letters and tiles, the client/server
//! message vocabulary and the MessagePack/JSON codec.

mod grid;
mod ids;
mod message;
mod tile;
pub mod wire;

pub use crate::grid::*;
pub use crate::ids::*;
pub use crate::message::*;
pub use crate::tile::*;
