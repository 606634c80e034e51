//! Game rules shared by the coordinator and the participants.
//!
//! Holds the tile bag, racks, the committed board, the turn ring and the word
//! assembler that turns grid placements into candidate words.

mod bag;
mod board;
mod rack;
mod turn;
mod word;

pub use crate::bag::*;
pub use crate::board::*;
pub use crate::rack::*;
pub use crate::turn::*;
pub use crate::word::*;
