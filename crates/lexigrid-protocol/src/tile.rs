use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Position, TileId};

/// Number of slots on a participant's rack.
pub const RACK_SIZE: usize = 7;

/// Number of letter categories in the bag.
pub const LETTER_COUNT: usize = 26;

/// Starting count per letter, `A` through `Z` (98 tiles).
const INITIAL_COUNTS: [u8; LETTER_COUNT] = [
    9, 2, 2, 4, 12, 2, 3, 2, 9, 1, 1, 4, 2, 6, 8, 2, 1, 6, 4, 6, 4, 2, 2, 1, 2, 1,
];

/// Point value per letter, `A` through `Z`.
const POINTS: [u8; LETTER_COUNT] = [
    1, 3, 3, 2, 1, 4, 2, 4, 1, 8, 5, 1, 3, 1, 1, 3, 10, 1, 1, 1, 1, 4, 4, 8, 4, 10,
];

/// One of the 26 letter categories. Serialized as its uppercase character.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "char", into = "char")]
pub struct Letter(u8);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("'{0}' is not a tile letter")]
pub struct NotALetter(pub char);

impl Letter {
    pub fn from_index(index: usize) -> Option<Self> {
        (index < LETTER_COUNT).then_some(Self(index as u8))
    }

    pub fn from_char(c: char) -> Result<Self, NotALetter> {
        let upper = c.to_ascii_uppercase();
        if upper.is_ascii_uppercase() {
            Ok(Self(upper as u8 - b'A'))
        } else {
            Err(NotALetter(c))
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn as_char(self) -> char {
        (b'A' + self.0) as char
    }

    pub fn points(self) -> u8 {
        POINTS[self.index()]
    }

    pub fn initial_count(self) -> u8 {
        INITIAL_COUNTS[self.index()]
    }

    pub fn all() -> impl Iterator<Item = Letter> {
        (0..LETTER_COUNT as u8).map(Letter)
    }
}

impl fmt::Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl TryFrom<char> for Letter {
    type Error = NotALetter;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        Letter::from_char(c)
    }
}

impl From<Letter> for char {
    fn from(letter: Letter) -> Self {
        letter.as_char()
    }
}

/// A letter tile.
///
/// `position` is set while the tile sits on the board; `committed` once the word it
/// belongs to has been accepted (permanent from then on).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub id: TileId,
    pub letter: Letter,
    pub points: u8,
    pub origin_slot: u8,
    pub position: Option<Position>,
    pub committed: bool,
}

impl Tile {
    /// Fresh tile as minted by the bag (not yet on a rack).
    pub fn new(id: TileId, letter: Letter) -> Self {
        Self {
            id,
            letter,
            points: letter.points(),
            origin_slot: 0,
            position: None,
            committed: false,
        }
    }

    pub fn placed_at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }
}
