use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Board is 15x15 squares.
pub const BOARD_SIZE: u8 = 15;

/// A square on the board, keyed explicitly by `(row, col)`.
///
/// Always on-board: the only way to build one is through [`Position::new`] (or
/// deserialization, which runs the same check).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawPosition", into = "RawPosition")]
pub struct Position {
    row: u8,
    col: u8,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct RawPosition {
    row: u8,
    col: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("position ({row}, {col}) is off the {BOARD_SIZE}x{BOARD_SIZE} board")]
pub struct OffBoard {
    pub row: u8,
    pub col: u8,
}

impl Position {
    pub fn new(row: u8, col: u8) -> Result<Self, OffBoard> {
        if row >= BOARD_SIZE || col >= BOARD_SIZE {
            return Err(OffBoard { row, col });
        }
        Ok(Self { row, col })
    }

    #[inline]
    pub fn row(self) -> u8 {
        self.row
    }

    #[inline]
    pub fn col(self) -> u8 {
        self.col
    }

    /// Coordinate that varies along `axis`.
    #[inline]
    pub fn along(self, axis: Axis) -> u8 {
        match axis {
            Axis::Horizontal => self.col,
            Axis::Vertical => self.row,
        }
    }

    /// Coordinate that stays fixed along `axis` (the line the position sits on).
    #[inline]
    pub fn line(self, axis: Axis) -> u8 {
        match axis {
            Axis::Horizontal => self.row,
            Axis::Vertical => self.col,
        }
    }

    /// Neighbour `delta` squares away along `axis`, or `None` off the board.
    pub fn step(self, axis: Axis, delta: i16) -> Option<Self> {
        let moved = i16::from(self.along(axis)) + delta;
        if !(0..i16::from(BOARD_SIZE)).contains(&moved) {
            return None;
        }
        let moved = moved as u8;
        match axis {
            Axis::Horizontal => Some(Self {
                row: self.row,
                col: moved,
            }),
            Axis::Vertical => Some(Self {
                row: moved,
                col: self.col,
            }),
        }
    }

    /// Iterate over every square of the board in row-major order.
    pub fn all() -> impl Iterator<Item = Position> {
        (0..BOARD_SIZE).flat_map(|row| (0..BOARD_SIZE).map(move |col| Position { row, col }))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

impl TryFrom<RawPosition> for Position {
    type Error = OffBoard;

    fn try_from(raw: RawPosition) -> Result<Self, Self::Error> {
        Position::new(raw.row, raw.col)
    }
}

impl From<Position> for RawPosition {
    fn from(pos: Position) -> Self {
        RawPosition {
            row: pos.row,
            col: pos.col,
        }
    }
}

/// Grid axis a word runs along.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Along a row (column index varies).
    Horizontal,
    /// Along a column (row index varies).
    Vertical,
}

impl Axis {
    pub const BOTH: [Axis; 2] = [Axis::Horizontal, Axis::Vertical];
}
