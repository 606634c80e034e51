//! Pending word assembly.
//!
//! Tracks the uncommitted tiles of the current word attempt as two axis lists, one
//! per grid direction. Each list is a contiguous run of squares; `None` cells are
//! gaps left by removals. Committed tiles adjacent to either end are absorbed into
//! the list so new words can graft onto earlier ones.

use std::collections::BTreeMap;

use lexigrid_protocol::{Axis, Position, Tile};
use thiserror::Error;

use crate::Board;

/// Which axes currently hold a multi-letter word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    None,
    Horizontal,
    Vertical,
    Both,
}

/// Where a placed tile landed in each axis list, after absorbing committed neighbours.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Insertion {
    pub horizontal: Option<usize>,
    pub vertical: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum PlacementError {
    #[error("square {0} is occupied")]
    Occupied(Position),
    #[error("square {0} does not extend the pending word")]
    NotAligned(Position),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RemovalError {
    #[error("tile at {0} is committed")]
    Committed(Position),
    #[error("no pending tile at {0}")]
    NotPending(Position),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("pending word has a gap")]
    Incomplete,
    #[error("no pending word")]
    Empty,
}

type Cells = Vec<Option<Tile>>;

enum Slot {
    Prepend,
    Append,
    Gap(usize),
}

/// State of the word being assembled.
///
/// `count` always equals the number of uncommitted tiles this word has put on the
/// board; with `count == 0` both lists are empty and the direction is `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingWord {
    horizontal: Cells,
    vertical: Cells,
    direction: Direction,
    count: usize,
    tiles: BTreeMap<Position, Tile>,
}

impl PendingWord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn horizontal(&self) -> &[Option<Tile>] {
        &self.horizontal
    }

    pub fn vertical(&self) -> &[Option<Tile>] {
        &self.vertical
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn contains(&self, position: Position) -> bool {
        self.tiles.contains_key(&position)
    }

    pub fn get(&self, position: Position) -> Option<&Tile> {
        self.tiles.get(&position)
    }

    /// Uncommitted tiles of this word in board order.
    pub fn pending_tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    /// Put `tile` on `position` as part of this word.
    pub fn place(
        &mut self,
        mut tile: Tile,
        position: Position,
        board: &Board,
    ) -> Result<Insertion, PlacementError> {
        if board.is_committed(position) || self.tiles.contains_key(&position) {
            return Err(PlacementError::Occupied(position));
        }
        tile.position = Some(position);
        tile.committed = false;

        if self.count == 0 {
            self.seed(tile.clone(), board);
        } else {
            let mut accepted = false;
            for &axis in self.open_axes() {
                let cells = self.cells_mut(axis);
                let Some(slot) = insertion_slot(cells, axis, position) else {
                    continue;
                };
                match slot {
                    Slot::Prepend => cells.insert(0, Some(tile.clone())),
                    Slot::Append => cells.push(Some(tile.clone())),
                    Slot::Gap(index) => cells[index] = Some(tile.clone()),
                }
                absorb(cells, axis, board);
                accepted = true;
            }
            if !accepted {
                return Err(PlacementError::NotAligned(position));
            }
        }

        self.tiles.insert(position, tile);
        self.count += 1;
        self.classify();

        Ok(Insertion {
            horizontal: index_of(&self.horizontal, position),
            vertical: index_of(&self.vertical, position),
        })
    }

    /// Take the pending tile at `position` back off the board.
    pub fn remove(&mut self, position: Position, board: &Board) -> Result<Tile, RemovalError> {
        if board.is_committed(position) {
            return Err(RemovalError::Committed(position));
        }
        let tile = self
            .tiles
            .remove(&position)
            .ok_or(RemovalError::NotPending(position))?;
        self.count -= 1;

        match self.count {
            0 => self.reset(),
            1 => {
                // A lone tile belongs to both potential words again.
                if let Some(lone) = self.tiles.values().next().cloned() {
                    self.seed(lone, board);
                }
                self.classify();
            }
            _ => {
                for axis in Axis::BOTH {
                    let cells = self.cells_mut(axis);
                    if let Some(index) = index_of(cells, position) {
                        cells[index] = None;
                    }
                    trim(cells);
                }
                self.classify();
            }
        }
        Ok(tile)
    }

    /// Render the candidate words, lowercase.
    pub fn words(&self) -> Result<Vec<String>, SubmissionError> {
        if self.count == 0 || (self.horizontal.is_empty() && self.vertical.is_empty()) {
            return Err(SubmissionError::Empty);
        }

        let lists: Vec<&Cells> = match self.direction {
            Direction::None => {
                if self.count > 1 {
                    return Err(SubmissionError::Incomplete);
                }
                if self.horizontal.is_empty() {
                    vec![&self.vertical]
                } else {
                    vec![&self.horizontal]
                }
            }
            _ => [&self.horizontal, &self.vertical]
                .into_iter()
                .filter(|cells| cells.len() >= 2)
                .collect(),
        };

        // Every pending tile has to be part of some rendered word.
        let connected = self
            .tiles
            .keys()
            .all(|pos| lists.iter().any(|cells| index_of(cells, *pos).is_some()));
        if !connected {
            return Err(SubmissionError::Incomplete);
        }

        lists
            .iter()
            .map(|cells| {
                cells
                    .iter()
                    .map(|cell| {
                        cell.as_ref()
                            .map(|t| t.letter.as_char().to_ascii_lowercase())
                            .ok_or(SubmissionError::Incomplete)
                    })
                    .collect::<Result<String, _>>()
            })
            .collect()
    }

    /// Hand back every pending tile and start over (the word was committed or abandoned).
    pub fn take_pending(&mut self) -> Vec<Tile> {
        let tiles = std::mem::take(&mut self.tiles);
        self.reset();
        tiles.into_values().collect()
    }

    fn reset(&mut self) {
        self.horizontal.clear();
        self.vertical.clear();
        self.direction = Direction::None;
        self.count = 0;
    }

    fn seed(&mut self, tile: Tile, board: &Board) {
        self.horizontal = vec![Some(tile.clone())];
        self.vertical = vec![Some(tile)];
        absorb(&mut self.horizontal, Axis::Horizontal, board);
        absorb(&mut self.vertical, Axis::Vertical, board);
    }

    fn open_axes(&self) -> &'static [Axis] {
        if self.count <= 1 {
            return &Axis::BOTH;
        }
        match self.direction {
            Direction::None | Direction::Both => &Axis::BOTH,
            Direction::Horizontal => &[Axis::Horizontal],
            Direction::Vertical => &[Axis::Vertical],
        }
    }

    fn cells_mut(&mut self, axis: Axis) -> &mut Cells {
        match axis {
            Axis::Horizontal => &mut self.horizontal,
            Axis::Vertical => &mut self.vertical,
        }
    }

    fn classify(&mut self) {
        let horizontal = self.horizontal.len() >= 2;
        let vertical = self.vertical.len() >= 2;
        self.direction = match (horizontal, vertical) {
            (true, true) => Direction::Both,
            (true, false) => Direction::Horizontal,
            (false, true) => Direction::Vertical,
            (false, false) => Direction::None,
        };

        // A single pending tile keeps both lists; from two on the losing axis goes.
        if self.count >= 2 {
            match self.direction {
                Direction::Horizontal => self.vertical.clear(),
                Direction::Vertical => self.horizontal.clear(),
                Direction::None | Direction::Both => {}
            }
        }
    }
}

fn first_position(cells: &Cells) -> Option<Position> {
    cells.first()?.as_ref()?.position
}

fn last_position(cells: &Cells) -> Option<Position> {
    cells.last()?.as_ref()?.position
}

fn index_of(cells: &Cells, position: Position) -> Option<usize> {
    cells
        .iter()
        .position(|cell| cell.as_ref().and_then(|t| t.position) == Some(position))
}

fn insertion_slot(cells: &Cells, axis: Axis, position: Position) -> Option<Slot> {
    let start = first_position(cells)?;
    if start.line(axis) != position.line(axis) {
        return None;
    }
    let offset = i16::from(position.along(axis)) - i16::from(start.along(axis));
    let len = cells.len() as i16;
    if offset == -1 {
        Some(Slot::Prepend)
    } else if offset == len {
        Some(Slot::Append)
    } else if (0..len).contains(&offset) && cells[offset as usize].is_none() {
        Some(Slot::Gap(offset as usize))
    } else {
        None
    }
}

/// Extend both ends over adjacent committed tiles.
fn absorb(cells: &mut Cells, axis: Axis, board: &Board) {
    while let Some(tile) = first_position(cells)
        .and_then(|p| p.step(axis, -1))
        .and_then(|p| board.get(p))
    {
        cells.insert(0, Some(tile.clone()));
    }
    while let Some(tile) = last_position(cells)
        .and_then(|p| p.step(axis, 1))
        .and_then(|p| board.get(p))
    {
        cells.push(Some(tile.clone()));
    }
}

/// Cut each end back to the committed run touching the outermost pending tile.
///
/// Leading and trailing gaps go, as do committed tiles only reachable across a gap.
/// A list left without pending tiles is cleared.
fn trim(cells: &mut Cells) {
    let is_pending = |cell: &Option<Tile>| cell.as_ref().is_some_and(|t| !t.committed);
    let Some(first) = cells.iter().position(is_pending) else {
        cells.clear();
        return;
    };
    let last = cells.iter().rposition(is_pending).unwrap_or(first);

    let mut end = last;
    while end + 1 < cells.len() && cells[end + 1].is_some() {
        end += 1;
    }
    let mut begin = first;
    while begin > 0 && cells[begin - 1].is_some() {
        begin -= 1;
    }
    cells.truncate(end + 1);
    cells.drain(..begin);
}
