use std::collections::BTreeMap;

use lexigrid_protocol::{Position, Tile, TileId};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("square {0} already holds a committed tile")]
    Occupied(Position),
    #[error("tile {0:?} has no board position")]
    Unplaced(TileId),
}

/// Committed tiles, keyed by square. Committed tiles are permanent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Board {
    committed: BTreeMap<Position, Tile>,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, position: Position) -> Option<&Tile> {
        self.committed.get(&position)
    }

    pub fn is_committed(&self, position: Position) -> bool {
        self.committed.contains_key(&position)
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    pub fn tiles(&self) -> impl Iterator<Item = (&Position, &Tile)> {
        self.committed.iter()
    }

    /// Make placed tiles permanent. All-or-nothing.
    pub fn commit(&mut self, tiles: impl IntoIterator<Item = Tile>) -> Result<(), BoardError> {
        let tiles: Vec<Tile> = tiles.into_iter().collect();
        let mut seen = Vec::with_capacity(tiles.len());
        for tile in &tiles {
            let position = tile.position.ok_or(BoardError::Unplaced(tile.id))?;
            if self.is_committed(position) || seen.contains(&position) {
                return Err(BoardError::Occupied(position));
            }
            seen.push(position);
        }

        for (mut tile, position) in tiles.into_iter().zip(seen) {
            tile.committed = true;
            self.committed.insert(position, tile);
        }
        Ok(())
    }
}
