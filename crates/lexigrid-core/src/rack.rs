use lexigrid_protocol::{Tile, TileId, RACK_SIZE};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RackError {
    #[error("rack slot {0} does not exist")]
    NoSuchSlot(usize),
    #[error("rack has {free} free slots, {needed} needed")]
    Full { free: usize, needed: usize },
}

/// Seven ordered tile slots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rack {
    slots: [Option<Tile>; RACK_SIZE],
}

impl Rack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: usize) -> Option<&Tile> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Take the tile out of `slot`, leaving it empty.
    pub fn take(&mut self, slot: usize) -> Result<Option<Tile>, RackError> {
        let cell = self.slots.get_mut(slot).ok_or(RackError::NoSuchSlot(slot))?;
        Ok(cell.take())
    }

    pub fn free_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    pub fn len(&self) -> usize {
        RACK_SIZE - self.free_slots()
    }

    pub fn is_empty(&self) -> bool {
        self.free_slots() == RACK_SIZE
    }

    pub fn contains(&self, id: TileId) -> bool {
        self.tiles().any(|t| t.id == id)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.slots.iter().flatten()
    }

    /// Put freshly drawn tiles into empty slots, left to right.
    ///
    /// Each tile remembers the slot it was dealt into. All-or-nothing.
    pub fn fill(&mut self, tiles: Vec<Tile>) -> Result<(), RackError> {
        let free = self.free_slots();
        if tiles.len() > free {
            return Err(RackError::Full {
                free,
                needed: tiles.len(),
            });
        }

        let mut empty = self
            .slots
            .iter_mut()
            .enumerate()
            .filter(|(_, s)| s.is_none());
        for mut tile in tiles {
            let Some((index, slot)) = empty.next() else {
                break;
            };
            tile.origin_slot = index as u8;
            tile.position = None;
            tile.committed = false;
            *slot = Some(tile);
        }
        Ok(())
    }

    /// Return a tile taken back off the board, preferring its origin slot.
    ///
    /// Returns the slot it landed in.
    pub fn put_back(&mut self, mut tile: Tile) -> Result<usize, RackError> {
        tile.position = None;
        let origin = tile.origin_slot as usize;
        let slot = match self.slots.get(origin) {
            Some(None) => origin,
            _ => self
                .slots
                .iter()
                .position(Option::is_none)
                .ok_or(RackError::Full { free: 0, needed: 1 })?,
        };
        self.slots[slot] = Some(tile);
        Ok(slot)
    }
}
