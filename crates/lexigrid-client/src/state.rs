use std::collections::BTreeMap;

use lexigrid_core::{Board, BoardError, PendingWord, Rack, RackError};
use lexigrid_protocol::{ParticipantId, Position, Tile};
use tracing::warn;

/// Everything a participant can lose to a rollback.
///
/// Plain owned data: cloning it is a full, unaliased snapshot. The participant's own
/// uncommitted tiles live in `pending`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayState {
    pub pending: PendingWord,
    pub rack: Rack,
    pub board: Board,
    /// Peers' speculative tiles, by square.
    pub opponent_uncommitted: BTreeMap<Position, (ParticipantId, Tile)>,
    pub my_turn: bool,
    pub turn_number: u32,
}

impl PlayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any tile, committed or not, sits on `position`.
    pub fn is_occupied(&self, position: Position) -> bool {
        self.board.is_committed(position)
            || self.pending.contains(position)
            || self.opponent_uncommitted.contains_key(&position)
    }

    pub fn peer_placed(&mut self, from: ParticipantId, tile: Tile, position: Position) {
        self.opponent_uncommitted
            .insert(position, (from, tile.placed_at(position)));
    }

    /// Drop `from`'s speculative tile on `position`. Returns false if it was not there.
    pub fn peer_removed(&mut self, from: ParticipantId, position: Position) -> bool {
        match self.opponent_uncommitted.get(&position) {
            Some((owner, _)) if *owner == from => {
                self.opponent_uncommitted.remove(&position);
                true
            }
            _ => false,
        }
    }

    /// Drop every speculative tile of `from`.
    pub fn clear_peer(&mut self, from: ParticipantId) {
        self.opponent_uncommitted.retain(|_, (owner, _)| *owner != from);
    }

    /// Own word accepted: pending tiles leave the word, `placed` joins the board.
    pub fn commit_own(&mut self, placed: Vec<Tile>) -> Result<(), BoardError> {
        self.pending.take_pending();
        self.board.commit(placed)
    }

    /// A peer's word accepted: its speculative tiles become committed ones.
    pub fn commit_peer(&mut self, from: ParticipantId, placed: Vec<Tile>) -> Result<(), BoardError> {
        self.clear_peer(from);
        self.board.commit(placed)
    }

    /// Put every own pending tile back on the rack.
    ///
    /// Fails if the rack has no room left, which means a tile was dealt twice.
    pub fn withdraw_pending(&mut self) -> Result<usize, RackError> {
        let tiles = self.pending.take_pending();
        let count = tiles.len();
        for tile in tiles {
            let id = tile.id;
            if let Err(err) = self.rack.put_back(tile) {
                warn!(tile = ?id, %err, "No rack slot for a withdrawn tile");
                return Err(err);
            }
        }
        Ok(count)
    }
}
