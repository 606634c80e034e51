use std::collections::BTreeSet;

use lexigrid_protocol::ParticipantId;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum TurnRingError {
    #[error("turn ring has no participants")]
    Empty,
}

/// Rotating turn order.
///
/// Owned by the coordinator; clients never move the pointer. Departed participants
/// stay in the order until the next [`TurnRing::advance`], which drops them.
#[derive(Clone, Debug)]
pub struct TurnRing {
    order: Vec<ParticipantId>,
    idx: usize,
    turn_number: u32,
    departed: BTreeSet<ParticipantId>,
}

impl TurnRing {
    /// Ring in the given order, first participant to move. Turn numbers start at 1.
    pub fn new(order: Vec<ParticipantId>) -> Result<Self, TurnRingError> {
        if order.is_empty() {
            return Err(TurnRingError::Empty);
        }
        Ok(Self {
            order,
            idx: 0,
            turn_number: 1,
            departed: BTreeSet::new(),
        })
    }

    pub fn current(&self) -> ParticipantId {
        self.order[self.idx]
    }

    pub fn turn_number(&self) -> u32 {
        self.turn_number
    }

    /// Participants still in the order, departed ones included until the next advance.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Participants that have not departed.
    pub fn active(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.order
            .iter()
            .copied()
            .filter(|id| !self.departed.contains(id))
    }

    pub fn position_of(&self, id: ParticipantId) -> Option<usize> {
        self.order.iter().position(|p| *p == id)
    }

    pub fn is_current(&self, id: ParticipantId) -> bool {
        self.current() == id && !self.departed.contains(&id)
    }

    /// Mark `id` as gone. Returns false if it was never in the ring or already departed.
    pub fn depart(&mut self, id: ParticipantId) -> bool {
        self.position_of(id).is_some() && self.departed.insert(id)
    }

    /// Move to the next remaining participant and bump the turn number.
    ///
    /// Departed participants are removed from the order here.
    pub fn advance(&mut self) -> Result<ParticipantId, TurnRingError> {
        let len = self.order.len();
        let next = (1..=len)
            .map(|step| self.order[(self.idx + step) % len])
            .find(|id| !self.departed.contains(id))
            .ok_or(TurnRingError::Empty)?;

        let departed = std::mem::take(&mut self.departed);
        self.order.retain(|id| !departed.contains(id));
        self.idx = self.position_of(next).unwrap_or(0);
        self.turn_number += 1;
        Ok(next)
    }

    /// Whether a client's claimed turn number matches the authoritative one.
    pub fn validate_correction(&self, claimed_turn: u32) -> bool {
        claimed_turn == self.turn_number
    }
}
