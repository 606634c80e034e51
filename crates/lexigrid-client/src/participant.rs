//! Rollback protocol.
//!
//! The participant applies its own moves before the coordinator has seen them. When
//! the coordinator rejects a submission, the participant restores the latest
//! checkpoint not after the rejected action, retracts everything it sent since, and
//! asks the coordinator to confirm the turn. When a peer retracts messages, the
//! participant forgets them, rolls back past the earliest one, retracts its own later
//! sends (the cascade) and replays the peer traffic that still stands.

use lexigrid_core::{BoardError, PlacementError, RackError, RemovalError, SubmissionError};
use lexigrid_protocol::{
    ClientMessage, JoinRejectReason, ParticipantId, Position, RejectReason, ServerMessage,
    Timestamp,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    CheckpointError, CheckpointManager, LocalClock, LogEntry, ParticipantConfig, PlayState,
};

/// Rendering surface. Gets the whole state after every change; keeps none of its own.
pub trait BoardView {
    fn render(&mut self, state: &PlayState);
}

/// View that draws nothing (headless participants, tests).
#[derive(Clone, Copy, Debug, Default)]
pub struct NullView;

impl BoardView for NullView {
    fn render(&mut self, _state: &PlayState) {}
}

#[derive(Debug, Error, PartialEq)]
pub enum ClientError {
    #[error("session has not started")]
    NotStarted,
    #[error("session is closed")]
    SessionClosed,
    #[error("not this participant's turn")]
    OutOfTurn,
    #[error("rack slot {0} is empty")]
    EmptySlot(usize),
    #[error("square {0} is occupied")]
    PositionOccupied(Position),
    #[error("square {0} does not extend the pending word")]
    NotAligned(Position),
    #[error("tile at {0} is committed")]
    Committed(Position),
    #[error("no own pending tile at {0}")]
    NotPending(Position),
    #[error("pending word has a gap")]
    Incomplete,
    #[error("nothing to submit")]
    Empty,
    #[error("rack is full")]
    RackFull,
    #[error("cannot draw while a word is pending")]
    PendingWord,
    #[error("bag exhausted: {remaining} tiles remaining")]
    BagExhausted { remaining: u32 },
    #[error("rack holds at most {capacity} tiles")]
    RackOverflow { capacity: u8 },
    #[error("draw rejected: {0}")]
    DrawRejected(RejectReason),
    #[error("join rejected: {0:?}")]
    JoinRejected(JoinRejectReason),
    #[error(transparent)]
    Rack(#[from] RackError),
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl From<PlacementError> for ClientError {
    fn from(err: PlacementError) -> Self {
        match err {
            PlacementError::Occupied(position) => ClientError::PositionOccupied(position),
            PlacementError::NotAligned(position) => ClientError::NotAligned(position),
        }
    }
}

impl From<RemovalError> for ClientError {
    fn from(err: RemovalError) -> Self {
        match err {
            RemovalError::Committed(position) => ClientError::Committed(position),
            RemovalError::NotPending(position) => ClientError::NotPending(position),
        }
    }
}

impl From<SubmissionError> for ClientError {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::Incomplete => ClientError::Incomplete,
            SubmissionError::Empty => ClientError::Empty,
        }
    }
}

/// What handling a peer's retraction did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetractionOutcome {
    pub from: ParticipantId,
    /// Received log entries that were dropped.
    pub matched: usize,
    /// Checkpoint restored, or `None` when the retraction was undone in place.
    pub restored_to: Option<Timestamp>,
    /// Surviving peer messages re-applied after the restore.
    pub replayed: usize,
    /// Own messages retracted in turn.
    pub cascaded: usize,
    /// Later checkpoints had to be discarded (cascading retraction conflict).
    pub conflict: bool,
}

/// One participant's local play.
pub struct Participant<V: BoardView = NullView> {
    id: Option<ParticipantId>,
    participants: Vec<ParticipantId>,
    state: PlayState,
    clock: LocalClock,
    checkpoints: CheckpointManager,
    view: V,
    started: bool,
    closed: bool,
    last_retraction: Option<RetractionOutcome>,
}

impl<V: BoardView> Participant<V> {
    pub fn new(config: &ParticipantConfig, view: V) -> Self {
        let mut participant = Self {
            id: None,
            participants: Vec::new(),
            state: PlayState::new(),
            clock: LocalClock::new(),
            checkpoints: CheckpointManager::new(config),
            view,
            started: false,
            closed: false,
            last_retraction: None,
        };
        participant
            .checkpoints
            .checkpoint(&participant.state, &mut participant.clock);
        participant
    }

    pub fn id(&self) -> Option<ParticipantId> {
        self.id
    }

    pub fn participants(&self) -> &[ParticipantId] {
        &self.participants
    }

    pub fn state(&self) -> &PlayState {
        &self.state
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn last_retraction(&self) -> Option<&RetractionOutcome> {
        self.last_retraction.as_ref()
    }

    pub fn join(&mut self, name: impl Into<String>) -> ClientMessage {
        let name = name.into();
        self.stamp(|_| ClientMessage::Join { name })
    }

    /// Heartbeat; not logged.
    pub fn ping(&self, now_millis: u64) -> ClientMessage {
        ClientMessage::Ping {
            timestamp: now_millis,
        }
    }

    /// Move the tile in rack `slot` onto `position`.
    pub fn place(&mut self, slot: usize, position: Position) -> Result<ClientMessage, ClientError> {
        self.ensure_turn()?;
        let tile = self
            .state
            .rack
            .get(slot)
            .cloned()
            .ok_or(ClientError::EmptySlot(slot))?;
        if self.state.opponent_uncommitted.contains_key(&position) {
            return Err(ClientError::PositionOccupied(position));
        }

        self.state
            .pending
            .place(tile.clone(), position, &self.state.board)?;
        self.state.rack.take(slot)?;

        let tile = tile.placed_at(position);
        let message = self.stamp(|sent_at| ClientMessage::Placement {
            tile,
            position,
            sent_at,
        });
        self.render();
        Ok(message)
    }

    /// Take an own pending tile back to the rack.
    pub fn remove(&mut self, position: Position) -> Result<ClientMessage, ClientError> {
        self.ensure_turn()?;
        let tile = self.state.pending.remove(position, &self.state.board)?;
        self.state.rack.put_back(tile.clone())?;

        let message = self.stamp(|sent_at| ClientMessage::Removal {
            tile,
            position,
            sent_at,
        });
        self.render();
        Ok(message)
    }

    pub fn submit(&mut self) -> Result<ClientMessage, ClientError> {
        self.ensure_turn()?;
        let words = self.state.pending.words()?;
        Ok(self.stamp(|sent_at| ClientMessage::Submission { words, sent_at }))
    }

    /// Ask for enough tiles to fill the rack.
    pub fn request_tiles(&mut self) -> Result<ClientMessage, ClientError> {
        self.ensure_active()?;
        if !self.state.pending.is_empty() {
            return Err(ClientError::PendingWord);
        }
        let free = self.state.rack.free_slots();
        if free == 0 {
            return Err(ClientError::RackFull);
        }
        let count = free as u8;
        Ok(self.stamp(|sent_at| ClientMessage::DrawTiles { count, sent_at }))
    }

    /// Restore the latest checkpoint at or before `before`.
    ///
    /// Returns the retraction of everything sent since (if anything retractable was)
    /// followed by a turn correction request.
    pub fn rollback(&mut self, before: Timestamp) -> Result<Vec<ClientMessage>, ClientError> {
        let rewind = self.checkpoints.rollback(before)?;
        self.state = rewind.state;
        self.replay(rewind.unreceived);
        self.render();

        let retract: Vec<ClientMessage> = rewind
            .unsent
            .into_iter()
            .map(|entry| entry.payload)
            .filter(is_retractable)
            .collect();

        let mut outgoing = Vec::with_capacity(2);
        if !retract.is_empty() {
            debug!(count = retract.len(), "Retracting own messages");
            outgoing.push(self.stamp(|_| ClientMessage::Retract { messages: retract }));
        }
        outgoing.push(self.turn_correction());
        Ok(outgoing)
    }

    /// Handle a message from the coordinator.
    ///
    /// Returns the messages to send in response. Refused draws surface as errors once
    /// the refusal has been logged.
    pub fn receive(&mut self, message: ServerMessage) -> Result<Vec<ClientMessage>, ClientError> {
        if let ServerMessage::Pong {
            client_timestamp,
            server_timestamp,
        } = message
        {
            debug!(client_timestamp, server_timestamp, "Pong");
            return Ok(Vec::new());
        }

        self.checkpoints.before_receive(&self.state, &mut self.clock);
        let received_at = self.clock.tick();
        let applied = self.apply(&message, received_at);
        let commit = message.is_commit() && applied.is_ok();
        let refill = matches!(message, ServerMessage::WordsAccepted { .. });
        self.checkpoints.record_received(message, received_at);

        let mut outgoing = applied?;
        if commit {
            self.checkpoints.barrier(&self.state, &mut self.clock);
            if refill && self.state.rack.free_slots() > 0 {
                outgoing.push(self.request_tiles()?);
            }
        } else {
            self.checkpoints.after_event(&self.state, &mut self.clock);
        }
        self.render();
        Ok(outgoing)
    }

    fn apply(
        &mut self,
        message: &ServerMessage,
        received_at: Timestamp,
    ) -> Result<Vec<ClientMessage>, ClientError> {
        match message {
            ServerMessage::JoinAccepted { participant } => {
                info!(participant = %participant, "Joined session");
                self.id = Some(*participant);
            }
            ServerMessage::JoinRejected { reason } => {
                warn!(?reason, "Join rejected");
                return Err(ClientError::JoinRejected(*reason));
            }
            ServerMessage::SessionStarted {
                participants,
                checkpoint_policy,
            } => {
                info!(players = participants.len(), ?checkpoint_policy, "Session started");
                self.participants = participants.clone();
                self.started = true;
                self.checkpoints.set_policy(*checkpoint_policy);
            }
            ServerMessage::TilesDrawn { tiles } => {
                self.state.rack.fill(tiles.clone())?;
            }
            ServerMessage::DrawRejected { requested, reason } => {
                warn!(requested, %reason, "Draw rejected");
                return Err(match reason {
                    RejectReason::BagExhausted { remaining } => ClientError::BagExhausted {
                        remaining: *remaining,
                    },
                    RejectReason::RackOverflow { capacity } => ClientError::RackOverflow {
                        capacity: *capacity,
                    },
                    other => ClientError::DrawRejected(other.clone()),
                });
            }
            ServerMessage::PeerPlacement { .. }
            | ServerMessage::PeerRemoval { .. }
            | ServerMessage::ParticipantLeft { .. } => {
                self.apply_peer(message);
            }
            ServerMessage::WordsAccepted { words, placed } => {
                info!(?words, "Words accepted");
                self.state.commit_own(placed.clone())?;
            }
            ServerMessage::OpponentWordsAccepted {
                from,
                words,
                placed,
            } => {
                debug!(from = %from, ?words, "Opponent words accepted");
                self.state.commit_peer(*from, placed.clone())?;
            }
            ServerMessage::StartTurn { turn_number } => {
                self.state.my_turn = true;
                self.state.turn_number = *turn_number;
            }
            ServerMessage::EndTurn { turn_number } => {
                self.state.my_turn = false;
                self.state.turn_number = *turn_number;
            }
            ServerMessage::TurnSync {
                current,
                turn_number,
            } => {
                self.state.my_turn = self.id == Some(*current);
                self.state.turn_number = *turn_number;
            }
            ServerMessage::Rejected { before, reason } => {
                warn!(%before, %reason, "Action rejected, rolling back");
                return self.on_rejected(*before);
            }
            ServerMessage::PeerRetracted { from, messages } => {
                return self.on_peer_retracted(*from, messages, received_at);
            }
            ServerMessage::SessionClosed => {
                info!("Session closed");
                self.closed = true;
                self.state.my_turn = false;
            }
            ServerMessage::Pong { .. } => {}
        }
        Ok(Vec::new())
    }

    fn on_rejected(&mut self, before: Timestamp) -> Result<Vec<ClientMessage>, ClientError> {
        match self.rollback(before) {
            Err(ClientError::Checkpoint(CheckpointError::NoCheckpoint { .. })) => {
                // The whole pending word is withdrawn, so every send that built it since
                // the last barrier is retracted, not only those after `before`.
                warn!(%before, "No checkpoint to restore, withdrawing pending word");
                let retract: Vec<ClientMessage> = self
                    .checkpoints
                    .log_mut()
                    .take_sent_where(is_retractable)
                    .into_iter()
                    .map(|entry| entry.payload)
                    .collect();
                self.state.withdraw_pending()?;
                self.checkpoints.checkpoint(&self.state, &mut self.clock);
                self.render();

                let mut outgoing = Vec::with_capacity(2);
                if !retract.is_empty() {
                    outgoing.push(self.stamp(|_| ClientMessage::Retract { messages: retract }));
                }
                outgoing.push(self.turn_correction());
                Ok(outgoing)
            }
            other => other,
        }
    }

    fn on_peer_retracted(
        &mut self,
        from: ParticipantId,
        messages: &[ClientMessage],
        received_at: Timestamp,
    ) -> Result<Vec<ClientMessage>, ClientError> {
        let stamps: Vec<Timestamp> = messages
            .iter()
            .filter(|m| is_relayed(m))
            .filter_map(ClientMessage::sent_at)
            .collect();
        let matched = self
            .checkpoints
            .log_mut()
            .take_received_from(from, &stamps);
        let matched_stamps: Vec<Timestamp> = matched
            .iter()
            .filter_map(|entry| crate::peer_origin(&entry.payload).map(|(_, stamp)| stamp))
            .collect();

        let mut outcome = RetractionOutcome {
            from,
            matched: matched.len(),
            restored_to: None,
            replayed: 0,
            cascaded: 0,
            conflict: false,
        };
        let mut outgoing = Vec::new();

        let rewind = matched
            .first()
            .and_then(|earliest| self.checkpoints.rollback_preceding(earliest.timestamp).ok());

        match rewind {
            Some(rewind) => {
                outcome.restored_to = Some(rewind.timestamp);
                outcome.conflict = rewind.discarded > 0;
                self.state = rewind.state;
                outcome.replayed = self.replay(rewind.unreceived);

                // Retracted messages received before the restored checkpoint.
                for message in messages.iter().rev() {
                    if message.sent_at().is_some_and(|s| !matched_stamps.contains(&s)) {
                        self.compensate(from, message);
                    }
                }

                let cascade: Vec<ClientMessage> = rewind
                    .unsent
                    .into_iter()
                    .map(|entry| entry.payload)
                    .filter(is_retractable)
                    .collect();
                outcome.cascaded = cascade.len();
                if !cascade.is_empty() {
                    outgoing.push(self.stamp(|_| ClientMessage::Retract { messages: cascade }));
                }

                if outcome.conflict {
                    warn!(
                        from = %from,
                        restored_to = %rewind.timestamp,
                        discarded = rewind.discarded,
                        "Cascading retraction conflict"
                    );
                }
            }
            None => {
                for message in messages.iter().rev() {
                    self.compensate(from, message);
                }
                self.checkpoints.checkpoint(&self.state, &mut self.clock);
            }
        }

        debug!(
            from = %from,
            %received_at,
            matched = outcome.matched,
            replayed = outcome.replayed,
            cascaded = outcome.cascaded,
            "Peer retraction handled"
        );
        self.last_retraction = Some(outcome);
        Ok(outgoing)
    }

    /// Apply a peer's speculative traffic. Returns false for anything else.
    fn apply_peer(&mut self, message: &ServerMessage) -> bool {
        match message {
            ServerMessage::PeerPlacement {
                from,
                tile,
                position,
                ..
            } => {
                if self.id == Some(*from) {
                    return false;
                }
                self.state.peer_placed(*from, tile.clone(), *position);
                true
            }
            ServerMessage::PeerRemoval { from, position, .. } => {
                self.state.peer_removed(*from, *position);
                true
            }
            ServerMessage::ParticipantLeft { participant } => {
                info!(participant = %participant, "Participant left");
                self.state.clear_peer(*participant);
                self.participants.retain(|p| p != participant);
                true
            }
            _ => false,
        }
    }

    /// Re-apply received entries that survived a rollback, putting them back in the log.
    fn replay(&mut self, entries: Vec<LogEntry<ServerMessage>>) -> usize {
        let mut replayed = 0;
        for entry in entries {
            if self.apply_peer(&entry.payload) {
                replayed += 1;
            }
            self.checkpoints.log_mut().restore_received(entry);
        }
        replayed
    }

    /// Undo one retracted peer message directly on the live state.
    fn compensate(&mut self, from: ParticipantId, message: &ClientMessage) {
        match message {
            ClientMessage::Placement { tile, position, .. } => {
                let placed_here = self
                    .state
                    .opponent_uncommitted
                    .get(position)
                    .is_some_and(|(owner, t)| *owner == from && t.id == tile.id);
                if placed_here {
                    self.state.opponent_uncommitted.remove(position);
                }
            }
            ClientMessage::Removal { tile, position, .. } => {
                if !self.state.is_occupied(*position) {
                    self.state.peer_placed(from, tile.clone(), *position);
                }
            }
            _ => {}
        }
    }

    fn turn_correction(&mut self) -> ClientMessage {
        let turn_number = self.state.turn_number;
        self.stamp(|sent_at| ClientMessage::TurnCorrection {
            turn_number,
            sent_at,
        })
    }

    /// Stamp an outgoing message with a fresh tick and log it.
    fn stamp(&mut self, build: impl FnOnce(Timestamp) -> ClientMessage) -> ClientMessage {
        let sent_at = self.clock.tick();
        let message = build(sent_at);
        self.checkpoints.record_sent(message.clone(), sent_at);
        self.checkpoints.after_event(&self.state, &mut self.clock);
        message
    }

    fn ensure_active(&self) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::SessionClosed);
        }
        if !self.started {
            return Err(ClientError::NotStarted);
        }
        Ok(())
    }

    fn ensure_turn(&self) -> Result<(), ClientError> {
        self.ensure_active()?;
        if !self.state.my_turn {
            return Err(ClientError::OutOfTurn);
        }
        Ok(())
    }

    fn render(&mut self) {
        self.view.render(&self.state);
    }
}

/// Messages whose effects a retraction can undo.
fn is_retractable(message: &ClientMessage) -> bool {
    matches!(
        message,
        ClientMessage::Placement { .. }
            | ClientMessage::Removal { .. }
            | ClientMessage::Submission { .. }
    )
}

/// Messages the coordinator relays to peers.
fn is_relayed(message: &ClientMessage) -> bool {
    matches!(
        message,
        ClientMessage::Placement { .. } | ClientMessage::Removal { .. }
    )
}

#[cfg(test)]
mod tests {
    use lexigrid_protocol::{CheckpointPolicy, Letter, MessageLabel, Tile, TileId};

    use super::*;

    /// Counts renders.
    #[derive(Default)]
    struct CountingView {
        renders: usize,
    }

    impl BoardView for CountingView {
        fn render(&mut self, _state: &PlayState) {
            self.renders += 1;
        }
    }

    fn pos(row: u8, col: u8) -> Position {
        Position::new(row, col).unwrap()
    }

    fn tiles(letters: &str, first_id: u32) -> Vec<Tile> {
        letters
            .chars()
            .enumerate()
            .map(|(i, c)| Tile::new(TileId(first_id + i as u32), Letter::from_char(c).unwrap()))
            .collect()
    }

    /// Participant 0 of two, session started, rack dealt, holding the first turn.
    fn started(letters: &str) -> Participant<CountingView> {
        let mut p = Participant::new(&ParticipantConfig::default(), CountingView::default());
        p.join("ann");
        p.receive(ServerMessage::JoinAccepted {
            participant: ParticipantId(0),
        })
        .unwrap();
        p.receive(ServerMessage::SessionStarted {
            participants: vec![ParticipantId(0), ParticipantId(1)],
            checkpoint_policy: CheckpointPolicy::MarkSendReceive,
        })
        .unwrap();
        p.request_tiles().unwrap();
        p.receive(ServerMessage::TilesDrawn {
            tiles: tiles(letters, 0),
        })
        .unwrap();
        p
    }

    fn my_turn(letters: &str) -> Participant<CountingView> {
        let mut p = started(letters);
        p.receive(ServerMessage::StartTurn { turn_number: 1 }).unwrap();
        p
    }

    #[test]
    fn local_validation_precedes_sending() {
        let mut p = started("CAT");
        let sent_before = p.checkpoints().log().sent().len();
        assert_eq!(p.place(0, pos(7, 7)), Err(ClientError::OutOfTurn));

        p.receive(ServerMessage::StartTurn { turn_number: 1 }).unwrap();
        assert_eq!(p.place(5, pos(7, 7)), Err(ClientError::EmptySlot(5)));
        assert_eq!(p.submit(), Err(ClientError::Empty));

        p.place(0, pos(7, 7)).unwrap();
        assert_eq!(p.place(1, pos(7, 7)), Err(ClientError::PositionOccupied(pos(7, 7))));
        assert_eq!(p.place(1, pos(9, 9)), Err(ClientError::NotAligned(pos(9, 9))));
        assert_eq!(p.request_tiles(), Err(ClientError::PendingWord));
        assert_eq!(p.checkpoints().log().sent().len(), sent_before + 1);
    }

    #[test]
    fn placements_are_stamped_and_logged() {
        let mut p = my_turn("CAT");
        let before = p.now();
        let message = p.place(0, pos(7, 7)).unwrap();
        match &message {
            ClientMessage::Placement { sent_at, tile, .. } => {
                assert!(*sent_at > before);
                assert_eq!(tile.position, Some(pos(7, 7)));
            }
            other => panic!("Wrong message type: {other:?}"),
        }
        assert_eq!(p.checkpoints().log().sent().last().unwrap().payload, message);
        assert_eq!(p.state().rack.len(), 2);
        assert!(p.view().renders > 0);
    }

    #[test]
    fn accepted_words_commit_and_refill() {
        let mut p = my_turn("CAT");
        for (slot, col) in [(0, 7), (1, 8), (2, 9)] {
            p.place(slot, pos(7, col)).unwrap();
        }
        assert!(matches!(p.submit().unwrap(), ClientMessage::Submission { ref words, .. } if words == &["cat"]));

        let placed: Vec<Tile> = p.state().pending.pending_tiles().cloned().collect();
        let out = p
            .receive(ServerMessage::WordsAccepted {
                words: vec!["cat".into()],
                placed,
            })
            .unwrap();
        assert!(matches!(out.as_slice(), [ClientMessage::DrawTiles { count: 7, .. }]));
        assert!(p.state().pending.is_empty());
        assert!(p.state().board.is_committed(pos(7, 8)));

        // Committed tiles are not removable.
        assert_eq!(p.remove(pos(7, 8)), Err(ClientError::Committed(pos(7, 8))));

        p.receive(ServerMessage::EndTurn { turn_number: 1 }).unwrap();
        assert!(!p.state().my_turn);
        assert_eq!(p.checkpoints().len(), 1);
    }

    #[test]
    fn rejection_restores_checkpoint_and_retracts() {
        let mut p = my_turn("XQZ");
        let turn_start = p.state().clone();
        let first = p.place(0, pos(7, 7)).unwrap();
        p.place(1, pos(7, 8)).unwrap();
        p.place(2, pos(7, 9)).unwrap();
        p.submit().unwrap();

        let before = first.sent_at().unwrap();
        let out = p
            .receive(ServerMessage::Rejected {
                before,
                reason: RejectReason::InvalidWord { word: "xqz".into() },
            })
            .unwrap();

        assert_eq!(p.state(), &turn_start);
        assert!(p.state().my_turn);
        match out.as_slice() {
            [ClientMessage::Retract { messages }, ClientMessage::TurnCorrection { turn_number: 1, .. }] => {
                assert_eq!(messages.len(), 4);
                assert_eq!(messages[0], first);
            }
            other => panic!("Unexpected response: {other:?}"),
        }

        p.receive(ServerMessage::TurnSync {
            current: ParticipantId(0),
            turn_number: 1,
        })
        .unwrap();
        assert!(p.state().my_turn);
    }

    #[test]
    fn rollback_twice_is_idempotent() {
        let mut p = my_turn("HI");
        p.place(0, pos(0, 0)).unwrap();
        let stamp = p.now();
        p.receive(ServerMessage::PeerRemoval {
            from: ParticipantId(1),
            tile: tiles("Z", 50).remove(0),
            position: pos(5, 5),
            sent_at: Timestamp(3),
        })
        .unwrap();
        p.place(1, pos(0, 1)).unwrap();

        p.rollback(stamp).unwrap();
        let once = p.state().clone();
        let out = p.rollback(stamp).unwrap();
        assert_eq!(p.state(), &once);
        // Nothing left to retract the second time round.
        assert!(matches!(out.as_slice(), [ClientMessage::TurnCorrection { .. }]));
    }

    #[test]
    fn refused_draw_surfaces_after_logging() {
        let mut p = started("AB");
        let err = p
            .receive(ServerMessage::DrawRejected {
                requested: 5,
                reason: RejectReason::BagExhausted { remaining: 2 },
            })
            .unwrap_err();
        assert_eq!(err, ClientError::BagExhausted { remaining: 2 });
        assert_eq!(
            p.checkpoints().log().received().last().unwrap().label,
            lexigrid_protocol::MessageLabel::DrawRejected
        );
    }

    fn peer_placement(col: u8, id: u32, sent_at: u64) -> ServerMessage {
        ServerMessage::PeerPlacement {
            from: ParticipantId(1),
            tile: tiles("E", id).remove(0).placed_at(pos(3, col)),
            position: pos(3, col),
            sent_at: Timestamp(sent_at),
        }
    }

    fn placement(col: u8, id: u32, sent_at: u64) -> ClientMessage {
        ClientMessage::Placement {
            tile: tiles("E", id).remove(0).placed_at(pos(3, col)),
            position: pos(3, col),
            sent_at: Timestamp(sent_at),
        }
    }

    #[test]
    fn peer_retraction_rolls_back_to_preceding_checkpoint() {
        let mut p = started("AB");
        let checkpoint = p.checkpoints().latest().unwrap().timestamp;

        p.receive(peer_placement(3, 40, 5)).unwrap();
        p.receive(peer_placement(4, 41, 6)).unwrap();
        assert_eq!(p.state().opponent_uncommitted.len(), 2);

        let out = p
            .receive(ServerMessage::PeerRetracted {
                from: ParticipantId(1),
                messages: vec![placement(3, 40, 5), placement(4, 41, 6)],
            })
            .unwrap();

        assert!(out.is_empty());
        assert!(p.state().opponent_uncommitted.is_empty());
        assert!(p
            .checkpoints()
            .log()
            .received()
            .iter()
            .all(|e| crate::peer_origin(&e.payload).is_none()));
        let outcome = p.last_retraction().unwrap();
        assert_eq!(outcome.matched, 2);
        assert_eq!(outcome.restored_to, Some(checkpoint));
        assert!(!outcome.conflict);
    }

    #[test]
    fn peer_retraction_replays_survivors_and_cascades() {
        let mut p = started("AB");
        let o = tiles("O", 60).remove(0).placed_at(pos(9, 9));
        p.receive(peer_placement(3, 40, 5)).unwrap();
        p.receive(ServerMessage::PeerPlacement {
            from: ParticipantId(2),
            tile: o.clone(),
            position: pos(9, 9),
            sent_at: Timestamp(2),
        })
        .unwrap();
        p.receive(ServerMessage::TurnSync {
            current: ParticipantId(0),
            turn_number: 2,
        })
        .unwrap();
        p.receive(peer_placement(5, 42, 7)).unwrap();
        // Own move made while the soon-retracted tile is visible.
        let own = p.place(0, pos(3, 4)).unwrap();
        p.receive(ServerMessage::PeerRemoval {
            from: ParticipantId(2),
            tile: o,
            position: pos(9, 9),
            sent_at: Timestamp(3),
        })
        .unwrap();

        let out = p
            .receive(ServerMessage::PeerRetracted {
                from: ParticipantId(1),
                messages: vec![placement(5, 42, 7)],
            })
            .unwrap();

        let outcome = p.last_retraction().unwrap().clone();
        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.replayed, 1);
        assert_eq!(outcome.cascaded, 1);
        assert!(outcome.conflict);
        assert!(matches!(
            out.as_slice(),
            [ClientMessage::Retract { messages }] if messages.as_slice() == std::slice::from_ref(&own)
        ));
        // Own placement undone by the restore, peer removal replayed on top.
        assert!(p.state().pending.is_empty());
        assert_eq!(p.state().rack.len(), 2);
        let remaining: Vec<_> = p.state().opponent_uncommitted.keys().copied().collect();
        assert_eq!(remaining, vec![pos(3, 3)]);
    }

    #[test]
    fn retraction_of_purged_messages_compensates_in_place() {
        let mut p = started("AB");
        p.receive(peer_placement(3, 40, 5)).unwrap();
        // A barrier purges the received placement from the log.
        p.receive(ServerMessage::EndTurn { turn_number: 1 }).unwrap();
        assert_eq!(p.state().opponent_uncommitted.len(), 1);
        let checkpoints = p.checkpoints().len();

        p.receive(ServerMessage::PeerRetracted {
            from: ParticipantId(1),
            messages: vec![placement(3, 40, 5)],
        })
        .unwrap();

        assert!(p.state().opponent_uncommitted.is_empty());
        let outcome = p.last_retraction().unwrap();
        assert_eq!(outcome.matched, 0);
        assert_eq!(outcome.restored_to, None);
        assert_eq!(p.checkpoints().len(), checkpoints + 1);
    }

    #[test]
    fn rejection_past_retained_history_retracts_the_whole_word() {
        let config = ParticipantConfig {
            max_checkpoints: 2,
            ..ParticipantConfig::default()
        };
        let mut p = Participant::new(&config, NullView);
        p.join("ann");
        p.receive(ServerMessage::JoinAccepted {
            participant: ParticipantId(0),
        })
        .unwrap();
        p.receive(ServerMessage::SessionStarted {
            participants: vec![ParticipantId(0), ParticipantId(1)],
            checkpoint_policy: CheckpointPolicy::EveryCount {
                sends: 1,
                receives: 0,
            },
        })
        .unwrap();
        p.request_tiles().unwrap();
        p.receive(ServerMessage::TilesDrawn {
            tiles: tiles("STONERS", 0),
        })
        .unwrap();
        p.receive(ServerMessage::StartTurn { turn_number: 1 }).unwrap();

        let stamps: Vec<Timestamp> = (0..4)
            .map(|slot| {
                let sent = p.place(slot, pos(7, 7 + slot as u8)).unwrap();
                sent.sent_at().unwrap()
            })
            .collect();
        // Only the snapshots after the last two placements are retained.
        assert_eq!(p.checkpoints().len(), 2);

        let out = p
            .receive(ServerMessage::Rejected {
                before: stamps[1],
                reason: RejectReason::NotAligned {
                    position: pos(7, 8),
                },
            })
            .unwrap();

        assert!(p.state().pending.is_empty());
        assert_eq!(p.state().rack.len(), 7);
        assert_eq!(out.len(), 2);
        let ClientMessage::Retract { messages } = &out[0] else {
            panic!("expected a retraction, got {:?}", out[0]);
        };
        let retracted: Vec<Timestamp> = messages.iter().filter_map(ClientMessage::sent_at).collect();
        assert_eq!(retracted, stamps);
        assert!(matches!(out[1], ClientMessage::TurnCorrection { .. }));

        // Nothing is left to retract a second time.
        assert!(!p
            .checkpoints()
            .log()
            .sent()
            .iter()
            .any(|entry| entry.label == MessageLabel::Placement));
    }

    #[test]
    fn join_rejection_is_an_error() {
        let mut p = Participant::new(&ParticipantConfig::default(), NullView);
        p.join("late");
        assert_eq!(
            p.receive(ServerMessage::JoinRejected {
                reason: JoinRejectReason::SessionInProgress
            }),
            Err(ClientError::JoinRejected(JoinRejectReason::SessionInProgress))
        );
        assert_eq!(p.request_tiles(), Err(ClientError::NotStarted));
    }
}
