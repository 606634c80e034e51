//! Authoritative session state.
//!
//! The [`Coordinator`] owns the tile bag, the turn ring, the committed board and a
//! record of every participant's dealt tiles and speculative word. It does no I/O:
//! the server loop feeds it decoded client messages and routes the [`Outgoing`]
//! messages it returns.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use lexigrid_core::{
    BagError, Board, BoardError, PendingWord, PlacementError, SubmissionError, TileBag, TurnRing,
};
use lexigrid_protocol::{
    CheckpointPolicy, ClientMessage, JoinRejectReason, ParticipantId, Position, RejectReason,
    ServerMessage, Tile, TileId, Timestamp, RACK_SIZE,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::oracle::{DictionaryOracle, WordList};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// Collecting participants
    Waiting,
    /// Turns are being played
    Active,
    /// Over; nothing more is accepted
    Closed,
}

/// Who an outgoing message is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recipient {
    One(ParticipantId),
    AllExcept(ParticipantId),
    All,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Outgoing {
    pub recipient: Recipient,
    pub message: ServerMessage,
}

impl Outgoing {
    pub fn one(to: ParticipantId, message: ServerMessage) -> Self {
        Self {
            recipient: Recipient::One(to),
            message,
        }
    }

    pub fn all_except(except: ParticipantId, message: ServerMessage) -> Self {
        Self {
            recipient: Recipient::AllExcept(except),
            message,
        }
    }

    pub fn all(message: ServerMessage) -> Self {
        Self {
            recipient: Recipient::All,
            message,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("session is full")]
    SessionFull,
    #[error("session already in progress")]
    SessionInProgress,
    #[error("session is closed")]
    SessionClosed,
}

impl JoinError {
    pub fn reason(self) -> JoinRejectReason {
        match self {
            JoinError::SessionFull => JoinRejectReason::SessionFull,
            JoinError::SessionInProgress => JoinRejectReason::SessionInProgress,
            JoinError::SessionClosed => JoinRejectReason::SessionClosed,
        }
    }
}

/// What the coordinator knows about one participant.
#[derive(Debug)]
struct Seat {
    name: String,
    /// Tiles dealt to this participant and not yet committed, pending ones included.
    hand: BTreeMap<TileId, Tile>,
    pending: PendingWord,
    /// Accepted placements and removals since the last commit, in arrival order.
    relay: Vec<ClientMessage>,
    departed: bool,
}

impl Seat {
    fn new(name: String) -> Self {
        Self {
            name,
            hand: BTreeMap::new(),
            pending: PendingWord::new(),
            relay: Vec::new(),
            departed: false,
        }
    }

    /// Tiles on the rack: dealt, not committed and not pending.
    fn rack(&self) -> impl Iterator<Item = &Tile> {
        self.hand
            .values()
            .filter(move |tile| !self.pending.pending_tiles().any(|p| p.id == tile.id))
    }

    /// Rebuild the pending word from the relay log, dropping entries that no longer apply.
    fn replay_relay(&mut self, board: &Board) {
        self.pending = PendingWord::new();
        let relay = std::mem::take(&mut self.relay);
        for message in relay {
            let applied = match &message {
                ClientMessage::Placement { tile, position, .. } => self
                    .pending
                    .place(tile.clone(), *position, board)
                    .map(|_| ())
                    .map_err(|e| e.to_string()),
                ClientMessage::Removal { position, .. } => self
                    .pending
                    .remove(*position, board)
                    .map(|_| ())
                    .map_err(|e| e.to_string()),
                _ => Err("not a relayed message".to_string()),
            };
            match applied {
                Ok(()) => self.relay.push(message),
                Err(err) => warn!(label = %message.label(), %err, "Dropping relay entry on replay"),
            }
        }
    }
}

/// The arbiter of one session.
pub struct Coordinator<O: DictionaryOracle = WordList> {
    phase: SessionPhase,
    min_players: usize,
    max_players: usize,
    checkpoint_policy: CheckpointPolicy,
    seats: BTreeMap<ParticipantId, Seat>,
    join_order: Vec<ParticipantId>,
    next_id: u8,
    ring: Option<TurnRing>,
    bag: TileBag,
    rng: StdRng,
    board: Board,
    oracle: O,
}

impl<O: DictionaryOracle> Coordinator<O> {
    pub fn new(config: &ServerConfig, oracle: O) -> Self {
        let rng = match config.bag_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            phase: SessionPhase::Waiting,
            min_players: usize::from(config.min_players),
            max_players: usize::from(config.max_players),
            checkpoint_policy: config.checkpoint_policy,
            seats: BTreeMap::new(),
            join_order: Vec::new(),
            next_id: 0,
            ring: None,
            bag: TileBag::standard(),
            rng,
            board: Board::new(),
            oracle,
        }
    }

    /// Replace the standard bag, e.g. with a fixed distribution.
    pub fn with_bag(mut self, bag: TileBag) -> Self {
        self.bag = bag;
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn bag(&self) -> &TileBag {
        &self.bag
    }

    /// Participant holding the turn, once the session is active.
    pub fn current(&self) -> Option<ParticipantId> {
        self.ring.as_ref().map(TurnRing::current)
    }

    pub fn turn_number(&self) -> Option<u32> {
        self.ring.as_ref().map(TurnRing::turn_number)
    }

    /// Participants that have not left, in join order.
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.join_order
            .iter()
            .copied()
            .filter(|id| self.seats.get(id).is_some_and(|seat| !seat.departed))
            .collect()
    }

    pub fn name(&self, id: ParticipantId) -> Option<&str> {
        self.seats.get(&id).map(|seat| seat.name.as_str())
    }

    /// Tiles on a participant's rack as the coordinator sees it.
    pub fn rack(&self, id: ParticipantId) -> Vec<&Tile> {
        self.seats
            .get(&id)
            .map(|seat| seat.rack().collect())
            .unwrap_or_default()
    }

    pub fn pending(&self, id: ParticipantId) -> Option<&PendingWord> {
        self.seats.get(&id).map(|seat| &seat.pending)
    }

    pub fn relay_log(&self, id: ParticipantId) -> &[ClientMessage] {
        self.seats
            .get(&id)
            .map(|seat| seat.relay.as_slice())
            .unwrap_or_default()
    }

    /// Participants a message for `recipient` is delivered to.
    pub fn resolve(&self, recipient: Recipient) -> Vec<ParticipantId> {
        match recipient {
            Recipient::One(id) => self
                .seats
                .get(&id)
                .filter(|seat| !seat.departed)
                .map(|_| vec![id])
                .unwrap_or_default(),
            Recipient::AllExcept(except) => self
                .participants()
                .into_iter()
                .filter(|id| *id != except)
                .collect(),
            Recipient::All => self.participants(),
        }
    }

    /// Register a participant. Starts the session once enough have joined.
    pub fn join(
        &mut self,
        name: impl Into<String>,
    ) -> Result<(ParticipantId, Vec<Outgoing>), JoinError> {
        match self.phase {
            SessionPhase::Waiting => {}
            SessionPhase::Active => return Err(JoinError::SessionInProgress),
            SessionPhase::Closed => return Err(JoinError::SessionClosed),
        }
        if self.participants().len() >= self.max_players {
            return Err(JoinError::SessionFull);
        }

        let id = ParticipantId(self.next_id);
        self.next_id = self.next_id.checked_add(1).ok_or(JoinError::SessionFull)?;
        let name = name.into();
        info!(participant = %id, %name, "Participant joined");

        self.seats.insert(id, Seat::new(name));
        self.join_order.push(id);

        let mut out = vec![Outgoing::one(id, ServerMessage::JoinAccepted { participant: id })];
        if self.participants().len() >= self.min_players {
            self.start(&mut out);
        }
        Ok((id, out))
    }

    fn start(&mut self, out: &mut Vec<Outgoing>) {
        let order = self.participants();
        let ring = match TurnRing::new(order.clone()) {
            Ok(ring) => ring,
            Err(err) => {
                warn!(%err, "Cannot start session");
                return;
            }
        };
        let first = ring.current();
        let turn_number = ring.turn_number();
        self.ring = Some(ring);
        self.phase = SessionPhase::Active;

        info!(players = order.len(), first = %first, "Session started");
        out.push(Outgoing::all(ServerMessage::SessionStarted {
            participants: order,
            checkpoint_policy: self.checkpoint_policy,
        }));
        out.push(Outgoing::one(first, ServerMessage::StartTurn { turn_number }));
    }

    /// Drop a participant from the session.
    ///
    /// A participant holding the turn loses it immediately. The session closes when
    /// fewer than two remain.
    pub fn leave(&mut self, id: ParticipantId) -> Vec<Outgoing> {
        let Some(seat) = self.seats.get_mut(&id) else {
            return Vec::new();
        };
        if seat.departed {
            return Vec::new();
        }
        info!(participant = %id, name = %seat.name, "Participant left");

        match self.phase {
            SessionPhase::Waiting => {
                self.seats.remove(&id);
                self.join_order.retain(|p| *p != id);
                vec![Outgoing::all(ServerMessage::ParticipantLeft { participant: id })]
            }
            SessionPhase::Closed => {
                seat.departed = true;
                Vec::new()
            }
            SessionPhase::Active => {
                seat.departed = true;
                seat.pending.take_pending();
                seat.relay.clear();

                let mut out = vec![Outgoing::all(ServerMessage::ParticipantLeft {
                    participant: id,
                })];
                let Some(ring) = self.ring.as_mut() else {
                    return out;
                };
                let held_turn = ring.is_current(id);
                ring.depart(id);

                if ring.active().count() < 2 {
                    info!("Too few participants left, closing session");
                    self.phase = SessionPhase::Closed;
                    out.push(Outgoing::all(ServerMessage::SessionClosed));
                } else if held_turn {
                    info!(participant = %id, "Forcing end of turn");
                    self.advance_turn(&mut out);
                }
                out
            }
        }
    }

    /// Process one message from a registered participant.
    pub fn handle(&mut self, from: ParticipantId, message: ClientMessage) -> Vec<Outgoing> {
        if !self.seats.get(&from).is_some_and(|seat| !seat.departed) {
            warn!(participant = %from, label = %message.label(), "Message from unknown participant");
            return Vec::new();
        }
        if let ClientMessage::Ping { timestamp } = message {
            return vec![Outgoing::one(from, pong(timestamp))];
        }
        if self.phase != SessionPhase::Active {
            warn!(participant = %from, label = %message.label(), phase = ?self.phase, "Session not active, dropping");
            return Vec::new();
        }

        match message {
            ClientMessage::Join { .. } => {
                warn!(participant = %from, "Duplicate join ignored");
                Vec::new()
            }
            ClientMessage::DrawTiles { count, .. } => self.draw_tiles(from, count),
            ClientMessage::Placement {
                tile,
                position,
                sent_at,
            } => self.placement(from, tile, position, sent_at),
            ClientMessage::Removal {
                tile,
                position,
                sent_at,
            } => self.removal(from, tile, position, sent_at),
            ClientMessage::Submission { words, sent_at } => self.submission(from, words, sent_at),
            ClientMessage::Retract { messages } => self.retract(from, &messages),
            ClientMessage::TurnCorrection { turn_number, .. } => {
                self.turn_correction(from, turn_number)
            }
            ClientMessage::Ping { timestamp } => vec![Outgoing::one(from, pong(timestamp))],
        }
    }

    fn holds_turn(&self, id: ParticipantId, label: &str) -> bool {
        let holds = self.ring.as_ref().is_some_and(|ring| ring.is_current(id));
        if !holds {
            warn!(participant = %id, label, "Out of turn, dropping");
        }
        holds
    }

    fn draw_tiles(&mut self, from: ParticipantId, count: u8) -> Vec<Outgoing> {
        let Some(seat) = self.seats.get_mut(&from) else {
            return Vec::new();
        };

        let reject = |reason: RejectReason| {
            warn!(participant = %from, requested = count, %reason, "Draw rejected");
            vec![Outgoing::one(
                from,
                ServerMessage::DrawRejected {
                    requested: count,
                    reason,
                },
            )]
        };

        if seat.hand.len() + usize::from(count) > RACK_SIZE {
            return reject(RejectReason::RackOverflow {
                capacity: RACK_SIZE as u8,
            });
        }
        match self.bag.draw(u32::from(count), &mut self.rng) {
            Ok(tiles) => {
                debug!(participant = %from, count, left = self.bag.total_remaining(), "Tiles drawn");
                seat.hand
                    .extend(tiles.iter().map(|tile| (tile.id, tile.clone())));
                vec![Outgoing::one(from, ServerMessage::TilesDrawn { tiles })]
            }
            Err(BagError::Exhausted { remaining, .. }) => {
                reject(RejectReason::BagExhausted { remaining })
            }
        }
    }

    fn placement(
        &mut self,
        from: ParticipantId,
        tile: Tile,
        position: Position,
        sent_at: Timestamp,
    ) -> Vec<Outgoing> {
        if !self.holds_turn(from, "placement") {
            return Vec::new();
        }
        match self.place_pending(from, tile.id, position) {
            Ok(placed) => {
                debug!(participant = %from, %position, %sent_at, "Relaying placement");
                if let Some(seat) = self.seats.get_mut(&from) {
                    seat.relay.push(ClientMessage::Placement {
                        tile: placed.clone(),
                        position,
                        sent_at,
                    });
                }
                vec![Outgoing::all_except(
                    from,
                    ServerMessage::PeerPlacement {
                        from,
                        tile: placed,
                        position,
                        sent_at,
                    },
                )]
            }
            Err(reason) => rejected(from, sent_at, reason),
        }
    }

    fn place_pending(
        &mut self,
        from: ParticipantId,
        tile: TileId,
        position: Position,
    ) -> Result<Tile, RejectReason> {
        let occupied = self.board.is_committed(position)
            || self.seats.values().any(|seat| seat.pending.contains(position));
        if occupied {
            return Err(RejectReason::PositionOccupied { position });
        }

        let seat = self
            .seats
            .get_mut(&from)
            .ok_or(RejectReason::UnknownTile { tile })?;
        let held = seat
            .rack()
            .find(|t| t.id == tile)
            .cloned()
            .ok_or(RejectReason::UnknownTile { tile })?;

        seat.pending
            .place(held.clone(), position, &self.board)
            .map_err(|err| match err {
                PlacementError::Occupied(position) => RejectReason::PositionOccupied { position },
                PlacementError::NotAligned(position) => RejectReason::NotAligned { position },
            })?;
        Ok(held.placed_at(position))
    }

    fn removal(
        &mut self,
        from: ParticipantId,
        tile: Tile,
        position: Position,
        sent_at: Timestamp,
    ) -> Vec<Outgoing> {
        if !self.holds_turn(from, "removal") {
            return Vec::new();
        }
        let Some(seat) = self.seats.get_mut(&from) else {
            return Vec::new();
        };
        if seat.pending.get(position).map(|t| t.id) != Some(tile.id) {
            return rejected(from, sent_at, RejectReason::NotPending { position });
        }

        match seat.pending.remove(position, &self.board) {
            Ok(removed) => {
                debug!(participant = %from, %position, %sent_at, "Relaying removal");
                seat.relay.push(ClientMessage::Removal {
                    tile: removed.clone(),
                    position,
                    sent_at,
                });
                vec![Outgoing::all_except(
                    from,
                    ServerMessage::PeerRemoval {
                        from,
                        tile: removed,
                        position,
                        sent_at,
                    },
                )]
            }
            Err(_) => rejected(from, sent_at, RejectReason::NotPending { position }),
        }
    }

    fn submission(
        &mut self,
        from: ParticipantId,
        words: Vec<String>,
        sent_at: Timestamp,
    ) -> Vec<Outgoing> {
        if !self.holds_turn(from, "submission") {
            return Vec::new();
        }
        // Roll back to before the first speculative action of this word.
        let before = self
            .seats
            .get(&from)
            .and_then(|seat| seat.relay.iter().find_map(ClientMessage::sent_at))
            .unwrap_or(sent_at);

        match self.accept_words(from, &words) {
            Ok(placed) => self.finish_turn(from, words, placed),
            Err(reason) => rejected(from, before, reason),
        }
    }

    /// Validate the submitted words and commit the tiles they were built from.
    fn accept_words(
        &mut self,
        from: ParticipantId,
        words: &[String],
    ) -> Result<Vec<Tile>, RejectReason> {
        let seat = self
            .seats
            .get_mut(&from)
            .ok_or(RejectReason::EmptySubmission)?;

        let assembled = seat.pending.words().map_err(|err| match err {
            SubmissionError::Incomplete => RejectReason::IncompleteWord,
            SubmissionError::Empty => RejectReason::EmptySubmission,
        })?;
        let matches = assembled.len() == words.len()
            && assembled
                .iter()
                .zip(words)
                .all(|(ours, theirs)| ours.eq_ignore_ascii_case(theirs));
        if !matches {
            debug!(?assembled, submitted = ?words, "Submitted words differ from placed tiles");
            return Err(RejectReason::WordMismatch);
        }

        for word in &assembled {
            match self.oracle.check(word) {
                Ok(true) => {}
                Ok(false) => return Err(RejectReason::InvalidWord { word: word.clone() }),
                Err(err) => {
                    warn!(%err, %word, "Dictionary check failed");
                    return Err(RejectReason::OracleUnavailable);
                }
            }
        }

        let placed: Vec<Tile> = seat
            .pending
            .pending_tiles()
            .map(|tile| Tile {
                committed: true,
                ..tile.clone()
            })
            .collect();
        self.board
            .commit(placed.clone())
            .map_err(|err| match err {
                BoardError::Occupied(position) => RejectReason::PositionOccupied { position },
                BoardError::Unplaced(_) => RejectReason::WordMismatch,
            })?;

        seat.pending.take_pending();
        seat.relay.clear();
        for tile in &placed {
            seat.hand.remove(&tile.id);
        }
        Ok(placed)
    }

    fn finish_turn(
        &mut self,
        from: ParticipantId,
        words: Vec<String>,
        placed: Vec<Tile>,
    ) -> Vec<Outgoing> {
        let Some(turn_number) = self.turn_number() else {
            return Vec::new();
        };
        info!(participant = %from, ?words, tiles = placed.len(), "Words accepted");

        let mut out = vec![
            Outgoing::one(
                from,
                ServerMessage::WordsAccepted {
                    words: words.clone(),
                    placed: placed.clone(),
                },
            ),
            Outgoing::all_except(
                from,
                ServerMessage::OpponentWordsAccepted {
                    from,
                    words,
                    placed,
                },
            ),
            Outgoing::one(from, ServerMessage::EndTurn { turn_number }),
        ];
        self.advance_turn(&mut out);
        out
    }

    fn advance_turn(&mut self, out: &mut Vec<Outgoing>) {
        let Some(ring) = self.ring.as_mut() else {
            return;
        };
        match ring.advance() {
            Ok(next) => {
                let turn_number = ring.turn_number();
                info!(participant = %next, turn_number, "Turn started");
                out.push(Outgoing::one(next, ServerMessage::StartTurn { turn_number }));
            }
            Err(err) => warn!(%err, "Cannot advance turn"),
        }
    }

    fn retract(&mut self, from: ParticipantId, messages: &[ClientMessage]) -> Vec<Outgoing> {
        let Some(seat) = self.seats.get_mut(&from) else {
            return Vec::new();
        };
        let stamps: Vec<Timestamp> = messages.iter().filter_map(ClientMessage::sent_at).collect();

        let (withdrawn, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut seat.relay)
            .into_iter()
            .partition(|entry| entry.sent_at().is_some_and(|stamp| stamps.contains(&stamp)));
        seat.relay = kept;
        if withdrawn.is_empty() {
            debug!(participant = %from, count = messages.len(), "Retraction matched nothing relayed");
            return Vec::new();
        }

        seat.replay_relay(&self.board);
        info!(
            participant = %from,
            withdrawn = withdrawn.len(),
            remaining = seat.relay.len(),
            "Relaying retraction"
        );
        vec![Outgoing::all_except(
            from,
            ServerMessage::PeerRetracted {
                from,
                messages: withdrawn,
            },
        )]
    }

    fn turn_correction(&mut self, from: ParticipantId, claimed: u32) -> Vec<Outgoing> {
        let Some(ring) = self.ring.as_ref() else {
            return Vec::new();
        };
        if !ring.validate_correction(claimed) {
            warn!(
                participant = %from,
                claimed,
                actual = ring.turn_number(),
                "Turn correction mismatch"
            );
        }
        vec![Outgoing::one(
            from,
            ServerMessage::TurnSync {
                current: ring.current(),
                turn_number: ring.turn_number(),
            },
        )]
    }
}

fn rejected(to: ParticipantId, before: Timestamp, reason: RejectReason) -> Vec<Outgoing> {
    warn!(participant = %to, %before, %reason, "Action rejected");
    vec![Outgoing::one(to, ServerMessage::Rejected { before, reason })]
}

fn pong(client_timestamp: u64) -> ServerMessage {
    let server_timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0);
    ServerMessage::Pong {
        client_timestamp,
        server_timestamp,
    }
}

#[cfg(test)]
mod tests {
    use lexigrid_protocol::{Letter, MessageLabel};

    use super::*;
    use crate::oracle::OracleError;

    fn pos(row: u8, col: u8) -> Position {
        Position::new(row, col).unwrap()
    }

    fn letter(c: char) -> Letter {
        Letter::from_char(c).unwrap()
    }

    fn config() -> ServerConfig {
        ServerConfig {
            bag_seed: Some(7),
            ..ServerConfig::default()
        }
    }

    /// Two-player session where A holds exactly `letters`.
    fn session(letters: &str) -> (Coordinator, ParticipantId, ParticipantId) {
        let words = WordList::from_words(["cat", "at", "hi"]);
        let bag = TileBag::from_counts(letters.chars().map(|c| (letter(c), 1)));
        let mut coordinator = Coordinator::new(&config(), words).with_bag(bag);
        let (a, _) = coordinator.join("ann").unwrap();
        let (b, _) = coordinator.join("bob").unwrap();
        let out = coordinator.handle(
            a,
            ClientMessage::DrawTiles {
                count: letters.len() as u8,
                sent_at: Timestamp(1),
            },
        );
        assert!(matches!(out[0].message, ServerMessage::TilesDrawn { .. }));
        (coordinator, a, b)
    }

    fn tile_of(coordinator: &Coordinator, id: ParticipantId, c: char) -> Tile {
        coordinator
            .rack(id)
            .into_iter()
            .find(|t| t.letter == letter(c))
            .cloned()
            .unwrap()
    }

    fn place(
        coordinator: &mut Coordinator,
        id: ParticipantId,
        c: char,
        at: Position,
        sent_at: u64,
    ) -> Vec<Outgoing> {
        let tile = tile_of(coordinator, id, c);
        coordinator.handle(
            id,
            ClientMessage::Placement {
                tile,
                position: at,
                sent_at: Timestamp(sent_at),
            },
        )
    }

    fn labels(out: &[Outgoing]) -> Vec<(Recipient, MessageLabel)> {
        out.iter().map(|o| (o.recipient, o.message.label())).collect()
    }

    #[test]
    fn session_starts_at_min_players() {
        let mut coordinator = Coordinator::new(&config(), WordList::default());
        let (a, out) = coordinator.join("ann").unwrap();
        assert_eq!(coordinator.phase(), SessionPhase::Waiting);
        assert_eq!(out.len(), 1);

        let (b, out) = coordinator.join("bob").unwrap();
        assert_eq!(coordinator.phase(), SessionPhase::Active);
        assert_eq!(
            out[1].message,
            ServerMessage::SessionStarted {
                participants: vec![a, b],
                checkpoint_policy: CheckpointPolicy::MarkSendReceive,
            }
        );
        assert_eq!(
            out[2],
            Outgoing::one(a, ServerMessage::StartTurn { turn_number: 1 })
        );
        assert_eq!(coordinator.join("cy").unwrap_err(), JoinError::SessionInProgress);
        assert_eq!(
            JoinError::SessionInProgress.reason(),
            JoinRejectReason::SessionInProgress
        );
    }

    #[test]
    fn draws_respect_rack_and_bag() {
        let (mut coordinator, a, b) = session("cat");
        let out = coordinator.handle(
            a,
            ClientMessage::DrawTiles {
                count: 5,
                sent_at: Timestamp(2),
            },
        );
        assert_eq!(
            out[0].message,
            ServerMessage::DrawRejected {
                requested: 5,
                reason: RejectReason::RackOverflow { capacity: 7 },
            }
        );

        // Drawing is allowed out of turn.
        let out = coordinator.handle(
            b,
            ClientMessage::DrawTiles {
                count: 1,
                sent_at: Timestamp(1),
            },
        );
        assert_eq!(
            out[0].message,
            ServerMessage::DrawRejected {
                requested: 1,
                reason: RejectReason::BagExhausted { remaining: 0 },
            }
        );
    }

    #[test]
    fn placements_are_validated_and_relayed() {
        let (mut coordinator, a, b) = session("catxq");

        let out = place(&mut coordinator, a, 'c', pos(7, 7), 2);
        assert_eq!(labels(&out), vec![(Recipient::AllExcept(a), MessageLabel::Placement)]);
        assert_eq!(coordinator.relay_log(a).len(), 1);

        // Same square again.
        let out = place(&mut coordinator, a, 'a', pos(7, 7), 3);
        assert!(matches!(
            out[0].message,
            ServerMessage::Rejected {
                before: Timestamp(3),
                reason: RejectReason::PositionOccupied { .. }
            }
        ));

        // Off the line of the word.
        let out = place(&mut coordinator, a, 'a', pos(9, 9), 4);
        assert!(matches!(
            out[0].message,
            ServerMessage::Rejected {
                reason: RejectReason::NotAligned { .. },
                ..
            }
        ));

        // A tile that is already on the board is not on the rack.
        let c = coordinator.pending(a).unwrap().get(pos(7, 7)).cloned().unwrap();
        let out = coordinator.handle(
            a,
            ClientMessage::Placement {
                tile: c,
                position: pos(7, 8),
                sent_at: Timestamp(5),
            },
        );
        assert!(matches!(
            out[0].message,
            ServerMessage::Rejected {
                reason: RejectReason::UnknownTile { .. },
                ..
            }
        ));

        // B does not hold the turn.
        let x = tile_of(&coordinator, a, 'x');
        let out = coordinator.handle(
            b,
            ClientMessage::Removal {
                tile: x,
                position: pos(7, 7),
                sent_at: Timestamp(9),
            },
        );
        assert!(out.is_empty());
        assert_eq!(coordinator.relay_log(a).len(), 1);
    }

    #[test]
    fn removal_must_target_own_pending_tile() {
        let (mut coordinator, a, _) = session("cat");
        place(&mut coordinator, a, 'c', pos(7, 7), 2);
        let a_tile = tile_of(&coordinator, a, 'a');

        let out = coordinator.handle(
            a,
            ClientMessage::Removal {
                tile: a_tile,
                position: pos(7, 7),
                sent_at: Timestamp(3),
            },
        );
        assert!(matches!(
            out[0].message,
            ServerMessage::Rejected {
                reason: RejectReason::NotPending { .. },
                ..
            }
        ));

        let c = coordinator.pending(a).unwrap().get(pos(7, 7)).cloned().unwrap();
        let out = coordinator.handle(
            a,
            ClientMessage::Removal {
                tile: c,
                position: pos(7, 7),
                sent_at: Timestamp(4),
            },
        );
        assert_eq!(out[0].message.label(), MessageLabel::Removal);
        assert!(coordinator.pending(a).unwrap().is_empty());
        assert_eq!(coordinator.rack(a).len(), 3);
    }

    #[test]
    fn accepted_word_commits_and_advances() {
        let (mut coordinator, a, b) = session("cat");
        for (i, c) in "cat".chars().enumerate() {
            place(&mut coordinator, a, c, pos(7, 7 + i as u8), 2 + i as u64);
        }

        let out = coordinator.handle(
            a,
            ClientMessage::Submission {
                words: vec!["cat".into()],
                sent_at: Timestamp(5),
            },
        );
        assert_eq!(
            labels(&out),
            vec![
                (Recipient::One(a), MessageLabel::WordsAccepted),
                (Recipient::AllExcept(a), MessageLabel::OpponentWordsAccepted),
                (Recipient::One(a), MessageLabel::EndTurn),
                (Recipient::One(b), MessageLabel::StartTurn),
            ]
        );
        assert_eq!(coordinator.current(), Some(b));
        assert_eq!(coordinator.turn_number(), Some(2));
        assert_eq!(coordinator.board().len(), 3);
        assert!(coordinator.board().get(pos(7, 8)).unwrap().committed);
        assert!(coordinator.rack(a).is_empty());
        assert!(coordinator.relay_log(a).is_empty());
    }

    #[test]
    fn rejected_submission_goes_to_submitter_only() {
        let (mut coordinator, a, _) = session("xqz");
        for (i, c) in "xqz".chars().enumerate() {
            place(&mut coordinator, a, c, pos(7, 7 + i as u8), 10 + i as u64);
        }

        let out = coordinator.handle(
            a,
            ClientMessage::Submission {
                words: vec!["xqz".into()],
                sent_at: Timestamp(20),
            },
        );
        assert_eq!(
            out,
            vec![Outgoing::one(
                a,
                ServerMessage::Rejected {
                    before: Timestamp(10),
                    reason: RejectReason::InvalidWord { word: "xqz".into() },
                }
            )]
        );
        assert_eq!(coordinator.current(), Some(a));
        assert!(coordinator.board().is_empty());
    }

    #[test]
    fn submission_must_match_placed_tiles() {
        let (mut coordinator, a, _) = session("cat");
        let submit = |coordinator: &mut Coordinator, words: &[&str]| {
            coordinator.handle(
                a,
                ClientMessage::Submission {
                    words: words.iter().map(|w| w.to_string()).collect(),
                    sent_at: Timestamp(30),
                },
            )
        };

        let out = submit(&mut coordinator, &["cat"]);
        assert!(matches!(
            out[0].message,
            ServerMessage::Rejected {
                before: Timestamp(30),
                reason: RejectReason::EmptySubmission
            }
        ));

        place(&mut coordinator, a, 'c', pos(7, 7), 2);
        place(&mut coordinator, a, 't', pos(7, 9), 3);
        let out = submit(&mut coordinator, &["c t"]);
        assert!(matches!(
            out[0].message,
            ServerMessage::Rejected {
                before: Timestamp(2),
                reason: RejectReason::IncompleteWord
            }
        ));

        place(&mut coordinator, a, 'a', pos(7, 8), 4);
        let out = submit(&mut coordinator, &["act"]);
        assert!(matches!(
            out[0].message,
            ServerMessage::Rejected {
                reason: RejectReason::WordMismatch,
                ..
            }
        ));
    }

    struct Offline;

    impl DictionaryOracle for Offline {
        fn check(&self, _word: &str) -> Result<bool, OracleError> {
            Err(OracleError::Unavailable("offline".into()))
        }
    }

    #[test]
    fn oracle_failure_rejects() {
        let bag = TileBag::from_counts([(letter('H'), 1), (letter('I'), 1)]);
        let mut coordinator = Coordinator::new(&config(), Offline).with_bag(bag);
        let (a, _) = coordinator.join("ann").unwrap();
        coordinator.join("bob").unwrap();
        coordinator.handle(
            a,
            ClientMessage::DrawTiles {
                count: 2,
                sent_at: Timestamp(1),
            },
        );
        let rack: Vec<Tile> = coordinator.rack(a).into_iter().cloned().collect();
        let h = rack.iter().find(|t| t.letter == letter('H')).cloned().unwrap();
        let i = rack.iter().find(|t| t.letter == letter('I')).cloned().unwrap();
        for (tile, col) in [(h, 0), (i, 1)] {
            coordinator.handle(
                a,
                ClientMessage::Placement {
                    tile,
                    position: pos(0, col),
                    sent_at: Timestamp(2 + u64::from(col)),
                },
            );
        }

        let out = coordinator.handle(
            a,
            ClientMessage::Submission {
                words: vec!["hi".into()],
                sent_at: Timestamp(4),
            },
        );
        assert!(matches!(
            out[0].message,
            ServerMessage::Rejected {
                reason: RejectReason::OracleUnavailable,
                ..
            }
        ));
    }

    #[test]
    fn retraction_rebuilds_pending_and_relays_matches() {
        let (mut coordinator, a, _) = session("cat");
        place(&mut coordinator, a, 'c', pos(7, 7), 2);
        place(&mut coordinator, a, 'a', pos(7, 8), 3);
        place(&mut coordinator, a, 't', pos(7, 9), 4);

        let retracted: Vec<ClientMessage> = coordinator.relay_log(a)[1..].to_vec();
        let mut messages = retracted.clone();
        messages.push(ClientMessage::Submission {
            words: vec!["cat".into()],
            sent_at: Timestamp(5),
        });

        let out = coordinator.handle(a, ClientMessage::Retract { messages });
        assert_eq!(
            out,
            vec![Outgoing::all_except(
                a,
                ServerMessage::PeerRetracted {
                    from: a,
                    messages: retracted,
                }
            )]
        );
        let pending = coordinator.pending(a).unwrap();
        assert_eq!(pending.count(), 1);
        assert!(pending.contains(pos(7, 7)));
        assert_eq!(coordinator.rack(a).len(), 2);

        // Nothing left that matches.
        let again = coordinator.handle(
            a,
            ClientMessage::Retract {
                messages: vec![ClientMessage::Submission {
                    words: vec![],
                    sent_at: Timestamp(5),
                }],
            },
        );
        assert!(again.is_empty());
    }

    #[test]
    fn turn_correction_always_answers() {
        let (mut coordinator, a, b) = session("cat");
        let out = coordinator.handle(
            b,
            ClientMessage::TurnCorrection {
                turn_number: 9,
                sent_at: Timestamp(3),
            },
        );
        assert_eq!(
            out,
            vec![Outgoing::one(
                b,
                ServerMessage::TurnSync {
                    current: a,
                    turn_number: 1,
                }
            )]
        );
    }

    #[test]
    fn leaving_forces_the_turn_on_and_closes_when_alone() {
        let mut coordinator = Coordinator::new(&config(), WordList::default());
        let three = ServerConfig {
            min_players: 3,
            ..config()
        };
        let mut coordinator3 = Coordinator::new(&three, WordList::default());
        let (a, _) = coordinator3.join("ann").unwrap();
        let (b, _) = coordinator3.join("bob").unwrap();
        let (c, _) = coordinator3.join("cy").unwrap();

        let out = coordinator3.leave(a);
        assert_eq!(
            out,
            vec![
                Outgoing::all(ServerMessage::ParticipantLeft { participant: a }),
                Outgoing::one(b, ServerMessage::StartTurn { turn_number: 2 }),
            ]
        );
        assert_eq!(coordinator3.resolve(Recipient::All), vec![b, c]);
        assert!(coordinator3.handle(a, ClientMessage::Ping { timestamp: 1 }).is_empty());

        let out = coordinator3.leave(c);
        assert_eq!(out.last().unwrap().message, ServerMessage::SessionClosed);
        assert_eq!(coordinator3.phase(), SessionPhase::Closed);
        assert_eq!(coordinator3.join("dee").unwrap_err(), JoinError::SessionClosed);

        // Leaving before the start just frees the seat.
        let (x, _) = coordinator.join("xan").unwrap();
        coordinator.leave(x);
        assert!(coordinator.participants().is_empty());
        assert_eq!(coordinator.phase(), SessionPhase::Waiting);
    }
}
