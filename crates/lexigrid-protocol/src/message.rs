//! Message vocabulary exchanged between participants and the coordinator.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ParticipantId, Position, Tile, TileId, Timestamp};

/// Client-to-coordinator messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Register with the session
    Join { name: String },
    /// Request `count` tiles from the bag
    DrawTiles { count: u8, sent_at: Timestamp },
    /// Speculative tile placement, relayed to peers
    Placement {
        tile: Tile,
        position: Position,
        sent_at: Timestamp,
    },
    /// Speculative tile removal, relayed to peers
    Removal {
        tile: Tile,
        position: Position,
        sent_at: Timestamp,
    },
    /// Submit the assembled candidate words for validation
    Submission { words: Vec<String>, sent_at: Timestamp },
    /// Unsend previously sent messages after a local rollback
    Retract { messages: Vec<ClientMessage> },
    /// Ask the coordinator to confirm the turn after a local rollback
    TurnCorrection { turn_number: u32, sent_at: Timestamp },
    /// Ping for latency measurement
    Ping { timestamp: u64 },
}

impl ClientMessage {
    pub fn label(&self) -> MessageLabel {
        match self {
            ClientMessage::Join { .. } => MessageLabel::Join,
            ClientMessage::DrawTiles { .. } => MessageLabel::DrawTiles,
            ClientMessage::Placement { .. } => MessageLabel::Placement,
            ClientMessage::Removal { .. } => MessageLabel::Removal,
            ClientMessage::Submission { .. } => MessageLabel::Submission,
            ClientMessage::Retract { .. } => MessageLabel::Retract,
            ClientMessage::TurnCorrection { .. } => MessageLabel::TurnCorrection,
            ClientMessage::Ping { .. } => MessageLabel::Ping,
        }
    }

    /// Local send time stamped by the originating participant, if the message carries one.
    pub fn sent_at(&self) -> Option<Timestamp> {
        match self {
            ClientMessage::DrawTiles { sent_at, .. }
            | ClientMessage::Placement { sent_at, .. }
            | ClientMessage::Removal { sent_at, .. }
            | ClientMessage::Submission { sent_at, .. }
            | ClientMessage::TurnCorrection { sent_at, .. } => Some(*sent_at),
            ClientMessage::Join { .. }
            | ClientMessage::Retract { .. }
            | ClientMessage::Ping { .. } => None,
        }
    }
}

/// Coordinator-to-client messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Join accepted
    JoinAccepted { participant: ParticipantId },
    /// Join refused
    JoinRejected { reason: JoinRejectReason },
    /// Enough participants joined; play begins in the given turn order
    SessionStarted {
        participants: Vec<ParticipantId>,
        checkpoint_policy: CheckpointPolicy,
    },
    /// Tiles drawn for the requesting participant
    TilesDrawn { tiles: Vec<Tile> },
    /// Draw request refused (never a short draw)
    DrawRejected { requested: u8, reason: RejectReason },
    /// A peer placed a tile speculatively
    PeerPlacement {
        from: ParticipantId,
        tile: Tile,
        position: Position,
        sent_at: Timestamp,
    },
    /// A peer took a tile back off the board
    PeerRemoval {
        from: ParticipantId,
        tile: Tile,
        position: Position,
        sent_at: Timestamp,
    },
    /// Submitter's words validated; `placed` tiles are now committed
    WordsAccepted { words: Vec<String>, placed: Vec<Tile> },
    /// Another participant's words validated
    OpponentWordsAccepted {
        from: ParticipantId,
        words: Vec<String>,
        placed: Vec<Tile>,
    },
    /// The receiver now holds the turn
    StartTurn { turn_number: u32 },
    /// The receiver's turn is over
    EndTurn { turn_number: u32 },
    /// An action was refused; roll back to the latest checkpoint not after `before`
    Rejected {
        before: Timestamp,
        reason: RejectReason,
    },
    /// A peer unsent these messages
    PeerRetracted {
        from: ParticipantId,
        messages: Vec<ClientMessage>,
    },
    /// Authoritative turn state in reply to a turn correction
    TurnSync {
        current: ParticipantId,
        turn_number: u32,
    },
    /// A participant left and was dropped from the turn order
    ParticipantLeft { participant: ParticipantId },
    /// Session is over
    SessionClosed,
    /// Pong response
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
}

impl ServerMessage {
    pub fn label(&self) -> MessageLabel {
        match self {
            ServerMessage::JoinAccepted { .. } => MessageLabel::JoinAccepted,
            ServerMessage::JoinRejected { .. } => MessageLabel::JoinRejected,
            ServerMessage::SessionStarted { .. } => MessageLabel::SessionStarted,
            ServerMessage::TilesDrawn { .. } => MessageLabel::TilesDrawn,
            ServerMessage::DrawRejected { .. } => MessageLabel::DrawRejected,
            ServerMessage::PeerPlacement { .. } => MessageLabel::Placement,
            ServerMessage::PeerRemoval { .. } => MessageLabel::Removal,
            ServerMessage::WordsAccepted { .. } => MessageLabel::WordsAccepted,
            ServerMessage::OpponentWordsAccepted { .. } => MessageLabel::OpponentWordsAccepted,
            ServerMessage::StartTurn { .. } => MessageLabel::StartTurn,
            ServerMessage::EndTurn { .. } => MessageLabel::EndTurn,
            ServerMessage::Rejected { .. } => MessageLabel::Rejected,
            ServerMessage::PeerRetracted { .. } => MessageLabel::Retract,
            ServerMessage::TurnSync { .. } => MessageLabel::TurnSync,
            ServerMessage::ParticipantLeft { .. } => MessageLabel::ParticipantLeft,
            ServerMessage::SessionClosed => MessageLabel::SessionClosed,
            ServerMessage::Pong { .. } => MessageLabel::Pong,
        }
    }

    /// Messages that carry authoritative, irreversible state.
    ///
    /// Participants never roll back past one of these.
    pub fn is_commit(&self) -> bool {
        matches!(
            self,
            ServerMessage::SessionStarted { .. }
                | ServerMessage::TilesDrawn { .. }
                | ServerMessage::WordsAccepted { .. }
                | ServerMessage::OpponentWordsAccepted { .. }
                | ServerMessage::StartTurn { .. }
                | ServerMessage::EndTurn { .. }
                | ServerMessage::TurnSync { .. }
        )
    }
}

/// Short name of a message kind, as recorded in message logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageLabel {
    Join,
    JoinAccepted,
    JoinRejected,
    SessionStarted,
    DrawTiles,
    TilesDrawn,
    DrawRejected,
    Placement,
    Removal,
    Submission,
    WordsAccepted,
    OpponentWordsAccepted,
    StartTurn,
    EndTurn,
    Rejected,
    Retract,
    TurnCorrection,
    TurnSync,
    ParticipantLeft,
    SessionClosed,
    Ping,
    Pong,
}

impl fmt::Display for MessageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Reasons for rejecting a join request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinRejectReason {
    SessionFull,
    SessionInProgress,
    SessionClosed,
}

/// Why the coordinator refused an action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind")]
pub enum RejectReason {
    #[error("'{word}' is not in the dictionary")]
    InvalidWord { word: String },
    #[error("bag exhausted: {remaining} tiles remaining")]
    BagExhausted { remaining: u32 },
    #[error("rack holds at most {capacity} tiles")]
    RackOverflow { capacity: u8 },
    #[error("square {position} is occupied")]
    PositionOccupied { position: Position },
    #[error("square {position} does not extend the pending word")]
    NotAligned { position: Position },
    #[error("tile {tile:?} is not on the sender's rack")]
    UnknownTile { tile: TileId },
    #[error("no pending tile of the sender at {position}")]
    NotPending { position: Position },
    #[error("submitted words do not match the placed tiles")]
    WordMismatch,
    #[error("word has a gap")]
    IncompleteWord,
    #[error("nothing to submit")]
    EmptySubmission,
    #[error("dictionary unavailable")]
    OracleUnavailable,
}

/// When participants snapshot their local play state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CheckpointPolicy {
    /// Snapshot after every `sends` sent or every `receives` received messages
    EveryCount { sends: u32, receives: u32 },
    /// Snapshot right before a receive that follows a send
    MarkSendReceive,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        CheckpointPolicy::MarkSendReceive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Letter;

    fn tile() -> Tile {
        Tile::new(TileId(1), Letter::from_char('A').unwrap())
    }

    #[test]
    fn sent_at_only_on_stamped_messages() {
        let pos = Position::new(7, 7).unwrap();
        let placement = ClientMessage::Placement {
            tile: tile(),
            position: pos,
            sent_at: Timestamp(4),
        };
        assert_eq!(placement.sent_at(), Some(Timestamp(4)));
        assert_eq!(placement.label(), MessageLabel::Placement);

        let join = ClientMessage::Join { name: "ann".into() };
        assert_eq!(join.sent_at(), None);
    }

    #[test]
    fn commit_messages_are_barriers() {
        assert!(ServerMessage::StartTurn { turn_number: 1 }.is_commit());
        assert!(!ServerMessage::Rejected {
            before: Timestamp(1),
            reason: RejectReason::WordMismatch,
        }
        .is_commit());
        assert!(!ServerMessage::SessionClosed.is_commit());
    }

    #[test]
    fn checkpoint_policy_json_shape() {
        let json = serde_json::to_string(&CheckpointPolicy::EveryCount {
            sends: 3,
            receives: 2,
        })
        .unwrap();
        assert_eq!(json, r#"{"mode":"every_count","sends":3,"receives":2}"#);
        assert_eq!(CheckpointPolicy::default(), CheckpointPolicy::MarkSendReceive);
    }
}
