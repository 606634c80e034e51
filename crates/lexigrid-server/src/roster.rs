//! Connected clients: renet client ids, the participants they play as and per-client
//! rate limiting.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use lexigrid_protocol::ParticipantId;

#[derive(Debug)]
struct Connection {
    participant: Option<ParticipantId>,
    window_start: Instant,
    message_count: u32,
}

impl Connection {
    fn new() -> Self {
        Self {
            participant: None,
            window_start: Instant::now(),
            message_count: 0,
        }
    }
}

pub struct Roster {
    connections: HashMap<u64, Connection>,
    by_participant: HashMap<ParticipantId, u64>,
    pub rate_limit_messages: u32,
    pub rate_limit_window: Duration,
}

impl Roster {
    pub fn new(rate_limit_messages: u32, rate_limit_window: Duration) -> Self {
        Self {
            connections: HashMap::new(),
            by_participant: HashMap::new(),
            rate_limit_messages,
            rate_limit_window,
        }
    }

    pub fn connect(&mut self, client_id: u64) {
        self.connections.entry(client_id).or_insert_with(Connection::new);
    }

    /// Forget a client. Returns the participant it played as, if it had joined.
    pub fn disconnect(&mut self, client_id: u64) -> Option<ParticipantId> {
        let participant = self.connections.remove(&client_id)?.participant?;
        self.by_participant.remove(&participant);
        Some(participant)
    }

    /// Record that `client_id` plays as `participant`.
    pub fn bind(&mut self, client_id: u64, participant: ParticipantId) {
        self.connections
            .entry(client_id)
            .or_insert_with(Connection::new)
            .participant = Some(participant);
        self.by_participant.insert(participant, client_id);
    }

    pub fn participant(&self, client_id: u64) -> Option<ParticipantId> {
        self.connections.get(&client_id)?.participant
    }

    pub fn client(&self, participant: ParticipantId) -> Option<u64> {
        self.by_participant.get(&participant).copied()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Count a message against the client's window.
    /// Returns true if message is allowed, false if rate limited
    pub fn check_rate_limit(&mut self, client_id: u64) -> bool {
        let Some(connection) = self.connections.get_mut(&client_id) else {
            return true; // Unknown client - let message through for error handling
        };

        let now = Instant::now();
        if now.duration_since(connection.window_start) >= self.rate_limit_window {
            connection.window_start = now;
            connection.message_count = 0;
        }

        connection.message_count += 1;
        connection.message_count <= self.rate_limit_messages
    }
}
