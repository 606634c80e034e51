use lexigrid_protocol::{ClientMessage, MessageLabel, ParticipantId, ServerMessage, Timestamp};

/// One logged message with the local time it was sent or received.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry<T> {
    pub label: MessageLabel,
    pub payload: T,
    pub timestamp: Timestamp,
}

/// Messages sent and received since the last commit barrier, in local time order.
#[derive(Clone, Debug, Default)]
pub struct MessageLog {
    sent: Vec<LogEntry<ClientMessage>>,
    received: Vec<LogEntry<ServerMessage>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> &[LogEntry<ClientMessage>] {
        &self.sent
    }

    pub fn received(&self) -> &[LogEntry<ServerMessage>] {
        &self.received
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty() && self.received.is_empty()
    }

    pub fn record_sent(&mut self, message: ClientMessage, timestamp: Timestamp) {
        self.sent.push(LogEntry {
            label: message.label(),
            payload: message,
            timestamp,
        });
    }

    pub fn record_received(&mut self, message: ServerMessage, timestamp: Timestamp) {
        self.received.push(LogEntry {
            label: message.label(),
            payload: message,
            timestamp,
        });
    }

    /// Put back a received entry taken out by [`MessageLog::split_after`].
    ///
    /// Entries must be restored in their original order.
    pub fn restore_received(&mut self, entry: LogEntry<ServerMessage>) {
        self.received.push(entry);
    }

    /// Cut both lists back to entries at or before `timestamp`, returning the rest.
    pub fn split_after(
        &mut self,
        timestamp: Timestamp,
    ) -> (Vec<LogEntry<ClientMessage>>, Vec<LogEntry<ServerMessage>>) {
        let sent_at = self.sent.partition_point(|e| e.timestamp <= timestamp);
        let received_at = self.received.partition_point(|e| e.timestamp <= timestamp);
        (
            self.sent.split_off(sent_at),
            self.received.split_off(received_at),
        )
    }

    /// Forget everything strictly before `timestamp`.
    pub fn purge_before(&mut self, timestamp: Timestamp) {
        self.sent.retain(|e| e.timestamp >= timestamp);
        self.received.retain(|e| e.timestamp >= timestamp);
    }

    /// Remove sent entries matching `pred`, returning them in log order.
    pub fn take_sent_where(
        &mut self,
        pred: impl Fn(&ClientMessage) -> bool,
    ) -> Vec<LogEntry<ClientMessage>> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.sent)
            .into_iter()
            .partition(|entry| pred(&entry.payload));
        self.sent = kept;
        taken
    }

    /// Remove received peer placements/removals from `origin` stamped with any of
    /// `sent_at`, returning them in log order.
    pub fn take_received_from(
        &mut self,
        origin: ParticipantId,
        sent_at: &[Timestamp],
    ) -> Vec<LogEntry<ServerMessage>> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.received)
            .into_iter()
            .partition(|entry| match peer_origin(&entry.payload) {
                Some((from, stamp)) => from == origin && sent_at.contains(&stamp),
                None => false,
            });
        self.received = kept;
        taken
    }

    pub fn clear(&mut self) {
        self.sent.clear();
        self.received.clear();
    }
}

/// Originating participant and send stamp of a relayed peer action.
pub fn peer_origin(message: &ServerMessage) -> Option<(ParticipantId, Timestamp)> {
    match message {
        ServerMessage::PeerPlacement { from, sent_at, .. }
        | ServerMessage::PeerRemoval { from, sent_at, .. } => Some((*from, *sent_at)),
        _ => None,
    }
}
