use lexigrid_protocol::Timestamp;

/// Logical clock of one participant.
///
/// Every send, receive and checkpoint takes a fresh tick, so local events are totally
/// ordered. Ticks mean nothing to other participants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LocalClock {
    now: Timestamp,
}

impl LocalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value handed out.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn tick(&mut self) -> Timestamp {
        self.now = Timestamp(self.now.0 + 1);
        self.now
    }
}
