//! Checkpoint manager.
//!
//! Snapshots the participant's [`PlayState`] according to the session's
//! [`CheckpointPolicy`] and keeps the message log since the last commit barrier.
//! Rolling back picks a snapshot, throws away everything newer, and hands back the
//! log entries recorded after it so the caller can retract or replay them.

use std::collections::VecDeque;

use lexigrid_protocol::{CheckpointId, CheckpointPolicy, ClientMessage, ServerMessage, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{LocalClock, LogEntry, MessageLog, PlayState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum CheckpointError {
    #[error("no checkpoint at or before {before}")]
    NoCheckpoint { before: Timestamp },
}

/// Participant-side settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantConfig {
    /// Used until the session announces its own policy
    #[serde(default)]
    pub checkpoint_policy: CheckpointPolicy,
    /// Oldest checkpoints are dropped beyond this many
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,
}

fn default_max_checkpoints() -> usize {
    64
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            checkpoint_policy: CheckpointPolicy::default(),
            max_checkpoints: default_max_checkpoints(),
        }
    }
}

/// Immutable snapshot of the play state at a local time.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub timestamp: Timestamp,
    pub state: PlayState,
}

/// Result of a rollback.
#[derive(Debug)]
pub struct Rewind {
    pub checkpoint: CheckpointId,
    pub timestamp: Timestamp,
    /// Fresh copy of the restored state.
    pub state: PlayState,
    /// Later checkpoints that were thrown away.
    pub discarded: usize,
    /// Messages sent after the checkpoint (the retraction candidates).
    pub unsent: Vec<LogEntry<ClientMessage>>,
    /// Messages received after the checkpoint.
    pub unreceived: Vec<LogEntry<ServerMessage>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Event {
    Send,
    Receive,
}

#[derive(Debug)]
pub struct CheckpointManager {
    policy: CheckpointPolicy,
    max_checkpoints: usize,
    checkpoints: VecDeque<Checkpoint>,
    log: MessageLog,
    next_id: u64,
    sends_since: u32,
    receives_since: u32,
    last_event: Option<Event>,
}

impl CheckpointManager {
    pub fn new(config: &ParticipantConfig) -> Self {
        Self {
            policy: config.checkpoint_policy,
            max_checkpoints: config.max_checkpoints.max(1),
            checkpoints: VecDeque::new(),
            log: MessageLog::new(),
            next_id: 0,
            sends_since: 0,
            receives_since: 0,
            last_event: None,
        }
    }

    pub fn policy(&self) -> CheckpointPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: CheckpointPolicy) {
        self.policy = policy;
        self.sends_since = 0;
        self.receives_since = 0;
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut MessageLog {
        &mut self.log
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn latest(&self) -> Option<&Checkpoint> {
        self.checkpoints.back()
    }

    pub fn checkpoints(&self) -> impl Iterator<Item = &Checkpoint> {
        self.checkpoints.iter()
    }

    /// Snapshot `state` now.
    pub fn checkpoint(&mut self, state: &PlayState, clock: &mut LocalClock) -> CheckpointId {
        let timestamp = clock.tick();
        let id = CheckpointId(self.next_id);
        self.next_id += 1;

        self.checkpoints.push_back(Checkpoint {
            id,
            timestamp,
            state: state.clone(),
        });
        while self.checkpoints.len() > self.max_checkpoints {
            self.checkpoints.pop_front();
        }
        self.sends_since = 0;
        self.receives_since = 0;

        debug!(checkpoint = id.0, %timestamp, retained = self.checkpoints.len(), "Checkpoint taken");
        id
    }

    pub fn record_sent(&mut self, message: ClientMessage, timestamp: Timestamp) {
        self.log.record_sent(message, timestamp);
        self.sends_since += 1;
        self.last_event = Some(Event::Send);
    }

    pub fn record_received(&mut self, message: ServerMessage, timestamp: Timestamp) {
        self.log.record_received(message, timestamp);
        self.receives_since += 1;
        self.last_event = Some(Event::Receive);
    }

    /// Hook run before a received message is applied.
    ///
    /// Under [`CheckpointPolicy::MarkSendReceive`] this snapshots when the previous
    /// event was a send.
    pub fn before_receive(
        &mut self,
        state: &PlayState,
        clock: &mut LocalClock,
    ) -> Option<CheckpointId> {
        match self.policy {
            CheckpointPolicy::MarkSendReceive if self.last_event == Some(Event::Send) => {
                Some(self.checkpoint(state, clock))
            }
            _ => None,
        }
    }

    /// Hook run after a send or receive has been applied and logged.
    ///
    /// Under [`CheckpointPolicy::EveryCount`] this snapshots once either counter
    /// reaches its threshold. A zero threshold disables that counter.
    pub fn after_event(&mut self, state: &PlayState, clock: &mut LocalClock) -> Option<CheckpointId> {
        match self.policy {
            CheckpointPolicy::EveryCount { sends, receives }
                if (sends > 0 && self.sends_since >= sends)
                    || (receives > 0 && self.receives_since >= receives) =>
            {
                Some(self.checkpoint(state, clock))
            }
            _ => None,
        }
    }

    /// Commit boundary: snapshot, then forget every older checkpoint and log entry.
    ///
    /// Nothing before a commit can be rolled back, so keeping it only wastes memory.
    pub fn barrier(&mut self, state: &PlayState, clock: &mut LocalClock) -> CheckpointId {
        let id = self.checkpoint(state, clock);
        let timestamp = clock.now();
        let purged = self.checkpoints.len().saturating_sub(1);
        self.checkpoints.retain(|c| c.id == id);
        self.log.purge_before(timestamp);
        self.last_event = None;
        debug!(checkpoint = id.0, purged, "Commit barrier");
        id
    }

    /// Restore the latest checkpoint taken at or before `before`.
    pub fn rollback(&mut self, before: Timestamp) -> Result<Rewind, CheckpointError> {
        let index = self
            .checkpoints
            .iter()
            .rposition(|c| c.timestamp <= before)
            .ok_or(CheckpointError::NoCheckpoint { before })?;
        Ok(self.rewind_to(index))
    }

    /// Restore the latest checkpoint taken strictly before `timestamp`.
    pub fn rollback_preceding(&mut self, timestamp: Timestamp) -> Result<Rewind, CheckpointError> {
        let index = self
            .checkpoints
            .iter()
            .rposition(|c| c.timestamp < timestamp)
            .ok_or(CheckpointError::NoCheckpoint { before: timestamp })?;
        Ok(self.rewind_to(index))
    }

    /// Drop all checkpoints and the whole log.
    pub fn purge(&mut self) {
        self.checkpoints.clear();
        self.log.clear();
        self.sends_since = 0;
        self.receives_since = 0;
        self.last_event = None;
    }

    fn rewind_to(&mut self, index: usize) -> Rewind {
        let discarded = self.checkpoints.len() - index - 1;
        self.checkpoints.truncate(index + 1);

        let chosen = &self.checkpoints[index];
        let (checkpoint, timestamp, state) = (chosen.id, chosen.timestamp, chosen.state.clone());
        let (unsent, unreceived) = self.log.split_after(timestamp);
        self.sends_since = 0;
        self.receives_since = 0;
        self.last_event = None;

        debug!(
            checkpoint = checkpoint.0,
            %timestamp,
            discarded,
            unsent = unsent.len(),
            unreceived = unreceived.len(),
            "Rolled back"
        );
        Rewind {
            checkpoint,
            timestamp,
            state,
            discarded,
            unsent,
            unreceived,
        }
    }
}
