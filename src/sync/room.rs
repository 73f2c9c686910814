// Per-room state while a room is active: the replayed history, messages
// appended live, the presence snapshot, and typing indicators. The
// displayed sequence is history (ascending id) followed by live arrivals;
// live events that race the history fetch are buffered and spliced in.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use log::info;

use crate::channel::LiveChannel;
use crate::models::Message;

use super::typing::TypingSet;

/// What happened to a live message on arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    Appended,
    /// History has not resolved yet; held back for the splice.
    Buffered,
    /// Redelivery of an id already held. Dropped.
    Duplicate,
}

pub struct ActiveRoom {
    pub name: String,
    pub joined_at: DateTime<Utc>,
    generation: u64,
    pub(super) channel: Option<LiveChannel>,
    messages: Vec<Message>,
    seen: HashSet<i64>,
    pending: Vec<Message>,
    history_loaded: bool,
    pub(super) presence: BTreeSet<String>,
    pub(super) typing: TypingSet,
}

impl ActiveRoom {
    pub(super) fn new(name: &str, generation: u64) -> Self {
        ActiveRoom {
            name: name.to_string(),
            joined_at: Utc::now(),
            generation,
            channel: None,
            messages: Vec::new(),
            seen: HashSet::new(),
            pending: Vec::new(),
            history_loaded: false,
            presence: BTreeSet::new(),
            typing: TypingSet::new(),
        }
    }

    /// The generation of the room entry that created this state. Late
    /// completions carrying another generation must not touch it.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn history_loaded(&self) -> bool {
        self.history_loaded
    }

    pub fn presence(&self) -> &BTreeSet<String> {
        &self.presence
    }

    pub fn typing_names(&self) -> Vec<&str> {
        self.typing.names()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    pub(super) fn ingest_live(&mut self, message: Message) -> LiveOutcome {
        if !self.seen.insert(message.id) {
            return LiveOutcome::Duplicate;
        }
        if self.history_loaded {
            self.messages.push(message);
            LiveOutcome::Appended
        } else {
            self.pending.push(message);
            LiveOutcome::Buffered
        }
    }

    /// Install the replayed history page and splice in anything the live
    /// channel delivered while the fetch was in flight, in id order and
    /// deduplicated by id.
    pub(super) fn apply_history(&mut self, history: Vec<Message>) {
        let mut merged = history;
        merged.extend(self.pending.drain(..));
        merged.sort_by_key(|message| message.id);
        merged.dedup_by_key(|message| message.id);

        self.seen = merged.iter().map(|message| message.id).collect();
        self.messages = merged;
        self.history_loaded = true;
        info!(
            "history replay complete for {}: {} messages",
            self.name,
            self.messages.len()
        );
    }
}
