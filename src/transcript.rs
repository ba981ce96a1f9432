//! Ordered transcript thread: the consumer-side merge of decoded events.
//!
//! Decoded transcript events arrive fragmented and out of order; the thread
//! folds them into a display-ready sequence where each speaker has at most
//! one live (still-streaming) line, finalized lines are immutable, and order
//! reflects event-generation time rather than network arrival time.

use crate::messages::TranscriptEvent;
use tracing::debug;

/// Display-ready ordered transcript.
///
/// `add_event` has no suspension points but reads and writes the collection
/// non-atomically, so concurrent producers need a single-writer task or a
/// mutex around the thread.
#[derive(Debug, Clone, Default)]
pub struct ChatThread {
    entries: Vec<TranscriptEvent>,
}

impl ChatThread {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one decoded event into the thread.
    ///
    /// Relative to existing entries with the same stream id: an event no
    /// newer than the last finalized entry is a stale duplicate and is
    /// discarded; otherwise it replaces the live (non-final) entry in place
    /// if one exists, or is appended. The thread is then re-sorted by
    /// timestamp — stable, so same-timestamp entries keep insertion order.
    pub fn add_event(&mut self, event: TranscriptEvent) {
        let last_final_ts = self
            .entries
            .iter()
            .rev()
            .find(|e| e.stream_id == event.stream_id && e.is_final)
            .map(|e| e.timestamp_ms);
        if last_final_ts.is_some_and(|ts| event.timestamp_ms <= ts) {
            debug!(
                stream_id = event.stream_id,
                timestamp_ms = event.timestamp_ms,
                "discarding stale transcript update"
            );
            return;
        }

        let live = self
            .entries
            .iter()
            .rposition(|e| e.stream_id == event.stream_id && !e.is_final);
        match live {
            Some(index) => self.entries[index] = event,
            None => self.entries.push(event),
        }

        // Updates are near-sorted in practice, so this stays cheap.
        self.entries.sort_by_key(|e| e.timestamp_ms);
    }

    /// The ordered entries, oldest first. Consumers must not mutate them.
    pub fn entries(&self) -> &[TranscriptEvent] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
