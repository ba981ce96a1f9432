//! Fragment reassembly with deadline-based eviction of abandoned messages.
//!
//! The cache itself is pure with respect to time: callers pass `now` and
//! drive eviction explicitly, so the timeout logic is deterministic under
//! test. [`run_reassembly`] wires the cache to the tokio clock with a
//! deadline queue and forwards decoded events to the ordering merge.

use crate::config::WireConfig;
use crate::error::Result;
use crate::messages::{SideAction, TranscriptEvent};
use crate::wire::{DecodedMessage, PartCount, WireFragment, decode_message, parse_fragment};
use futures_util::StreamExt as _;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

/// Fragments collected so far for one logical message.
#[derive(Debug)]
struct PendingMessage {
    fragments: Vec<WireFragment>,
    /// Part count recorded from the first fragment. Later fragments do not
    /// change the completion condition.
    total_parts: u32,
    created_at: Instant,
}

/// What ingesting one fragment produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Fragment buffered. `new_message` marks the first fragment of an id,
    /// whose eviction deadline the caller should schedule.
    Buffered { new_message: bool },
    /// The fragment completed its message.
    Complete(DecodedMessage),
    /// The fragment was dropped (sentinel part count).
    Dropped,
}

/// Reassembly cache keyed by message id.
#[derive(Debug)]
pub struct ReassemblyCache {
    pending: HashMap<String, PendingMessage>,
    timeout: Duration,
}

impl ReassemblyCache {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
        }
    }

    /// Eviction timeout for incomplete messages.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of messages currently awaiting fragments.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Ingest one fragment.
    ///
    /// Fragments with an unknown part count are dropped immediately — they
    /// could never satisfy a completion condition and would pin the cache.
    /// Once the stored count reaches the total recorded at creation, the
    /// fragments are sorted by part index, concatenated, decoded, and the
    /// entry is removed.
    ///
    /// # Errors
    ///
    /// Returns a payload error if a completed message fails base64 or JSON
    /// decoding; the entry is removed either way.
    pub fn ingest(&mut self, fragment: WireFragment, now: Instant) -> Result<IngestOutcome> {
        let PartCount::Known(total) = fragment.total_parts else {
            debug!(
                message_id = %fragment.message_id,
                "dropping fragment with unfinalized part count"
            );
            return Ok(IngestOutcome::Dropped);
        };

        let message_id = fragment.message_id.clone();
        let new_message = match self.pending.entry(message_id.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().fragments.push(fragment);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(PendingMessage {
                    fragments: vec![fragment],
                    total_parts: total,
                    created_at: now,
                });
                true
            }
        };

        let complete = self
            .pending
            .get(&message_id)
            .is_some_and(|p| p.fragments.len() as u32 == p.total_parts);
        if !complete {
            return Ok(IngestOutcome::Buffered { new_message });
        }

        // Completed entries must never be reused.
        let Some(mut pending) = self.pending.remove(&message_id) else {
            return Ok(IngestOutcome::Buffered { new_message });
        };
        let content = concat_content(&mut pending.fragments);
        Ok(IngestOutcome::Complete(decode_message(&content)?))
    }

    /// Deadline check for one message: drop it if still incomplete.
    ///
    /// Completion removes entries eagerly, so a fired deadline for a message
    /// that made it through is a natural no-op. Returns whether an entry was
    /// evicted. Eviction is expected steady state under packet loss and is
    /// not an error.
    pub fn evict_if_incomplete(&mut self, message_id: &str) -> bool {
        let incomplete = self
            .pending
            .get(message_id)
            .is_some_and(|p| p.fragments.len() as u32 != p.total_parts);
        if incomplete {
            self.pending.remove(message_id);
            debug!(%message_id, "evicted incomplete message after timeout");
        }
        incomplete
    }

    /// Sweep every message whose deadline has passed. For callers driving
    /// the cache with an explicit clock instead of [`run_reassembly`].
    pub fn evict_expired(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.created_at) >= self.timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.evict_if_incomplete(id);
        }
        expired
    }
}

/// Order fragments by part index and concatenate their content chunks.
fn concat_content(fragments: &mut [WireFragment]) -> String {
    fragments.sort_by_key(|f| f.part_index);
    fragments.iter().map(|f| f.content.as_str()).collect()
}

/// Run the consumer-side ingestion loop until the inbound channel closes.
///
/// Raw transport payloads are parsed, reassembled, and forwarded: transcript
/// events to `events_tx` (toward the ordering merge), side actions to
/// `actions_tx`. Per-fragment errors are logged and never abort the loop or
/// disturb unrelated pending messages.
pub async fn run_reassembly(
    config: WireConfig,
    mut inbound_rx: mpsc::Receiver<Vec<u8>>,
    events_tx: mpsc::Sender<TranscriptEvent>,
    actions_tx: mpsc::Sender<SideAction>,
) {
    let mut cache = ReassemblyCache::new(Duration::from_millis(config.eviction_timeout_ms));
    let mut deadlines: DelayQueue<String> = DelayQueue::new();

    loop {
        tokio::select! {
            raw = inbound_rx.recv() => {
                let Some(raw) = raw else { break };
                let fragment = match parse_fragment(&raw) {
                    Ok(fragment) => fragment,
                    Err(e) => {
                        warn!("dropping malformed fragment: {e}");
                        continue;
                    }
                };
                let message_id = fragment.message_id.clone();
                match cache.ingest(fragment, Instant::now()) {
                    Ok(IngestOutcome::Buffered { new_message: true }) => {
                        deadlines.insert(message_id, cache.timeout());
                    }
                    Ok(IngestOutcome::Complete(decoded)) => {
                        forward(decoded, &events_tx, &actions_tx).await;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(%message_id, "dropping reassembled message: {e}"),
                }
            }
            // Resolves to None when the queue is empty, which disables the
            // branch for this iteration; inserts re-arm it on the next one.
            Some(expired) = deadlines.next() => {
                cache.evict_if_incomplete(expired.get_ref());
            }
        }
    }
    info!("reassembly input channel closed, stopping");
}

async fn forward(
    decoded: DecodedMessage,
    events_tx: &mpsc::Sender<TranscriptEvent>,
    actions_tx: &mpsc::Sender<SideAction>,
) {
    match decoded {
        DecodedMessage::Event(event) => {
            if let Err(e) = events_tx.send(event).await {
                warn!("dropping transcript event, merge stage gone: {e}");
            }
        }
        DecodedMessage::Image { event, action } => {
            if let Err(e) = actions_tx.send(action).await {
                warn!("dropping image side action: {e}");
            }
            if let Err(e) = events_tx.send(event).await {
                warn!("dropping transcript event, merge stage gone: {e}");
            }
        }
        DecodedMessage::Action(action) => {
            if let Err(e) = actions_tx.send(action).await {
                warn!("dropping side action: {e}");
            }
        }
        DecodedMessage::Discarded => {}
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::messages::{Role, TranscriptKind};
    use crate::wire::encode_event;

    const TIMEOUT: Duration = Duration::from_millis(5_000);

    fn fragment(id: &str, index: u32, total: u32, content: &str) -> WireFragment {
        WireFragment {
            message_id: id.to_owned(),
            part_index: index,
            total_parts: PartCount::Known(total),
            content: content.to_owned(),
        }
    }

    /// Base64 of `{"streamId":1,"isFinal":true,"text":"FooBar",...}` split in
    /// two, for out-of-order delivery tests.
    fn payload_fragments(id: &str) -> (WireFragment, WireFragment) {
        use crate::wire::WirePayload;
        use base64::Engine as _;
        use base64::engine::general_purpose::STANDARD as BASE64;

        let payload = WirePayload {
            stream_id: 1,
            is_final: true,
            text: "FooBar".to_owned(),
            timestamp: 9,
            data_type: "text".to_owned(),
            role: Role::User,
        };
        let encoded = BASE64.encode(serde_json::to_string(&payload).unwrap());
        let mid = encoded.len() / 2;
        (
            fragment(id, 0, 2, &encoded[..mid]),
            fragment(id, 1, 2, &encoded[mid..]),
        )
    }

    #[test]
    fn out_of_order_fragments_concatenate_by_part_index() {
        // "Rm9v" + "QmFy" is base64("FooBar"): arrival order 1 then 0 must
        // still concatenate to "Rm9vQmFy".
        let mut fragments = vec![fragment("M", 1, 2, "QmFy"), fragment("M", 0, 2, "Rm9v")];
        let content = concat_content(&mut fragments);
        assert_eq!(content, "Rm9vQmFy");

        use base64::Engine as _;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(content)
            .unwrap();
        assert_eq!(decoded, b"FooBar");
    }

    #[test]
    fn out_of_order_payload_decodes_to_original_event() {
        let mut cache = ReassemblyCache::new(TIMEOUT);
        let now = Instant::now();
        let (part0, part1) = payload_fragments("M");

        assert_eq!(
            cache.ingest(part1, now).unwrap(),
            IngestOutcome::Buffered { new_message: true }
        );
        match cache.ingest(part0, now).unwrap() {
            IngestOutcome::Complete(DecodedMessage::Event(event)) => {
                assert_eq!(event.text, "FooBar");
                assert_eq!(event.stream_id, 1);
                assert_eq!(event.kind, TranscriptKind::Text);
                assert!(event.is_final);
            }
            other => panic!("expected completed event, got {other:?}"),
        }
        assert_eq!(cache.pending_len(), 0);
    }

    #[test]
    fn sentinel_part_count_is_dropped_not_buffered() {
        let mut cache = ReassemblyCache::new(TIMEOUT);
        let sentinel = WireFragment {
            total_parts: PartCount::Unknown,
            ..fragment("M", 0, 0, "Rm9v")
        };
        assert_eq!(
            cache.ingest(sentinel, Instant::now()).unwrap(),
            IngestOutcome::Dropped
        );
        assert_eq!(cache.pending_len(), 0);
    }

    #[test]
    fn incomplete_message_evicted_after_timeout() {
        let mut cache = ReassemblyCache::new(TIMEOUT);
        let start = Instant::now();
        let _ = cache.ingest(fragment("M", 0, 2, "Rm9v"), start).unwrap();

        // Not yet due.
        assert!(cache.evict_expired(start + TIMEOUT / 2).is_empty());
        assert_eq!(cache.pending_len(), 1);

        let evicted = cache.evict_expired(start + TIMEOUT);
        assert_eq!(evicted, vec!["M".to_owned()]);
        assert_eq!(cache.pending_len(), 0);
    }

    #[test]
    fn fragment_after_eviction_starts_fresh_message() {
        let mut cache = ReassemblyCache::new(TIMEOUT);
        let start = Instant::now();
        let _ = cache.ingest(fragment("M", 0, 2, "Rm9v"), start).unwrap();
        let _ = cache.evict_expired(start + TIMEOUT);

        // Same id again: a brand-new PendingMessage, not a resumed one.
        let outcome = cache
            .ingest(fragment("M", 0, 2, "Rm9v"), start + TIMEOUT)
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Buffered { new_message: true });
    }

    #[test]
    fn deadline_noop_for_completed_message() {
        let mut cache = ReassemblyCache::new(TIMEOUT);
        let now = Instant::now();
        let (part0, part1) = payload_fragments("M");
        let _ = cache.ingest(part0, now).unwrap();
        let _ = cache.ingest(part1, now).unwrap();

        // The deadline fires later and must find nothing to do.
        assert!(!cache.evict_if_incomplete("M"));
    }

    #[test]
    fn decode_failure_does_not_disturb_other_messages() {
        let mut cache = ReassemblyCache::new(TIMEOUT);
        let now = Instant::now();
        let (part0, _) = payload_fragments("healthy");
        let _ = cache.ingest(part0, now).unwrap();

        assert!(cache.ingest(fragment("broken", 0, 1, "!!!"), now).is_err());
        assert_eq!(cache.pending_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ingestion_loop_reassembles_and_forwards() {
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (actions_tx, _actions_rx) = mpsc::channel(16);
        let config = WireConfig::default();
        let driver = tokio::spawn(run_reassembly(config, inbound_rx, events_tx, actions_tx));

        let event = TranscriptEvent {
            role: Role::Assistant,
            kind: TranscriptKind::Text,
            text: "streamed across fragments".to_owned(),
            is_final: false,
            stream_id: 3,
            timestamp_ms: 17,
        };
        // Deliver the fragments in reverse order.
        for frame in encode_event(&event, 8).into_iter().rev() {
            inbound_tx.send(frame.into_bytes()).await.unwrap();
        }

        let decoded = events_rx.recv().await.unwrap();
        assert_eq!(decoded, event);

        drop(inbound_tx);
        driver.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ingestion_loop_evicts_on_deadline_and_survives_garbage() {
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (actions_tx, _actions_rx) = mpsc::channel(16);
        let config = WireConfig {
            eviction_timeout_ms: 100,
            ..WireConfig::default()
        };
        let driver = tokio::spawn(run_reassembly(config, inbound_rx, events_tx, actions_tx));

        // Malformed framing must not kill the loop.
        inbound_tx.send(b"not a fragment".to_vec()).await.unwrap();

        // First half of a two-part message, then silence past the deadline.
        let event = TranscriptEvent {
            role: Role::User,
            kind: TranscriptKind::Text,
            text: "never completes".to_owned(),
            is_final: true,
            stream_id: 1,
            timestamp_ms: 1,
        };
        let frames = encode_event(&event, 8);
        assert!(frames.len() >= 2);
        inbound_tx.send(frames[0].clone().into_bytes()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        // The whole message again: it must start fresh and complete.
        for frame in &frames {
            inbound_tx.send(frame.clone().into_bytes()).await.unwrap();
        }
        let decoded = events_rx.recv().await.unwrap();
        assert_eq!(decoded, event);

        drop(inbound_tx);
        driver.await.unwrap();
    }
}
