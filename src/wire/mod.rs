//! Wire framing and payload codec for transcript fragments.
//!
//! A transcript event travels over the data channel as one or more
//! `|`-delimited fragments:
//!
//! ```text
//! <messageId>|<partIndex>|<totalParts>|<content>
//! ```
//!
//! where `content` is a chunk of the base64-encoded JSON payload and
//! `totalParts` is either a decimal count or the literal `???` when the
//! sender has not yet finalized it. This framing is a compatibility surface
//! and must be preserved byte-for-byte by any producer.

pub mod reassembly;

use crate::error::{ProtocolError, Result};
use crate::messages::{Role, SideAction, TranscriptEvent, TranscriptKind, TransportCommand};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Literal `totalParts` value for a sender that has not finalized the count.
pub const UNKNOWN_PARTS: &str = "???";

/// Declared part count of a fragment's parent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartCount {
    Known(u32),
    /// The `???` sentinel. Fragments carrying it are never buffered: their
    /// completion condition is unknowable.
    Unknown,
}

/// One wire-level piece of a logical transcript message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFragment {
    pub message_id: String,
    /// 0-based position within the message.
    pub part_index: u32,
    pub total_parts: PartCount,
    /// Chunk of the base64-encoded serialized payload.
    pub content: String,
}

/// Parse raw transport bytes into a wire fragment.
///
/// # Errors
///
/// Returns a frame error for invalid UTF-8, a field count other than four,
/// or a non-numeric part index or count.
pub fn parse_fragment(raw: &[u8]) -> Result<WireFragment> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| ProtocolError::Frame(format!("fragment is not UTF-8: {e}")))?;

    let mut fields = text.splitn(4, '|');
    let (Some(message_id), Some(index), Some(total), Some(content)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(ProtocolError::Frame(format!(
            "expected 4 |-delimited fields, got {:?}",
            text.get(..64).unwrap_or(text)
        )));
    };

    let part_index = index
        .parse()
        .map_err(|_| ProtocolError::Frame(format!("non-numeric part index {index:?}")))?;
    let total_parts = if total == UNKNOWN_PARTS {
        PartCount::Unknown
    } else {
        PartCount::Known(
            total
                .parse()
                .map_err(|_| ProtocolError::Frame(format!("non-numeric part count {total:?}")))?,
        )
    };

    Ok(WireFragment {
        message_id: message_id.to_owned(),
        part_index,
        total_parts,
        content: content.to_owned(),
    })
}

/// Frame a single fragment for the wire.
pub fn encode_fragment(fragment: &WireFragment) -> String {
    let total = match fragment.total_parts {
        PartCount::Known(n) => n.to_string(),
        PartCount::Unknown => UNKNOWN_PARTS.to_owned(),
    };
    format!(
        "{}|{}|{}|{}",
        fragment.message_id, fragment.part_index, total, fragment.content
    )
}

/// JSON payload carried inside a reassembled message.
///
/// Field names are fixed by the wire format. `role` was absent in early
/// payloads, so decoding defaults it to `user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePayload {
    pub stream_id: i64,
    pub is_final: bool,
    pub text: String,
    /// Event generation time, monotonic milliseconds.
    pub timestamp: u64,
    /// `"text"` for plain transcript lines, `"raw"` for tagged payloads.
    pub data_type: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::User
}

impl WirePayload {
    /// Build the wire payload for a transcript event. Reasoning and image
    /// events travel as `raw` with a tagged inner JSON wrapper.
    pub fn from_event(event: &TranscriptEvent) -> Self {
        let (data_type, text) = match event.kind {
            TranscriptKind::Text => ("text".to_owned(), event.text.clone()),
            TranscriptKind::Reasoning => (
                "raw".to_owned(),
                serde_json::json!({ "type": "reasoning", "text": event.text }).to_string(),
            ),
            TranscriptKind::Image => (
                "raw".to_owned(),
                serde_json::json!({ "type": "image_url", "url": event.text }).to_string(),
            ),
        };
        Self {
            stream_id: event.stream_id,
            is_final: event.is_final,
            text,
            timestamp: event.timestamp_ms,
            data_type,
            role: event.role,
        }
    }

    fn event(&self, kind: TranscriptKind, text: String) -> TranscriptEvent {
        TranscriptEvent {
            role: self.role,
            kind,
            text,
            is_final: self.is_final,
            stream_id: self.stream_id,
            timestamp_ms: self.timestamp,
        }
    }
}

/// Result of decoding a fully reassembled payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMessage {
    /// A displayable transcript event for the ordering merge.
    Event(TranscriptEvent),
    /// An image transcript event; the URL is also dispatched out-of-band.
    Image {
        event: TranscriptEvent,
        action: SideAction,
    },
    /// A pure side effect; nothing reaches the thread.
    Action(SideAction),
    /// Nothing to forward (empty text or an unrecognized action).
    Discarded,
}

/// Decode the concatenated base64 content of a completed message.
///
/// # Errors
///
/// Returns a payload error if the base64 or outer JSON cannot be decoded.
pub fn decode_message(content: &str) -> Result<DecodedMessage> {
    let bytes = BASE64
        .decode(content)
        .map_err(|e| ProtocolError::Payload(format!("invalid base64: {e}")))?;
    let payload: WirePayload = serde_json::from_slice(&bytes)
        .map_err(|e| ProtocolError::Payload(format!("invalid payload JSON: {e}")))?;
    Ok(decode_payload(&payload))
}

/// Map a decoded payload onto a typed transcript message.
///
/// Unknown `dataType` values fall back to plain text rather than dropping
/// data; events with empty (trimmed) text are discarded.
pub fn decode_payload(payload: &WirePayload) -> DecodedMessage {
    let decoded = match payload.data_type.as_str() {
        "raw" => decode_raw(payload),
        _ => DecodedMessage::Event(payload.event(TranscriptKind::Text, payload.text.clone())),
    };

    // Empty lines never reach the ordering merge.
    let text_is_empty = match &decoded {
        DecodedMessage::Event(event) => event.text.trim().is_empty(),
        DecodedMessage::Image { event, .. } => event.text.trim().is_empty(),
        _ => false,
    };
    if text_is_empty {
        return DecodedMessage::Discarded;
    }
    decoded
}

fn decode_raw(payload: &WirePayload) -> DecodedMessage {
    let Ok(inner) = serde_json::from_str::<serde_json::Value>(&payload.text) else {
        // Not the tagged wrapper we expect; show it as plain text rather
        // than losing it.
        return DecodedMessage::Event(payload.event(TranscriptKind::Text, payload.text.clone()));
    };

    match inner.get("type").and_then(|t| t.as_str()) {
        Some("reasoning") => {
            let text = inner
                .get("text")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_owned();
            DecodedMessage::Event(payload.event(TranscriptKind::Reasoning, text))
        }
        Some("image_url") => {
            let url = inner
                .get("url")
                .and_then(|u| u.as_str())
                .unwrap_or_default()
                .to_owned();
            DecodedMessage::Image {
                event: payload.event(TranscriptKind::Image, url.clone()),
                action: SideAction::OpenUrl(url),
            }
        }
        Some("action") => {
            let action = inner.get("action").and_then(|a| a.as_str());
            let url = inner.get("url").and_then(|u| u.as_str());
            match (action, url) {
                (Some("browse_website"), Some(url)) => {
                    DecodedMessage::Action(SideAction::Navigate(url.to_owned()))
                }
                _ => {
                    debug!(?action, "ignoring unrecognized raw action");
                    DecodedMessage::Discarded
                }
            }
        }
        _ => DecodedMessage::Event(payload.event(TranscriptKind::Text, payload.text.clone())),
    }
}

/// Serialize a transcript event into framed wire fragments ready to send.
///
/// The payload is JSON-serialized, base64-encoded, and split into chunks of
/// at most `max_chunk` characters under a fresh message id.
pub fn encode_event(event: &TranscriptEvent, max_chunk: usize) -> Vec<String> {
    let payload = WirePayload::from_event(event);
    // WirePayload has no non-serializable fields, so this cannot fail.
    let json = serde_json::to_string(&payload).unwrap_or_default();
    let encoded = BASE64.encode(json);

    let message_id = Uuid::new_v4().to_string();
    let max_chunk = max_chunk.max(1);
    // Base64 output is ASCII, so byte chunks are char-safe.
    let chunks: Vec<&[u8]> = encoded.as_bytes().chunks(max_chunk).collect();
    let total = chunks.len() as u32;

    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            encode_fragment(&WireFragment {
                message_id: message_id.clone(),
                part_index: i as u32,
                total_parts: PartCount::Known(total),
                content: String::from_utf8_lossy(chunk).into_owned(),
            })
        })
        .collect()
}

/// Run the producer-side encoder: frame each transcript event and hand the
/// fragments to the transport.
///
/// Send failures are logged and skipped; a lost transcript line must not
/// stall the producer.
pub async fn run_encoder(
    max_fragment_chars: usize,
    mut events_rx: mpsc::Receiver<TranscriptEvent>,
    transport_tx: mpsc::Sender<TransportCommand>,
) {
    while let Some(event) = events_rx.recv().await {
        for frame in encode_event(&event, max_fragment_chars) {
            if let Err(e) = transport_tx.send(TransportCommand::Send(frame)).await {
                warn!("dropping fragment after transport send failure: {e}");
            }
        }
    }
    info!("transcript encoder input channel closed, stopping");
}
