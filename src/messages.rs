//! Message types passed between protocol stages.

use serde::{Deserialize, Serialize};

/// The speaking party a transcript event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Payload category of a transcript event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    /// Plain displayable text.
    Text,
    /// Model reasoning, shown separately from spoken output.
    Reasoning,
    /// An image reference; `text` holds the URL.
    Image,
}

/// A single transcript update, produced on the turn controller side and
/// reconstructed identically on the consumer side.
///
/// Immutable once constructed. Events sharing a `stream_id` form one logical
/// conversation thread line (see [`crate::transcript::ChatThread`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub role: Role,
    pub kind: TranscriptKind,
    pub text: String,
    /// Whether this is a completed utterance (vs a still-streaming partial).
    pub is_final: bool,
    /// Logical identity of the speaking party.
    pub stream_id: i64,
    /// Event generation time, monotonic milliseconds.
    pub timestamp_ms: u64,
}

/// Metadata attached to a recognition result by the speech recognizer.
#[derive(Debug, Clone, Default)]
pub struct RecognitionMetadata {
    /// Session identifier of the recognized speaker, when known.
    pub session_id: Option<String>,
}

/// A recognition result from the speech-recognition stage.
#[derive(Debug, Clone)]
pub struct RecognitionResult {
    pub text: String,
    /// Whether this is a final transcription (vs partial/streaming).
    pub is_final: bool,
    pub metadata: RecognitionMetadata,
}

/// Kind of a streamed generation delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    /// Spoken assistant output.
    Message,
    /// Reasoning or any other non-message content.
    Reasoning,
}

impl DeltaKind {
    /// Map an upstream kind label: `"message"` is spoken output, anything
    /// else is treated as reasoning-like.
    pub fn from_label(label: &str) -> Self {
        if label == "message" {
            Self::Message
        } else {
            Self::Reasoning
        }
    }
}

/// A streamed delta from the generation stage.
#[derive(Debug, Clone)]
pub struct GenerationDelta {
    pub text: String,
    /// Whether this is the last delta of the response.
    pub is_final: bool,
    pub kind: DeltaKind,
}

/// A sentence-sized synthesis request dispatched to the TTS sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    /// Derived from the turn id so a downstream synthesizer can discard
    /// requests belonging to a superseded turn after barge-in.
    pub request_id: String,
    pub text: String,
    /// Whether this is the last request of the current response.
    pub is_end_of_input: bool,
    /// Turn the request belongs to.
    pub turn_id: u64,
}

/// Inbound events consumed by the turn controller.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    UserJoined,
    UserLeft,
    Recognition(RecognitionResult),
    Generation(GenerationDelta),
}

/// Commands sent to the synthesis sink.
#[derive(Debug, Clone)]
pub enum SynthesisCommand {
    Speak(SynthesisRequest),
    /// Discard queued and in-flight synthesis output.
    Flush { flush_id: String },
}

/// Commands sent to the generation stage.
#[derive(Debug, Clone)]
pub enum GenerationCommand {
    /// Best-effort cancellation of the in-flight generation.
    Cancel,
    /// A finalized user utterance starting a new turn.
    Generate { text: String, turn_id: u64 },
}

/// Commands sent to the transport layer.
#[derive(Debug, Clone)]
pub enum TransportCommand {
    /// One framed wire fragment, ready for the data channel.
    Send(String),
    /// Out-of-band flush so not-yet-played audio is discarded downstream.
    Flush { flush_id: String },
}

/// Out-of-band side effects decoded from raw transcript payloads.
///
/// These never reach the ordered thread; the hosting UI dispatches them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideAction {
    /// Open an image URL alongside the transcript.
    OpenUrl(String),
    /// Navigate the embedded browser to a URL.
    Navigate(String),
}
