//! Turn controller: session identity, barge-in, and transcript emission.
//!
//! The controller is a pure state machine ([`TurnState`]) wrapped by an async
//! driver task ([`run_turn_controller`]). Each inbound event is applied to
//! the state and yields an ordered list of [`TurnEffect`]s; the driver
//! dispatches those to the synthesis sink, generation stage, and transport.
//! Keeping the transition logic pure makes barge-in and turn accounting
//! testable without a live transport.

pub mod segment;

use crate::config::TurnConfig;
use crate::messages::{
    ControllerEvent, DeltaKind, GenerationCommand, GenerationDelta, RecognitionMetadata,
    RecognitionResult, Role, SynthesisCommand, SynthesisRequest, TranscriptEvent, TranscriptKind,
    TransportCommand,
};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Conversation session identity owned by the turn controller.
#[derive(Debug, Clone)]
pub struct Session {
    /// Derived from recognition metadata, or the configured fallback.
    pub session_id: String,
    /// Monotonically increasing; +1 on every finalized user utterance.
    pub turn_id: u64,
    /// Number of currently joined users.
    pub joined_users: u32,
}

/// Side effects requested by a turn-state transition, in dispatch order.
///
/// The order matters: interrupt flushes strictly precede the new turn's
/// forwarded utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEffect {
    /// Emit a transcript event toward the wire encoder.
    Emit(TranscriptEvent),
    /// Dispatch a sentence-sized synthesis request.
    Synthesize(SynthesisRequest),
    /// Tell the synthesis sink to discard queued output.
    FlushSynthesis { flush_id: String },
    /// Tell the transport to discard not-yet-played downstream audio.
    FlushTransport { flush_id: String },
    /// Best-effort cancellation of the in-flight generation.
    CancelGeneration,
    /// Forward a finalized user utterance to the generation stage.
    ForwardUtterance { text: String, turn_id: u64 },
}

/// Pure turn-taking state machine.
///
/// Owns the [`Session`] and the sentence-fragment accumulator. Transitions
/// take the current monotonic timestamp so tests can drive them with a
/// simulated clock.
#[derive(Debug)]
pub struct TurnState {
    config: TurnConfig,
    session: Session,
    /// Unterminated tail of generated text awaiting a sentence boundary.
    sentence_fragment: String,
    /// Per-turn sequence number for synthesis request ids.
    synth_seq: u64,
}

impl TurnState {
    pub fn new(config: TurnConfig) -> Self {
        let session = Session {
            session_id: config.fallback_session_id.clone(),
            turn_id: 0,
            joined_users: 0,
        };
        Self {
            config,
            session,
            sentence_fragment: String::new(),
            synth_seq: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Apply one inbound event, returning the effects to dispatch.
    pub fn apply(&mut self, event: ControllerEvent, now_ms: u64) -> Vec<TurnEffect> {
        match event {
            ControllerEvent::UserJoined => self.on_user_joined(now_ms),
            ControllerEvent::UserLeft => self.on_user_left(),
            ControllerEvent::Recognition(result) => self.on_recognition_result(&result, now_ms),
            ControllerEvent::Generation(delta) => self.on_generation_delta(&delta, now_ms),
        }
    }

    /// A user joined the channel. The first join (0→1) greets the room: the
    /// greeting goes to synthesis and to the transcript as a final assistant
    /// line. Later joins only bump the counter.
    pub fn on_user_joined(&mut self, now_ms: u64) -> Vec<TurnEffect> {
        self.session.joined_users += 1;
        if self.session.joined_users != 1 {
            return Vec::new();
        }

        let greeting = self.config.greeting.clone();
        vec![
            TurnEffect::Synthesize(self.next_synthesis_request(greeting.clone(), true)),
            TurnEffect::Emit(TranscriptEvent {
                role: Role::Assistant,
                kind: TranscriptKind::Text,
                text: greeting,
                is_final: true,
                stream_id: self.config.assistant_stream_id,
                timestamp_ms: now_ms,
            }),
        ]
    }

    pub fn on_user_left(&mut self) -> Vec<TurnEffect> {
        self.session.joined_users = self.session.joined_users.saturating_sub(1);
        Vec::new()
    }

    /// Handle a recognition result from the speech recognizer.
    ///
    /// Barge-in triggers when the result is final or the partial text is long
    /// enough to be real speech: the sentence fragment is cleared and the
    /// generation, synthesis, and transport stages are told to drop the
    /// superseded turn's output. A final result then advances the turn and
    /// forwards the utterance as new generation input. Every result emits a
    /// user transcript event with the given finality.
    pub fn on_recognition_result(
        &mut self,
        result: &RecognitionResult,
        now_ms: u64,
    ) -> Vec<TurnEffect> {
        let stream_id = self.recognition_stream_id(&result.metadata);
        let mut effects = Vec::new();

        let interrupts =
            result.is_final || result.text.chars().count() > self.config.interrupt_min_chars;
        if interrupts {
            self.sentence_fragment.clear();
            let flush_id = Uuid::new_v4().to_string();
            effects.push(TurnEffect::CancelGeneration);
            effects.push(TurnEffect::FlushSynthesis {
                flush_id: flush_id.clone(),
            });
            effects.push(TurnEffect::FlushTransport { flush_id });
        }

        if result.is_final {
            self.session.turn_id += 1;
            self.synth_seq = 0;
            info!(
                turn_id = self.session.turn_id,
                "user utterance finalized, starting new turn"
            );
            effects.push(TurnEffect::ForwardUtterance {
                text: result.text.clone(),
                turn_id: self.session.turn_id,
            });
        }

        effects.push(TurnEffect::Emit(TranscriptEvent {
            role: Role::User,
            kind: TranscriptKind::Text,
            text: result.text.clone(),
            is_final: result.is_final,
            stream_id,
            timestamp_ms: now_ms,
        }));
        effects
    }

    /// Handle a streamed delta from the generation stage.
    ///
    /// Non-final message deltas run through sentence segmentation: each
    /// complete sentence becomes a synthesis request tagged with the current
    /// turn id, and the unterminated remainder is carried forward. Every
    /// delta emits an assistant transcript event on the broadcast stream.
    pub fn on_generation_delta(&mut self, delta: &GenerationDelta, now_ms: u64) -> Vec<TurnEffect> {
        let mut effects = Vec::new();

        if delta.kind == DeltaKind::Message && !delta.is_final {
            let buffered = format!("{}{}", self.sentence_fragment, delta.text);
            let segmented = segment::split_sentences(&buffered);
            for sentence in segmented.sentences {
                effects.push(TurnEffect::Synthesize(
                    self.next_synthesis_request(sentence, false),
                ));
            }
            self.sentence_fragment = segmented.remainder;
        }

        let kind = match delta.kind {
            DeltaKind::Message => TranscriptKind::Text,
            DeltaKind::Reasoning => TranscriptKind::Reasoning,
        };
        effects.push(TurnEffect::Emit(TranscriptEvent {
            role: Role::Assistant,
            kind,
            text: delta.text.clone(),
            is_final: delta.is_final,
            stream_id: self.config.assistant_stream_id,
            timestamp_ms: now_ms,
        }));
        effects
    }

    /// Derive the transport stream id for a recognized utterance and record
    /// the session id. Non-numeric session ids coerce to 0.
    fn recognition_stream_id(&mut self, metadata: &RecognitionMetadata) -> i64 {
        let session_id = metadata
            .session_id
            .clone()
            .unwrap_or_else(|| self.config.fallback_session_id.clone());
        let stream_id = session_id.parse().unwrap_or(0);
        self.session.session_id = session_id;
        stream_id
    }

    fn next_synthesis_request(&mut self, text: String, is_end_of_input: bool) -> SynthesisRequest {
        let request_id = format!("{}-{}", self.session.turn_id, self.synth_seq);
        self.synth_seq += 1;
        SynthesisRequest {
            request_id,
            text,
            is_end_of_input,
            turn_id: self.session.turn_id,
        }
    }
}

/// Channel handles for the stages downstream of the turn controller.
#[derive(Debug, Clone)]
pub struct TurnControllerHandles {
    pub synthesis_tx: mpsc::Sender<SynthesisCommand>,
    pub generation_tx: mpsc::Sender<GenerationCommand>,
    pub transport_tx: mpsc::Sender<TransportCommand>,
    /// Transcript events bound for the wire encoder.
    pub transcript_tx: mpsc::Sender<TranscriptEvent>,
}

/// Run the turn controller driver until the inbound channel closes.
///
/// Events are handled to completion, one at a time, so the state machine
/// never observes interleaved mutations. State is updated before any
/// dispatch is attempted; a failed dispatch is logged and skipped and can
/// never leave `turn_id` or the sentence fragment inconsistent.
pub async fn run_turn_controller(
    config: TurnConfig,
    mut events_rx: mpsc::Receiver<ControllerEvent>,
    handles: TurnControllerHandles,
) {
    let mut state = TurnState::new(config);
    let epoch = Instant::now();

    while let Some(event) = events_rx.recv().await {
        let now_ms = epoch.elapsed().as_millis() as u64;
        for effect in state.apply(event, now_ms) {
            dispatch_effect(effect, &handles).await;
        }
    }
    info!("turn controller input channel closed, stopping");
}

async fn dispatch_effect(effect: TurnEffect, handles: &TurnControllerHandles) {
    let result = match effect {
        TurnEffect::Emit(event) => handles
            .transcript_tx
            .send(event)
            .await
            .map_err(|e| format!("transcript encoder: {e}")),
        TurnEffect::Synthesize(request) => handles
            .synthesis_tx
            .send(SynthesisCommand::Speak(request))
            .await
            .map_err(|e| format!("synthesis sink: {e}")),
        TurnEffect::FlushSynthesis { flush_id } => handles
            .synthesis_tx
            .send(SynthesisCommand::Flush { flush_id })
            .await
            .map_err(|e| format!("synthesis sink: {e}")),
        TurnEffect::FlushTransport { flush_id } => handles
            .transport_tx
            .send(TransportCommand::Flush { flush_id })
            .await
            .map_err(|e| format!("transport: {e}")),
        TurnEffect::CancelGeneration => handles
            .generation_tx
            .send(GenerationCommand::Cancel)
            .await
            .map_err(|e| format!("generation stage: {e}")),
        TurnEffect::ForwardUtterance { text, turn_id } => handles
            .generation_tx
            .send(GenerationCommand::Generate { text, turn_id })
            .await
            .map_err(|e| format!("generation stage: {e}")),
    };

    // Transient dispatch failures must not abort the turn.
    if let Err(e) = result {
        warn!("dropping effect after dispatch failure: {e}");
    }
}
