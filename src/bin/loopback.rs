//! Loopback harness: drives a scripted conversation through the full
//! protocol path — turn controller → wire encoder → in-process "transport"
//! → reassembly → ordered thread — and prints the resulting transcript.
//!
//! The transport stage deliberately reverses each burst of fragments to
//! exercise out-of-order reassembly.

use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use turnwire::messages::{
    ControllerEvent, DeltaKind, GenerationDelta, RecognitionMetadata, RecognitionResult,
    TransportCommand,
};
use turnwire::{ChatThread, ProtocolConfig, TurnControllerHandles};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("turnwire=info")),
        )
        .init();

    let config = ProtocolConfig::default();

    let (events_tx, events_rx) = mpsc::channel(32);
    let (synthesis_tx, mut synthesis_rx) = mpsc::channel(32);
    let (generation_tx, mut generation_rx) = mpsc::channel(32);
    let (transport_tx, mut transport_rx) = mpsc::channel(32);
    let (transcript_tx, transcript_rx) = mpsc::channel(32);
    let (inbound_tx, inbound_rx) = mpsc::channel(32);
    let (decoded_tx, mut decoded_rx) = mpsc::channel(32);
    let (actions_tx, mut actions_rx) = mpsc::channel(32);

    let controller = tokio::spawn(turnwire::run_turn_controller(
        config.turn.clone(),
        events_rx,
        TurnControllerHandles {
            synthesis_tx,
            generation_tx,
            transport_tx: transport_tx.clone(),
            transcript_tx,
        },
    ));
    let encoder = tokio::spawn(turnwire::wire::run_encoder(
        config.wire.max_fragment_chars,
        transcript_rx,
        transport_tx,
    ));
    let reassembly = tokio::spawn(turnwire::run_reassembly(
        config.wire.clone(),
        inbound_rx,
        decoded_tx,
        actions_tx,
    ));

    // Lossless in-process transport that reverses fragment order per burst.
    let transport = tokio::spawn(async move {
        let mut burst = Vec::new();
        while let Some(command) = transport_rx.recv().await {
            match command {
                TransportCommand::Send(frame) => burst.push(frame),
                TransportCommand::Flush { flush_id } => {
                    info!(%flush_id, "transport flush");
                }
            }
            if transport_rx.is_empty() {
                for frame in burst.drain(..).rev() {
                    if inbound_tx.send(frame.into_bytes()).await.is_err() {
                        return;
                    }
                }
            }
        }
        for frame in burst.drain(..).rev() {
            let _ = inbound_tx.send(frame.into_bytes()).await;
        }
    });

    // Downstream sinks: log what the synthesizer and generator would see.
    let synthesis = tokio::spawn(async move {
        while let Some(command) = synthesis_rx.recv().await {
            info!(?command, "synthesis sink");
        }
    });
    let generation = tokio::spawn(async move {
        while let Some(command) = generation_rx.recv().await {
            info!(?command, "generation stage");
        }
    });
    let actions = tokio::spawn(async move {
        while let Some(action) = actions_rx.recv().await {
            info!(?action, "side action");
        }
    });

    // Scripted conversation: join, barge-in partials, a finalized question,
    // then a streamed two-delta answer.
    let script = [
        ControllerEvent::UserJoined,
        ControllerEvent::Recognition(recognition("wh", false)),
        ControllerEvent::Recognition(recognition("what's the", false)),
        ControllerEvent::Recognition(recognition("what's the weather like?", true)),
        ControllerEvent::Generation(delta("It's sunny, around 22 deg", false)),
        ControllerEvent::Generation(delta("rees. Bring sunglasses!", false)),
        ControllerEvent::Generation(delta("", true)),
    ];
    for event in script {
        events_tx.send(event).await?;
    }
    drop(events_tx);
    controller.await?;
    encoder.await?;
    transport.await?;
    reassembly.await?;

    let mut thread = ChatThread::new();
    while let Some(event) = decoded_rx.recv().await {
        thread.add_event(event);
    }

    synthesis.await?;
    generation.await?;
    actions.await?;

    println!("--- transcript ({} lines) ---", thread.len());
    for entry in thread.entries() {
        let marker = if entry.is_final { " " } else { "…" };
        println!(
            "[{:>6}ms] {:?}{marker} {}",
            entry.timestamp_ms, entry.role, entry.text
        );
    }
    Ok(())
}

fn recognition(text: &str, is_final: bool) -> RecognitionResult {
    RecognitionResult {
        text: text.to_owned(),
        is_final,
        metadata: RecognitionMetadata {
            session_id: Some("7".to_owned()),
        },
    }
}

fn delta(text: &str, is_final: bool) -> GenerationDelta {
    GenerationDelta {
        text: text.to_owned(),
        is_final,
        kind: DeltaKind::Message,
    }
}
