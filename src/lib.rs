//! Turnwire: real-time conversational turn-taking and transcript streaming
//! for voice agents.
//!
//! Two subsystems connected only by a best-effort data channel:
//!
//! - **Producer**: the turn controller consumes recognition results and
//!   generation deltas, owns session/turn identity, detects barge-in,
//!   segments streaming text into sentence-sized synthesis requests, and
//!   emits transcript events that the wire encoder frames into fragments.
//! - **Consumer**: the reassembly cache rebuilds fragmented, out-of-order
//!   messages (evicting abandoned partials on a deadline) and the ordered
//!   thread merges decoded events into a display-ready transcript.
//!
//! # Architecture
//!
//! Stages are independent async tasks joined by bounded mpsc channels:
//!
//! ```text
//! events → turn controller → encoder → transport → reassembly → thread
//!               ↓ sentences                             ↓ side actions
//!          synthesis sink                            host UI
//! ```
//!
//! The state-bearing cores ([`turn::TurnState`],
//! [`wire::reassembly::ReassemblyCache`], [`transcript::ChatThread`]) are
//! pure with respect to time and transport, so turn/interrupt and timeout
//! logic are unit-testable without a live channel.

pub mod config;
pub mod error;
pub mod messages;
pub mod transcript;
pub mod turn;
pub mod wire;

pub use config::{ProtocolConfig, TurnConfig, WireConfig};
pub use error::{ProtocolError, Result};
pub use messages::{Role, SideAction, TranscriptEvent, TranscriptKind};
pub use transcript::ChatThread;
pub use turn::{TurnControllerHandles, TurnEffect, TurnState, run_turn_controller};
pub use wire::reassembly::{ReassemblyCache, run_reassembly};
