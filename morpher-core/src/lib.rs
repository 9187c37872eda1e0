//! # morpher-core
//!
//! Real-time core of a neural audio morphing effect: a main stereo input is
//! blended with a sidechain by a model running off the audio thread.
//!
//! ## Architecture
//!
//! ```text
//! host callback ─► StreamCoordinator::process
//!                      │ push (lock)
//!                      ▼
//!          main ring ─┬─ sidechain ring
//!                     │ WINDOW+CACHE read, WINDOW consumed
//!                     ▼
//!          InferenceExecutor ──► worker thread: MorphModel::infer
//!                                      │ push WINDOW frames (lock)
//!                                      ▼
//!                                 output ring ─► host output
//!                                      │
//!                          broadcast::Sender<InferenceEvent>
//! ```
//!
//! The output ring starts with `output_delay - output_delay_bias` frames of
//! silence, which is the latency reported to the host. The callback never
//! waits on the model: a late result is an underrun and plays silence.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod inference;
pub mod ipc;
pub mod params;

// Convenience re-exports for downstream crates
pub use buffering::{RingBuffer, StereoWindow, StreamBuffers};
pub use engine::{DiagnosticsSnapshot, MorpherConfig, StreamCoordinator};
pub use error::MorpherError;
pub use inference::{CrossfadeModel, InferenceRequest, MorphModel};
pub use ipc::events::{InferenceEvent, InferenceOutcome};
pub use params::{ControlState, LinkAction, ParameterLinker};

#[cfg(feature = "onnx")]
pub use inference::{OnnxMorphModel, OnnxMorphModelConfig};
