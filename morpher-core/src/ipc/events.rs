//! Event types broadcast by the inference worker.
//!
//! Events are sent from the worker thread only, never from the audio
//! callback. Subscribers that fall behind lose the oldest events
//! (`tokio::sync::broadcast` lag semantics); the stream is unaffected.

use serde::{Deserialize, Serialize};

/// Emitted once per finished (or discarded) inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceEvent {
    /// Request sequence id assigned at submission.
    pub seq: u64,
    pub outcome: InferenceOutcome,
    /// Time from submission until the worker picked the request up.
    pub queue_ms: f64,
    /// Time spent inside the model.
    pub infer_ms: f64,
    /// Frames pushed into the output buffer (0 when discarded).
    pub frames: usize,
    /// Human-readable failure reason, if any.
    pub detail: Option<String>,
}

/// How an inference ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceOutcome {
    /// Model output was pushed unchanged.
    Completed,
    /// Model returned an error; silence was pushed.
    Failed,
    /// Model output had the wrong length or non-finite samples; silence was pushed.
    Malformed,
    /// Model panicked; silence was pushed.
    Panicked,
    /// Stream was reset or torn down while inferring; nothing was pushed.
    Discarded,
}

impl InferenceOutcome {
    /// `true` when the model's own output reached the stream.
    pub fn is_success(self) -> bool {
        self == InferenceOutcome::Completed
    }
}
