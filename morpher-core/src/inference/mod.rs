//! Morph model abstraction.
//!
//! The `MorphModel` trait decouples the stream from any specific backend
//! (deterministic crossfade, ONNX Runtime, ...). The executor moves the
//! model onto its worker thread, so implementations need `Send` but never
//! `Sync`; `&mut self` on `infer` lets backends keep recurrent state or
//! scratch tensors between calls.

pub mod crossfade;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::{OnnxMorphModel, OnnxMorphModelConfig};

pub use crossfade::CrossfadeModel;

use std::time::Instant;

use crate::buffering::StereoWindow;
use crate::error::Result;
use crate::params::ControlState;

/// One unit of work for the model: two input windows plus the controls
/// captured at submission time.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Monotonic id assigned by the executor.
    pub seq: u64,
    /// When the audio thread submitted the request.
    pub created_at: Instant,
    /// Main input, `window + cache` frames. The first `window` frames are the
    /// new audio; the remainder is trailing context.
    pub primary: StereoWindow,
    /// Sidechain input aligned with `primary`.
    pub sidechain: StereoWindow,
    pub rhythm: f32,
    pub harmony: f32,
    /// `1.0` when the sliders are linked, else `0.0`.
    pub sync: f32,
}

impl InferenceRequest {
    /// Pre-allocate a request whose windows hold `input_len` frames.
    pub fn with_input_len(input_len: usize) -> Self {
        Self {
            seq: 0,
            created_at: Instant::now(),
            primary: StereoWindow::silent(input_len),
            sidechain: StereoWindow::silent(input_len),
            rhythm: 0.0,
            harmony: 0.0,
            sync: 0.0,
        }
    }

    /// Frames per input window.
    pub fn input_len(&self) -> usize {
        self.primary.len()
    }

    /// Copy the scalar controls out of `controls`.
    pub fn set_controls(&mut self, controls: &ControlState) {
        self.rhythm = controls.rhythm;
        self.harmony = controls.harmony;
        self.sync = controls.sync_flag();
    }
}

/// Contract for morphing backends.
pub trait MorphModel: Send + 'static {
    /// Short backend name for logs.
    fn name(&self) -> &str {
        "model"
    }

    /// One-time warm-up: load weights, run a dummy pass. Called once on the
    /// worker thread before the first request.
    ///
    /// # Errors
    /// Returns an error if model files are missing or corrupt. The executor
    /// logs the failure and keeps running; later inferences then fail and
    /// degrade to silence.
    fn warm_up(&mut self) -> Result<()>;

    /// Produce one output window for `request`.
    ///
    /// The executor expects exactly `window` frames back. Anything else is
    /// treated as malformed and replaced with silence.
    fn infer(&mut self, request: &InferenceRequest) -> Result<StereoWindow>;

    /// Reset any internal state (e.g. between streams).
    fn reset(&mut self);
}

impl<M: MorphModel + ?Sized> MorphModel for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }

    fn infer(&mut self, request: &InferenceRequest) -> Result<StereoWindow> {
        (**self).infer(request)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}
