//! Deterministic stand-in for the neural network.
//!
//! Blends the new part of the primary window with the sidechain using the
//! mean of harmony and rhythm as the mix amount. With both controls at zero
//! it is an exact passthrough of the primary input, which makes stream
//! alignment easy to test.

use tracing::debug;

use crate::buffering::StereoWindow;
use crate::error::{MorpherError, Result};
use crate::inference::{InferenceRequest, MorphModel};

#[derive(Debug, Clone)]
pub struct CrossfadeModel {
    window: usize,
}

impl CrossfadeModel {
    /// `window` is the number of output frames per inference.
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    fn mix_amount(request: &InferenceRequest) -> f32 {
        (0.5 * (request.harmony + request.rhythm)).clamp(0.0, 1.0)
    }
}

impl MorphModel for CrossfadeModel {
    fn name(&self) -> &str {
        "crossfade"
    }

    fn warm_up(&mut self) -> Result<()> {
        debug!("CrossfadeModel::warm_up: no-op");
        Ok(())
    }

    fn infer(&mut self, request: &InferenceRequest) -> Result<StereoWindow> {
        let n = self.window;
        if request.input_len() < n || request.sidechain.len() < n {
            return Err(MorpherError::Inference(format!(
                "crossfade needs {n} input frames, got {} / {}",
                request.input_len(),
                request.sidechain.len()
            )));
        }

        let mix = Self::mix_amount(request);
        let dry = 1.0 - mix;
        let blend = |a: &[f32], b: &[f32]| -> Vec<f32> {
            a[..n]
                .iter()
                .zip(&b[..n])
                .map(|(&p, &s)| dry * p + mix * s)
                .collect()
        };

        Ok(StereoWindow::from_channels(
            blend(&request.primary.left, &request.sidechain.left),
            blend(&request.primary.right, &request.sidechain.right),
        ))
    }

    fn reset(&mut self) {
        debug!("CrossfadeModel::reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn request(window: usize, cache: usize) -> InferenceRequest {
        let mut req = InferenceRequest::with_input_len(window + cache);
        for i in 0..window + cache {
            req.primary.left[i] = 1.0;
            req.primary.right[i] = -1.0;
            req.sidechain.left[i] = 0.5;
            req.sidechain.right[i] = 0.25;
        }
        req
    }

    #[test]
    fn zero_controls_pass_primary_through() {
        let mut model = CrossfadeModel::new(8);
        let out = model.infer(&request(8, 4)).expect("infer");
        assert!(out.has_len(8));
        assert!(out.left.iter().all(|&s| s == 1.0));
        assert!(out.right.iter().all(|&s| s == -1.0));
    }

    #[test]
    fn full_controls_select_sidechain() {
        let mut model = CrossfadeModel::new(8);
        let mut req = request(8, 4);
        req.harmony = 1.0;
        req.rhythm = 1.0;
        let out = model.infer(&req).expect("infer");
        assert!(out.left.iter().all(|&s| s == 0.5));
        assert!(out.right.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn half_mix_blends() {
        let mut model = CrossfadeModel::new(4);
        let mut req = request(4, 0);
        req.harmony = 0.5;
        req.rhythm = 0.5;
        let out = model.infer(&req).expect("infer");
        assert_relative_eq!(out.left[0], 0.75);
        assert_relative_eq!(out.right[0], -0.375);
    }

    #[test]
    fn short_input_is_an_error() {
        let mut model = CrossfadeModel::new(16);
        assert!(model.infer(&request(8, 0)).is_err());
    }
}
