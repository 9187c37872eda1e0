//! Planar stereo window passed between the stream and the model.

/// A contiguous block of planar stereo PCM samples.
///
/// Allocated at prepare/spawn time and reused; the real-time path only
/// copies into existing windows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StereoWindow {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl StereoWindow {
    /// A window of `len` silent frames.
    pub fn silent(len: usize) -> Self {
        Self {
            left: vec![0.0; len],
            right: vec![0.0; len],
        }
    }

    pub fn from_channels(left: Vec<f32>, right: Vec<f32>) -> Self {
        Self { left, right }
    }

    /// Frame count, or the shorter channel if they disagree.
    pub fn len(&self) -> usize {
        self.left.len().min(self.right.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` when both channels hold exactly `len` frames.
    pub fn has_len(&self, len: usize) -> bool {
        self.left.len() == len && self.right.len() == len
    }

    /// Zero every sample in place.
    pub fn silence(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
    }

    /// Returns `true` if every sample is finite (no NaN / ±inf).
    pub fn is_finite(&self) -> bool {
        self.left.iter().chain(&self.right).all(|s| s.is_finite())
    }
}
