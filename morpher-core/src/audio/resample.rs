//! Stereo sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! The offline renderer feeds the stream at the main input's rate. A
//! sidechain recorded at a different rate goes through [`resample_clip`]
//! first. Equal rates are a passthrough and create no rubato session.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::info;

use crate::audio::StereoClip;
use crate::error::{MorpherError, Result};

/// Input frames per rubato call used by [`resample_clip`].
const CLIP_CHUNK: usize = 1024;

/// Converts planar stereo f32 audio between two fixed rates.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Partial input kept between calls, one `Vec` per channel.
    input_buf: [Vec<f32>; 2],
    chunk_size: usize,
    /// `[2][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `MorpherError::Resample` if a rate is zero or rubato fails to
    /// initialise.
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 || chunk_size == 0 {
            return Err(MorpherError::Resample(format!(
                "invalid conversion {from_rate} Hz -> {to_rate} Hz (chunk {chunk_size})"
            )));
        }
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                input_buf: [Vec::new(), Vec::new()],
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = f64::from(to_rate) / f64::from(from_rate);
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 2)
            .map_err(|e| MorpherError::Resample(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        info!(from_rate, to_rate, chunk_size, max_out, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: [Vec::new(), Vec::new()],
            chunk_size,
            output_buf: vec![vec![0.0; max_out]; 2],
        })
    }

    /// Feed frames, returning whatever full chunks produced (may be empty).
    /// A remainder shorter than `chunk_size` waits for the next call.
    pub fn process(&mut self, left: &[f32], right: &[f32]) -> Result<(Vec<f32>, Vec<f32>)> {
        let n = left.len().min(right.len());
        if self.resampler.is_none() {
            return Ok((left[..n].to_vec(), right[..n].to_vec()));
        }
        self.input_buf[0].extend_from_slice(&left[..n]);
        self.input_buf[1].extend_from_slice(&right[..n]);
        self.drain_chunks()
    }

    /// Pad the pending remainder with silence to one full chunk and convert
    /// it. Repeated calls keep pushing silence through the filter.
    pub fn flush(&mut self) -> Result<(Vec<f32>, Vec<f32>)> {
        if self.resampler.is_none() {
            return Ok((Vec::new(), Vec::new()));
        }
        let target = self.input_buf[0].len().div_ceil(self.chunk_size).max(1) * self.chunk_size;
        for channel in &mut self.input_buf {
            channel.resize(target, 0.0);
        }
        self.drain_chunks()
    }

    /// Output frames the filter lags its input by.
    pub fn output_delay(&self) -> usize {
        self.resampler.as_ref().map_or(0, |r| r.output_delay())
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    fn drain_chunks(&mut self) -> Result<(Vec<f32>, Vec<f32>)> {
        let mut out_left = Vec::new();
        let mut out_right = Vec::new();
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok((out_left, out_right));
        };

        let mut start = 0;
        while self.input_buf[0].len() - start >= self.chunk_size {
            let end = start + self.chunk_size;
            let chunk = [&self.input_buf[0][start..end], &self.input_buf[1][start..end]];
            let (_consumed, produced) = resampler
                .process_into_buffer(&chunk, &mut self.output_buf, None)
                .map_err(|e| MorpherError::Resample(e.to_string()))?;
            out_left.extend_from_slice(&self.output_buf[0][..produced]);
            out_right.extend_from_slice(&self.output_buf[1][..produced]);
            start = end;
        }
        for channel in &mut self.input_buf {
            channel.drain(..start);
        }

        Ok((out_left, out_right))
    }
}

/// Convert a whole clip to `to_rate`, compensating the filter delay so the
/// result lines up with the source and has `round(len · to / from)` frames.
pub fn resample_clip(clip: &StereoClip, to_rate: u32) -> Result<StereoClip> {
    if clip.sample_rate == to_rate {
        return Ok(clip.clone());
    }

    let mut converter = RateConverter::new(clip.sample_rate, to_rate, CLIP_CHUNK)?;
    let delay = converter.output_delay();
    let from = u64::from(clip.sample_rate);
    let expected = ((clip.len() as u64 * u64::from(to_rate) + from / 2) / from) as usize;

    let (mut left, mut right) = converter.process(&clip.left, &clip.right)?;
    while left.len() < delay + expected {
        let (tail_left, tail_right) = converter.flush()?;
        if tail_left.is_empty() {
            break;
        }
        left.extend(tail_left);
        right.extend(tail_right);
    }

    let mut out = StereoClip {
        sample_rate: to_rate,
        left,
        right,
    };
    out.trim_front(delay);
    out.resize(expected);
    Ok(out)
}
