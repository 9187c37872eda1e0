//! Stereo WAV loading and writing via `hound`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::{debug, warn};

use crate::error::{MorpherError, Result};

/// A planar stereo clip with its sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoClip {
    pub sample_rate: u32,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl StereoClip {
    pub fn silent(sample_rate: u32, frames: usize) -> Self {
        Self {
            sample_rate,
            left: vec![0.0; frames],
            right: vec![0.0; frames],
        }
    }

    /// Frame count.
    pub fn len(&self) -> usize {
        self.left.len().min(self.right.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / f64::from(self.sample_rate)
    }

    /// Extend with silence, or truncate, to exactly `frames`.
    pub fn resize(&mut self, frames: usize) {
        self.left.resize(frames, 0.0);
        self.right.resize(frames, 0.0);
    }

    /// Drop the first `frames` frames (saturating).
    pub fn trim_front(&mut self, frames: usize) {
        let n = frames.min(self.left.len());
        self.left.drain(..n);
        let n = frames.min(self.right.len());
        self.right.drain(..n);
    }

    /// Largest absolute sample across both channels.
    pub fn peak(&self) -> f32 {
        self.left
            .iter()
            .chain(&self.right)
            .fold(0.0f32, |peak, s| peak.max(s.abs()))
    }
}

/// Read a WAV file as stereo. Mono files are duplicated to both channels;
/// files with more than two channels keep the first two.
///
/// # Errors
/// `MorpherError::Wav` when the file is unreadable or malformed.
pub fn read_wav(path: impl AsRef<Path>) -> Result<StereoClip> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let clip = read_wav_from(BufReader::new(file))?;
    debug!(
        path = %path.display(),
        frames = clip.len(),
        sample_rate = clip.sample_rate,
        "wav loaded"
    );
    Ok(clip)
}

pub fn read_wav_from<R: Read>(reader: R) -> Result<StereoClip> {
    let mut reader = WavReader::new(reader)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels);
    if channels == 0 {
        return Err(MorpherError::InvalidConfig("wav has zero channels".into()));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    if channels > 2 {
        warn!(channels, "wav has more than two channels; keeping the first two");
    }

    let frames = interleaved.len() / channels;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for frame in interleaved.chunks_exact(channels) {
        left.push(frame[0]);
        right.push(if channels == 1 { frame[0] } else { frame[1] });
    }

    Ok(StereoClip {
        sample_rate: spec.sample_rate,
        left,
        right,
    })
}

/// Write `clip` as 32-bit float stereo.
pub fn write_wav(path: impl AsRef<Path>, clip: &StereoClip) -> Result<()> {
    let file = File::create(path.as_ref())?;
    write_wav_to(BufWriter::new(file), clip)
}

pub fn write_wav_to<W: Write + Seek>(writer: W, clip: &StereoClip) -> Result<()> {
    let spec = WavSpec {
        channels: 2,
        sample_rate: clip.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::new(writer, spec)?;
    for (&l, &r) in clip.left.iter().zip(&clip.right) {
        writer.write_sample(l)?;
        writer.write_sample(r)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn float_stereo_survives_write_and_read() {
        let clip = StereoClip {
            sample_rate: 44_100,
            left: vec![0.25, -0.5, 1.0],
            right: vec![0.0, 0.125, -1.0],
        };
        let mut bytes = Cursor::new(Vec::new());
        write_wav_to(&mut bytes, &clip).expect("write");

        let read = read_wav_from(Cursor::new(bytes.into_inner())).expect("read");
        assert_eq!(read, clip);
    }

    #[test]
    fn mono_int_wav_is_duplicated_and_scaled() {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut bytes = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut bytes, spec).expect("writer");
            writer.write_sample(16_384i16).expect("sample");
            writer.write_sample(-32_768i16).expect("sample");
            writer.finalize().expect("finalize");
        }

        let clip = read_wav_from(Cursor::new(bytes.into_inner())).expect("read");
        assert_eq!(clip.sample_rate, 48_000);
        assert_eq!(clip.left, vec![0.5, -1.0]);
        assert_eq!(clip.left, clip.right);
    }

    #[test]
    fn resize_pads_with_silence_and_trim_front_saturates() {
        let mut clip = StereoClip {
            sample_rate: 8_000,
            left: vec![1.0, 2.0],
            right: vec![3.0, 4.0],
        };
        clip.resize(4);
        assert_eq!(clip.left, vec![1.0, 2.0, 0.0, 0.0]);
        assert_eq!(clip.duration_secs(), 4.0 / 8_000.0);

        clip.trim_front(3);
        assert_eq!(clip.right, vec![0.0]);
        clip.trim_front(10);
        assert!(clip.is_empty());
    }

    #[test]
    fn peak_spans_both_channels() {
        let clip = StereoClip {
            sample_rate: 8_000,
            left: vec![0.1, -0.2],
            right: vec![-0.9, 0.3],
        };
        assert_eq!(clip.peak(), 0.9);
        assert_eq!(StereoClip::silent(8_000, 4).peak(), 0.0);
    }
}
