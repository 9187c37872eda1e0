//! Offline audio I/O.
//!
//! The stream itself never touches files or devices; the host owns those.
//! These helpers exist for offline rendering: loading stereo clips from WAV
//! and bringing a sidechain recorded at another rate onto the main rate.
//! Both allocate freely and must stay off the audio callback.

pub mod resample;
pub mod wav;

pub use resample::{resample_clip, RateConverter};
pub use wav::{read_wav, read_wav_from, write_wav, write_wav_to, StereoClip};
