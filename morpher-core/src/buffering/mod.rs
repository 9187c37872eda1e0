//! Stereo FIFO buffers shared between the audio callback and the inference worker.
//!
//! `RingBuffer` has no locking of its own. Every call site goes through the
//! single `parking_lot::Mutex` wrapping [`StreamBuffers`], and that lock is
//! held only while frames are copied in or out.
//!
//! Frames are stored in a `ringbuf::HeapRb<(f32, f32)>` allocated once at
//! prepare time; no operation here allocates.

pub mod window;

use std::sync::Arc;

use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer, Producer},
    HeapRb,
};

pub use window::StereoWindow;

/// One stereo sample pair `(left, right)`.
pub type Frame = (f32, f32);

const SILENCE: Frame = (0.0, 0.0);

/// Fixed-capacity stereo FIFO with peek-ahead reads.
///
/// Pushing past capacity discards the oldest unread frames, so `len()` never
/// exceeds `capacity()`.
pub struct RingBuffer {
    frames: HeapRb<Frame>,
    capacity: usize,
}

impl RingBuffer {
    /// Allocate a buffer holding up to `capacity` frames per channel.
    ///
    /// A zero capacity is rounded up to one frame.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: HeapRb::new(capacity),
            capacity,
        }
    }

    /// Append `min(left.len(), right.len())` frames, overwriting the oldest
    /// if the buffer overflows. Returns the number of frames accepted.
    pub fn push(&mut self, left: &[f32], right: &[f32]) -> usize {
        self.push_scaled(left, right, 1.0)
    }

    /// Like [`push`](Self::push), multiplying every sample by `gain`.
    pub fn push_scaled(&mut self, left: &[f32], right: &[f32], gain: f32) -> usize {
        let n = left.len().min(right.len());
        debug_assert_eq!(left.len(), right.len(), "channel length mismatch");
        self.push_frames(
            left[..n]
                .iter()
                .zip(&right[..n])
                .map(|(&l, &r)| (l * gain, r * gain)),
        );
        n
    }

    /// Append `n` silent frames.
    pub fn fill_zeros(&mut self, n: usize) {
        self.push_frames(std::iter::repeat_n(SILENCE, n));
    }

    /// Copy `out_left.len()` frames starting `offset` frames after the oldest
    /// retained frame, without removing them.
    ///
    /// Returns `false` and leaves both outputs untouched when fewer than
    /// `offset + n` frames are stored.
    pub fn read(&self, out_left: &mut [f32], out_right: &mut [f32], offset: usize) -> bool {
        let n = out_left.len().min(out_right.len());
        if self.len() < offset + n {
            return false;
        }

        for ((l, r), &(fl, fr)) in out_left[..n]
            .iter_mut()
            .zip(out_right[..n].iter_mut())
            .zip(self.frames.iter().skip(offset))
        {
            *l = fl;
            *r = fr;
        }
        true
    }

    /// Drop the `n` oldest frames (saturating at `len()`).
    pub fn consume(&mut self, n: usize) -> usize {
        self.frames.skip(n.min(self.len()))
    }

    /// Empty the buffer and zero its storage.
    pub fn clear(&mut self) {
        self.frames.clear();
        // Overwrite every slot once so no stale audio survives a reset.
        self.frames
            .push_iter(std::iter::repeat_n(SILENCE, self.capacity));
        self.frames.clear();
    }

    /// Number of frames currently stored.
    pub fn len(&self) -> usize {
        self.frames.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn push_frames<I>(&mut self, frames: I)
    where
        I: ExactSizeIterator<Item = Frame>,
    {
        let n = frames.len();
        // Only the newest `capacity` frames of an oversized push can survive.
        let keep = n.min(self.capacity);
        let overflow = (self.len() + keep).saturating_sub(self.capacity);
        if overflow > 0 {
            self.frames.skip(overflow);
        }
        self.frames.push_iter(frames.skip(n - keep));
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// The three FIFOs guarded by the stream lock.
#[derive(Debug)]
pub struct StreamBuffers {
    /// Main (primary) input, pushed by the audio callback.
    pub main_input: RingBuffer,
    /// Sidechain input, pushed by the audio callback.
    pub sidechain_input: RingBuffer,
    /// Model output, pushed by the worker and drained by the callback.
    pub output: RingBuffer,
}

impl StreamBuffers {
    pub fn new(input_capacity: usize, output_capacity: usize) -> Self {
        Self {
            main_input: RingBuffer::new(input_capacity),
            sidechain_input: RingBuffer::new(input_capacity),
            output: RingBuffer::new(output_capacity),
        }
    }

    pub fn clear(&mut self) {
        self.main_input.clear();
        self.sidechain_input.clear();
        self.output.clear();
    }
}

/// Handle to the lock-guarded stream buffers.
pub type SharedBuffers = Arc<Mutex<StreamBuffers>>;

/// Allocate a fresh set of stream buffers behind the shared lock.
pub fn create_stream_buffers(input_capacity: usize, output_capacity: usize) -> SharedBuffers {
    Arc::new(Mutex::new(StreamBuffers::new(
        input_capacity,
        output_capacity,
    )))
}
