//! The body of the host's audio callback: [`StreamCoordinator`].
//!
//! ## Lifecycle
//!
//! ```text
//! StreamCoordinator::new()       → config checked, worker spawned
//!     └─► prepare(rate, block)   → buffers sized, output seeded with latency
//!         └─► process() ...      → one call per host block
//!             └─► reset()        → stream restart, in-flight result dropped
//! drop                           → worker stopped and joined
//! ```
//!
//! ## Per-callback procedure
//!
//! ```text
//! 1. lock: push main → input ring 1, sidechain → input ring 2
//! 2. link harmony/rhythm (sync mode)
//! 3. if new ≥ WINDOW && ring 1 ≥ WINDOW+CACHE && !busy:
//!        lock: read WINDOW+CACHE, consume WINDOW, submit request
//! 4. lock: output ring ≥ N ? copy N : silence
//! 5. remember harmony/rhythm for the next edge check
//! ```
//!
//! Nothing here blocks on the worker or allocates once prepared. The only
//! synchronisation with the worker is the stream lock around buffer copies
//! and the executor's atomic busy flag.

pub mod diagnostics;
pub mod executor;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    buffering::{create_stream_buffers, SharedBuffers, StereoWindow, StreamBuffers},
    error::{MorpherError, Result},
    inference::MorphModel,
    ipc::events::InferenceEvent,
    params::{ControlState, ParameterLinker},
};

pub use diagnostics::{DiagnosticsSnapshot, StreamDiagnostics};
pub use executor::{ExecutorSettings, ExecutorState, InferenceExecutor};

/// New frames consumed by each inference.
pub const DEFAULT_WINDOW: usize = 1024;
/// Trailing context frames handed to the model beyond the new window.
pub const DEFAULT_CACHE: usize = 256;
/// Fixed output delay budget for inference round trips.
pub const DEFAULT_OUTPUT_DELAY: usize = 2048;
/// Known constant offset trimmed from the reported latency.
pub const DEFAULT_OUTPUT_DELAY_BIAS: usize = 128;

/// Inference event channel capacity.
const EVENT_CAP: usize = 256;

/// Stream constants for [`StreamCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct MorpherConfig {
    /// New frames per inference request (and output frames per result).
    /// Default: 1024.
    pub window: usize,
    /// Extra trailing frames read with each window but not consumed.
    /// Default: 256.
    pub cache: usize,
    /// Output delay in frames. Default: 2048.
    pub output_delay: usize,
    /// Subtracted from `output_delay` for the reported latency. Default: 128.
    pub output_delay_bias: usize,
    /// Input ring capacity in frames. `None` derives it from the window and
    /// the host's maximum block size.
    pub input_capacity: Option<usize>,
    /// Output ring capacity in frames. `None` derives it likewise.
    pub output_capacity: Option<usize>,
}

impl Default for MorpherConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            cache: DEFAULT_CACHE,
            output_delay: DEFAULT_OUTPUT_DELAY,
            output_delay_bias: DEFAULT_OUTPUT_DELAY_BIAS,
            input_capacity: None,
            output_capacity: None,
        }
    }
}

impl MorpherConfig {
    /// Latency reported to the host, in frames.
    pub fn latency_samples(&self) -> usize {
        self.output_delay.saturating_sub(self.output_delay_bias)
    }

    /// Frames per input window handed to the model.
    pub fn input_window(&self) -> usize {
        self.window + self.cache
    }

    /// Frames pushed, in blocks of `max_block_size`, before the first
    /// request can fire.
    pub fn startup_frames(&self, max_block_size: usize) -> usize {
        let block = max_block_size.max(1);
        self.input_window().div_ceil(block) * block
    }

    /// `true` when the seeded delay lasts until the first result can land,
    /// so an instant model never underruns at startup.
    pub fn latency_covers_startup(&self, max_block_size: usize) -> bool {
        self.latency_samples() >= self.startup_frames(max_block_size)
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            window: self.window,
            cache: self.cache,
        }
    }

    /// Check the block-size independent constants.
    ///
    /// # Errors
    /// `MorpherError::InvalidConfig` describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(MorpherError::InvalidConfig("window must be > 0".into()));
        }
        if self.output_delay_bias > self.output_delay {
            return Err(MorpherError::InvalidConfig(format!(
                "output delay bias {} exceeds output delay {}",
                self.output_delay_bias, self.output_delay
            )));
        }
        Ok(())
    }

    /// Ring capacities for a host block size of at most `max_block_size`.
    ///
    /// # Errors
    /// `MorpherError::InvalidConfig` if the constants are inconsistent or an
    /// explicit capacity cannot hold the worst-case accumulation.
    pub fn capacities(&self, max_block_size: usize) -> Result<(usize, usize)> {
        self.validate()?;
        if max_block_size == 0 {
            return Err(MorpherError::InvalidConfig(
                "max block size must be > 0".into(),
            ));
        }

        let min_input = self.input_window() + max_block_size;
        let input = self
            .input_capacity
            .unwrap_or(4 * self.input_window() + max_block_size);
        if input < min_input {
            return Err(MorpherError::InvalidConfig(format!(
                "input capacity {input} < window + cache + block ({min_input})"
            )));
        }

        let min_output = self.latency_samples() + self.window;
        let output = self
            .output_capacity
            .unwrap_or(self.latency_samples() + 4 * self.window + max_block_size);
        if output < min_output {
            return Err(MorpherError::InvalidConfig(format!(
                "output capacity {output} < latency + window ({min_output})"
            )));
        }

        Ok((input, output))
    }
}

/// Host-side details captured by `prepare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub max_block_size: usize,
}

/// Planar per-channel scratch for interleaved I/O.
#[derive(Debug, Default)]
struct InterleaveScratch {
    main_left: Vec<f32>,
    main_right: Vec<f32>,
    side_left: Vec<f32>,
    side_right: Vec<f32>,
}

impl InterleaveScratch {
    fn resize(&mut self, frames: usize) {
        for buf in [
            &mut self.main_left,
            &mut self.main_right,
            &mut self.side_left,
            &mut self.side_right,
        ] {
            buf.clear();
            buf.resize(frames, 0.0);
        }
    }
}

/// Drives the buffers, the linker and the inference executor from the audio
/// callback.
pub struct StreamCoordinator {
    config: MorpherConfig,
    buffers: SharedBuffers,
    executor: InferenceExecutor,
    linker: ParameterLinker,
    diagnostics: Arc<StreamDiagnostics>,
    events_tx: broadcast::Sender<InferenceEvent>,
    /// Request staging, `window + cache` frames each.
    primary_window: StereoWindow,
    sidechain_window: StereoWindow,
    scratch: InterleaveScratch,
    /// Frames pushed since the last request, capped at the input capacity.
    new_samples: usize,
    input_capacity: usize,
    format: Option<StreamFormat>,
}

impl StreamCoordinator {
    /// Check `config` and start the inference worker with `model`.
    ///
    /// The stream outputs silence until [`prepare`](Self::prepare) is called.
    ///
    /// # Errors
    /// `MorpherError::InvalidConfig` for inconsistent constants, or
    /// `MorpherError::WorkerSpawn` if the worker thread cannot start.
    pub fn new<M: MorphModel>(config: MorpherConfig, model: M) -> Result<Self> {
        config.validate()?;

        let buffers = create_stream_buffers(config.input_window(), config.latency_samples());
        let diagnostics = Arc::new(StreamDiagnostics::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAP);

        let executor = InferenceExecutor::spawn(
            model,
            Arc::clone(&buffers),
            config.executor_settings(),
            Arc::clone(&diagnostics),
            events_tx.clone(),
        )?;

        let input_window = config.input_window();
        Ok(Self {
            primary_window: StereoWindow::silent(input_window),
            sidechain_window: StereoWindow::silent(input_window),
            config,
            buffers,
            executor,
            linker: ParameterLinker::default(),
            diagnostics,
            events_tx,
            scratch: InterleaveScratch::default(),
            new_samples: 0,
            input_capacity: input_window,
            format: None,
        })
    }

    /// Size and clear the buffers for a new stream, then seed the output
    /// with `latency_samples()` frames of silence.
    ///
    /// Allocates; call from the host's prepare hook, never from the audio
    /// callback.
    ///
    /// # Errors
    /// `MorpherError::InvalidConfig` if the ring capacities cannot hold
    /// `max_block_size` frames of accumulation.
    pub fn prepare(&mut self, sample_rate: u32, max_block_size: usize) -> Result<()> {
        let (input_capacity, output_capacity) = self.config.capacities(max_block_size)?;
        let latency = self.config.latency_samples();
        if !self.config.latency_covers_startup(max_block_size) {
            warn!(
                latency,
                startup_frames = self.config.startup_frames(max_block_size),
                max_block_size,
                "reported latency ends before the first inference can land; \
                 expect underruns that shift the output"
            );
        }

        {
            let mut buffers = self.buffers.lock();
            self.executor.invalidate_in_flight();
            if buffers.main_input.capacity() == input_capacity
                && buffers.output.capacity() == output_capacity
            {
                buffers.clear();
            } else {
                *buffers = StreamBuffers::new(input_capacity, output_capacity);
            }
            buffers.output.fill_zeros(latency);
        }

        self.scratch.resize(max_block_size);
        self.new_samples = 0;
        self.input_capacity = input_capacity;
        self.diagnostics.reset();
        self.format = Some(StreamFormat {
            sample_rate,
            max_block_size,
        });

        info!(
            sample_rate,
            max_block_size,
            latency,
            input_capacity,
            output_capacity,
            "stream prepared"
        );
        Ok(())
    }

    /// Restart the stream without reallocating: clear every buffer, drop
    /// any in-flight result and re-seed the output delay.
    pub fn reset(&mut self, controls: &ControlState) {
        {
            let mut buffers = self.buffers.lock();
            self.executor.invalidate_in_flight();
            buffers.clear();
            if self.format.is_some() {
                buffers.output.fill_zeros(self.config.latency_samples());
            }
        }
        self.new_samples = 0;
        self.linker.reset(controls);
        info!("stream reset");
    }

    /// Process one planar block in place.
    ///
    /// `left`/`right` carry the main input and receive the output.
    /// A missing or short sidechain is padded with silence.
    pub fn process(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        sidechain: Option<(&[f32], &[f32])>,
        controls: &mut ControlState,
    ) {
        let n = left.len().min(right.len());
        debug_assert_eq!(left.len(), right.len(), "main channel length mismatch");

        if self.format.is_none() {
            left.fill(0.0);
            right.fill(0.0);
            return;
        }

        StreamDiagnostics::bump(&self.diagnostics.callbacks);
        StreamDiagnostics::add(&self.diagnostics.frames_in, n);

        let gains = controls.clamped();
        {
            let mut buffers = self.buffers.lock();
            buffers
                .main_input
                .push_scaled(&left[..n], &right[..n], gains.source_gain);

            let pushed = match sidechain {
                Some((side_left, side_right)) => {
                    let m = side_left.len().min(side_right.len()).min(n);
                    buffers.sidechain_input.push_scaled(
                        &side_left[..m],
                        &side_right[..m],
                        gains.sidechain_gain,
                    )
                }
                None => 0,
            };
            if pushed < n {
                buffers.sidechain_input.fill_zeros(n - pushed);
            }
        }
        self.new_samples = (self.new_samples + n).min(self.input_capacity);

        self.linker.link(controls);
        self.maybe_request_inference(controls);

        {
            let mut buffers = self.buffers.lock();
            if buffers.output.len() >= n
                && buffers.output.read(&mut left[..n], &mut right[..n], 0)
            {
                buffers.output.consume(n);
                StreamDiagnostics::add(&self.diagnostics.frames_out, n);
            } else {
                left[..n].fill(0.0);
                right[..n].fill(0.0);
                StreamDiagnostics::bump(&self.diagnostics.underruns);
                StreamDiagnostics::add(&self.diagnostics.underrun_frames, n);
            }
        }
        left[n..].fill(0.0);
        right[n..].fill(0.0);

        self.linker.commit(controls);
    }

    /// Process one interleaved stereo block (`[l, r, l, r, ...]`) in place.
    ///
    /// Blocks longer than the prepared maximum are handled in chunks.
    pub fn process_interleaved(
        &mut self,
        main: &mut [f32],
        sidechain: Option<&[f32]>,
        controls: &mut ControlState,
    ) {
        let Some(format) = self.format else {
            main.fill(0.0);
            return;
        };

        let frames = main.len() / 2;
        let side_frames = sidechain.map_or(0, |s| s.len() / 2);
        let mut scratch = std::mem::take(&mut self.scratch);

        let mut start = 0;
        while start < frames {
            let len = (frames - start).min(format.max_block_size);
            let main_chunk = &mut main[2 * start..2 * (start + len)];

            for (i, frame) in main_chunk.chunks_exact(2).enumerate() {
                scratch.main_left[i] = frame[0];
                scratch.main_right[i] = frame[1];
            }

            // Frames of this chunk the sidechain still covers; the rest is
            // padded with silence by `process`.
            let side_len = side_frames.saturating_sub(start).min(len);
            if let Some(side) = sidechain.filter(|_| side_len > 0) {
                for (i, frame) in side[2 * start..2 * (start + side_len)]
                    .chunks_exact(2)
                    .enumerate()
                {
                    scratch.side_left[i] = frame[0];
                    scratch.side_right[i] = frame[1];
                }
            }

            let side = sidechain.map(|_| {
                (
                    &scratch.side_left[..side_len],
                    &scratch.side_right[..side_len],
                )
            });
            let (main_left, main_right) = (
                &mut scratch.main_left[..len],
                &mut scratch.main_right[..len],
            );
            self.process(main_left, main_right, side, controls);

            for (i, frame) in main_chunk.chunks_exact_mut(2).enumerate() {
                frame[0] = scratch.main_left[i];
                frame[1] = scratch.main_right[i];
            }
            start += len;
        }

        // An odd trailing sample is not a full frame.
        if main.len() % 2 == 1 {
            if let Some(last) = main.last_mut() {
                *last = 0.0;
            }
        }

        self.scratch = scratch;
    }

    fn maybe_request_inference(&mut self, controls: &ControlState) {
        let window = self.config.window;
        if self.new_samples < window {
            return;
        }
        if self.executor.is_busy() {
            StreamDiagnostics::bump(&self.diagnostics.skipped_triggers);
            return;
        }

        let mut buffers = self.buffers.lock();
        if buffers.main_input.len() < self.config.input_window() {
            return;
        }

        let read_main = buffers.main_input.read(
            &mut self.primary_window.left,
            &mut self.primary_window.right,
            0,
        );
        let read_side = buffers.sidechain_input.read(
            &mut self.sidechain_window.left,
            &mut self.sidechain_window.right,
            0,
        );
        debug_assert!(read_main && read_side, "input rings out of step");
        buffers.main_input.consume(window);
        buffers.sidechain_input.consume(window);

        self.executor
            .request_inference(&self.primary_window, &self.sidechain_window, controls);
        self.new_samples -= window;
    }

    /// Latency reported to the host, in frames.
    pub fn latency_samples(&self) -> usize {
        self.config.latency_samples()
    }

    /// Frames between an input frame and its output so far: the latency
    /// plus the silence underruns inserted.
    pub fn output_offset(&self) -> usize {
        self.config.latency_samples() + self.diagnostics.snapshot().underrun_frames
    }

    pub fn config(&self) -> &MorpherConfig {
        &self.config
    }

    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    /// `true` while an inference is in flight.
    pub fn is_inferring(&self) -> bool {
        self.executor.is_busy()
    }

    pub fn executor(&self) -> &InferenceExecutor {
        &self.executor
    }

    /// Block until the in-flight inference (if any) has landed.
    ///
    /// For offline rendering and tests; never call from the audio callback.
    pub fn wait_for_inference(&self, timeout: Duration) -> bool {
        self.executor.wait_idle(timeout)
    }

    /// Frames currently queued in the output ring.
    pub fn buffered_output(&self) -> usize {
        self.buffers.lock().output.len()
    }

    /// Subscribe to per-inference events.
    pub fn subscribe_inference(&self) -> broadcast::Receiver<InferenceEvent> {
        self.events_tx.subscribe()
    }

    /// Snapshot of stream counters for observability.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl std::fmt::Debug for StreamCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCoordinator")
            .field("config", &self.config)
            .field("format", &self.format)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::CrossfadeModel;

    fn small_config() -> MorpherConfig {
        MorpherConfig {
            window: 64,
            cache: 16,
            output_delay: 160,
            output_delay_bias: 32,
            ..MorpherConfig::default()
        }
    }

    #[test]
    fn default_config_reports_1920_latency() {
        let config = MorpherConfig::default();
        assert_eq!(config.latency_samples(), 1920);
        assert_eq!(config.input_window(), 1280);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn startup_coverage_depends_on_block_size() {
        let config = MorpherConfig::default();
        assert_eq!(config.startup_frames(1024), 2048);
        assert!(!config.latency_covers_startup(1024));
        assert_eq!(config.startup_frames(512), 1536);
        assert!(config.latency_covers_startup(512));
        assert!(small_config().latency_covers_startup(32));
    }

    #[test]
    fn bias_larger_than_delay_is_rejected() {
        let config = MorpherConfig {
            output_delay: 100,
            output_delay_bias: 200,
            ..MorpherConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MorpherError::InvalidConfig(_))
        ));
        assert!(StreamCoordinator::new(config, CrossfadeModel::new(1024)).is_err());
    }

    #[test]
    fn zero_window_is_rejected() {
        let config = MorpherConfig {
            window: 0,
            ..MorpherConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn undersized_explicit_capacity_is_rejected_at_prepare() {
        let config = MorpherConfig {
            input_capacity: Some(100),
            ..small_config()
        };
        let mut stream = StreamCoordinator::new(config, CrossfadeModel::new(64)).expect("new");
        assert!(matches!(
            stream.prepare(48_000, 64),
            Err(MorpherError::InvalidConfig(_))
        ));
        assert!(stream.format().is_none());
    }

    #[test]
    fn zero_block_size_is_rejected() {
        assert!(small_config().capacities(0).is_err());
    }

    #[test]
    fn config_deserializes_partial_json_with_defaults() {
        let config: MorpherConfig =
            serde_json::from_str(r#"{"window":512,"outputDelayBias":64}"#).expect("parse");
        assert_eq!(config.window, 512);
        assert_eq!(config.cache, DEFAULT_CACHE);
        assert_eq!(config.output_delay_bias, 64);
        assert_eq!(config.input_capacity, None);
    }

    #[test]
    fn unprepared_stream_outputs_silence() {
        let mut stream =
            StreamCoordinator::new(small_config(), CrossfadeModel::new(64)).expect("new");
        let mut left = vec![1.0; 32];
        let mut right = vec![1.0; 32];
        stream.process(&mut left, &mut right, None, &mut ControlState::default());
        assert!(left.iter().chain(&right).all(|&s| s == 0.0));
        assert_eq!(stream.diagnostics().callbacks, 0);
    }

    #[test]
    fn prepare_seeds_output_with_latency() {
        let mut stream =
            StreamCoordinator::new(small_config(), CrossfadeModel::new(64)).expect("new");
        stream.prepare(48_000, 32).expect("prepare");
        assert_eq!(stream.buffered_output(), 128);

        // Preparing again re-seeds rather than accumulating.
        stream.prepare(48_000, 32).expect("prepare");
        assert_eq!(stream.buffered_output(), 128);
    }

    #[test]
    fn reset_reseeds_and_clears_pending_input() {
        let mut stream =
            StreamCoordinator::new(small_config(), CrossfadeModel::new(64)).expect("new");
        stream.prepare(48_000, 32).expect("prepare");

        let mut controls = ControlState::default();
        let mut left = vec![0.5; 32];
        let mut right = vec![0.5; 32];
        stream.process(&mut left, &mut right, None, &mut controls);
        assert_eq!(stream.buffered_output(), 96);

        stream.reset(&controls);
        assert_eq!(stream.buffered_output(), 128);
    }
}
