//! One model, one worker thread, at most one request in flight.
//!
//! ## Protocol
//!
//! ```text
//! audio thread                         worker thread
//! ────────────                         ─────────────
//! is_busy()? ── no ──► CAS busy=true
//! copy windows → slot
//! try_send(Run) ─────────────────────► recv(Run)
//!                                      swap slot ↔ working request
//!                                      model.infer()           (unlocked)
//!                                      lock ─► output.push() ─► unlock
//!                                      busy=false, notify idle
//! ```
//!
//! The audio thread only touches the slot while `busy` is false and the
//! worker only touches it right after receiving `Run`, so the slot mutex is
//! never contended. A request arriving while busy is refused, not queued.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    buffering::{SharedBuffers, StereoWindow},
    engine::diagnostics::StreamDiagnostics,
    error::{MorpherError, Result},
    inference::{InferenceRequest, MorphModel},
    ipc::events::{InferenceEvent, InferenceOutcome},
    params::ControlState,
};

/// Whether a request is currently being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Inferring,
}

/// Window sizes the executor is built for.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    /// Output frames per inference (and new frames consumed per request).
    pub window: usize,
    /// Trailing context frames appended to each input window.
    pub cache: usize,
}

impl ExecutorSettings {
    pub fn input_len(&self) -> usize {
        self.window + self.cache
    }
}

enum WorkerCommand {
    Run,
    Shutdown,
}

/// Request hand-off slot plus the stream epoch it was captured in.
struct PendingSlot {
    request: InferenceRequest,
    epoch: u64,
}

struct ExecutorShared {
    busy: AtomicBool,
    shutdown: AtomicBool,
    /// Bumped on stream reset; results from an older epoch are discarded.
    epoch: AtomicU64,
    next_seq: AtomicU64,
    completed: AtomicU64,
    slot: Mutex<PendingSlot>,
    idle_lock: Mutex<()>,
    idle_cv: Condvar,
}

impl ExecutorShared {
    fn mark_idle(&self) {
        {
            let _guard = self.idle_lock.lock();
            self.busy.store(false, Ordering::Release);
        }
        self.idle_cv.notify_all();
    }
}

/// Owns the inference worker thread. Dropping the executor stops and joins
/// the worker.
pub struct InferenceExecutor {
    shared: Arc<ExecutorShared>,
    wake_tx: Sender<WorkerCommand>,
    settings: ExecutorSettings,
    diagnostics: Arc<StreamDiagnostics>,
    thread: Option<JoinHandle<()>>,
}

impl InferenceExecutor {
    /// Spawn the worker thread and move `model` onto it.
    ///
    /// Results are pushed into `buffers.output`. `events` receives one
    /// [`InferenceEvent`] per finished request.
    ///
    /// # Errors
    /// `MorpherError::WorkerSpawn` if the OS refuses to create the thread.
    pub fn spawn<M: MorphModel>(
        model: M,
        buffers: SharedBuffers,
        settings: ExecutorSettings,
        diagnostics: Arc<StreamDiagnostics>,
        events: broadcast::Sender<InferenceEvent>,
    ) -> Result<Self> {
        let input_len = settings.input_len();
        let shared = Arc::new(ExecutorShared {
            busy: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            slot: Mutex::new(PendingSlot {
                request: InferenceRequest::with_input_len(input_len),
                epoch: 0,
            }),
            idle_lock: Mutex::new(()),
            idle_cv: Condvar::new(),
        });

        // Capacity 2: at most one `Run` is outstanding, plus `Shutdown`.
        let (wake_tx, wake_rx) = crossbeam_channel::bounded::<WorkerCommand>(2);

        let worker = Worker {
            model,
            shared: Arc::clone(&shared),
            wake_rx,
            buffers,
            settings,
            diagnostics: Arc::clone(&diagnostics),
            events,
        };

        let thread = std::thread::Builder::new()
            .name("morpher-inference".into())
            .spawn(move || worker.run())
            .map_err(|e| MorpherError::WorkerSpawn(e.to_string()))?;

        Ok(Self {
            shared,
            wake_tx,
            settings,
            diagnostics,
            thread: Some(thread),
        })
    }

    /// Non-blocking; safe to poll from the audio thread.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ExecutorState {
        if self.is_busy() {
            ExecutorState::Inferring
        } else {
            ExecutorState::Idle
        }
    }

    pub fn settings(&self) -> ExecutorSettings {
        self.settings
    }

    /// Submit one request. Returns `false` if it was refused.
    ///
    /// A refused request leaves any in-flight inference untouched. Requests
    /// are refused while busy, after shutdown, or when the windows are not
    /// exactly `window + cache` frames long. Never blocks and never
    /// allocates.
    pub fn request_inference(
        &self,
        primary: &StereoWindow,
        sidechain: &StereoWindow,
        controls: &ControlState,
    ) -> bool {
        let input_len = self.settings.input_len();
        if !primary.has_len(input_len) || !sidechain.has_len(input_len) {
            StreamDiagnostics::bump(&self.diagnostics.dropped_requests);
            return false;
        }

        if self.shared.shutdown.load(Ordering::Acquire)
            || self
                .shared
                .busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            StreamDiagnostics::bump(&self.diagnostics.dropped_requests);
            return false;
        }

        {
            let mut slot = self.shared.slot.lock();
            let request = &mut slot.request;
            request.seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
            request.created_at = Instant::now();
            request.primary.left.copy_from_slice(&primary.left);
            request.primary.right.copy_from_slice(&primary.right);
            request.sidechain.left.copy_from_slice(&sidechain.left);
            request.sidechain.right.copy_from_slice(&sidechain.right);
            request.set_controls(controls);
            slot.epoch = self.shared.epoch.load(Ordering::Acquire);
        }

        match self.wake_tx.try_send(WorkerCommand::Run) {
            Ok(()) => {
                StreamDiagnostics::bump(&self.diagnostics.inference_requests);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.shared.mark_idle();
                StreamDiagnostics::bump(&self.diagnostics.dropped_requests);
                false
            }
        }
    }

    /// Make any in-flight result stale so it is dropped instead of pushed.
    ///
    /// Call while holding the stream lock so the worker cannot push between
    /// the epoch bump and the buffer reset.
    pub fn invalidate_in_flight(&self) {
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Block until the executor is idle or `timeout` elapses.
    ///
    /// Not for the audio thread. Offline hosts use it to let each inference
    /// land before the next block.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.idle_lock.lock();
        while self.shared.busy.load(Ordering::Acquire) {
            if self
                .shared
                .idle_cv
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                return !self.shared.busy.load(Ordering::Acquire);
            }
        }
        true
    }

    /// Number of requests the worker has finished (result-ready counter).
    pub fn completed(&self) -> u64 {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// An inference already running finishes, but its result is discarded.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let _ = self.wake_tx.try_send(WorkerCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("inference worker panicked during shutdown");
            }
        }
    }
}

impl Drop for InferenceExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for InferenceExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceExecutor")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Everything the worker thread owns.
struct Worker<M: MorphModel> {
    model: M,
    shared: Arc<ExecutorShared>,
    wake_rx: Receiver<WorkerCommand>,
    buffers: SharedBuffers,
    settings: ExecutorSettings,
    diagnostics: Arc<StreamDiagnostics>,
    events: broadcast::Sender<InferenceEvent>,
}

impl<M: MorphModel> Worker<M> {
    fn run(mut self) {
        info!(model = self.model.name(), "inference worker started");

        match catch_unwind(AssertUnwindSafe(|| self.model.warm_up())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("model warm-up failed: {e}"),
            Err(_) => error!("model panicked during warm-up"),
        }

        let mut working = InferenceRequest::with_input_len(self.settings.input_len());
        let mut silence = StereoWindow::silent(self.settings.window);

        while let Ok(cmd) = self.wake_rx.recv() {
            if matches!(cmd, WorkerCommand::Shutdown) {
                break;
            }

            let epoch = {
                let mut slot = self.shared.slot.lock();
                std::mem::swap(&mut slot.request, &mut working);
                slot.epoch
            };

            let picked_up = Instant::now();
            let (result, outcome, detail) = self.infer(&working);
            let infer_ms = picked_up.elapsed().as_secs_f64() * 1000.0;
            let queue_ms = picked_up
                .saturating_duration_since(working.created_at)
                .as_secs_f64()
                * 1000.0;

            if self.shared.shutdown.load(Ordering::Acquire) {
                debug!(seq = working.seq, "discarding result after shutdown");
                self.shared.mark_idle();
                break;
            }

            let output = match &result {
                Some(window) => window,
                None => {
                    silence.silence();
                    &silence
                }
            };

            let pushed = {
                let mut buffers = self.buffers.lock();
                if self.shared.epoch.load(Ordering::Acquire) == epoch {
                    buffers.output.push(&output.left, &output.right);
                    true
                } else {
                    false
                }
            };

            let outcome = if pushed {
                outcome
            } else {
                StreamDiagnostics::bump(&self.diagnostics.discarded_results);
                InferenceOutcome::Discarded
            };
            if outcome.is_success() || outcome == InferenceOutcome::Discarded {
                debug!(seq = working.seq, infer_ms, ?outcome, "inference finished");
            } else {
                StreamDiagnostics::bump(&self.diagnostics.inference_errors);
            }
            StreamDiagnostics::bump(&self.diagnostics.inference_completed);

            // Sent before going idle so `wait_idle` implies the event is out.
            let _ = self.events.send(InferenceEvent {
                seq: working.seq,
                outcome,
                queue_ms,
                infer_ms,
                frames: if pushed { output.len() } else { 0 },
                detail,
            });

            self.shared.completed.fetch_add(1, Ordering::AcqRel);
            self.shared.mark_idle();
        }

        self.model.reset();
        self.shared.mark_idle();
        info!("inference worker stopped");
    }

    /// Run the model, mapping every failure mode to "no window".
    fn infer(
        &mut self,
        request: &InferenceRequest,
    ) -> (Option<StereoWindow>, InferenceOutcome, Option<String>) {
        let expected = self.settings.window;
        match catch_unwind(AssertUnwindSafe(|| self.model.infer(request))) {
            Ok(Ok(window)) if !window.has_len(expected) => {
                let detail = format!(
                    "expected {expected} frames, got {} / {}",
                    window.left.len(),
                    window.right.len()
                );
                warn!(seq = request.seq, "malformed model output: {detail}");
                (None, InferenceOutcome::Malformed, Some(detail))
            }
            Ok(Ok(window)) if !window.is_finite() => {
                warn!(seq = request.seq, "model output contains non-finite samples");
                (
                    None,
                    InferenceOutcome::Malformed,
                    Some("non-finite samples".into()),
                )
            }
            Ok(Ok(window)) => (Some(window), InferenceOutcome::Completed, None),
            Ok(Err(e)) => {
                warn!(seq = request.seq, "inference failed, emitting silence: {e}");
                (None, InferenceOutcome::Failed, Some(e.to_string()))
            }
            Err(_) => {
                error!(seq = request.seq, "model panicked, emitting silence");
                self.model.reset();
                (
                    None,
                    InferenceOutcome::Panicked,
                    Some("model panicked".into()),
                )
            }
        }
    }
}
