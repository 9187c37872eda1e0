use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use morpher_core::{
    ControlState, CrossfadeModel, InferenceOutcome, InferenceRequest, MorphModel, MorpherConfig,
    MorpherError, StereoWindow, StreamCoordinator,
};
use tokio::sync::broadcast::error::TryRecvError;

const WINDOW: usize = 64;
const BLOCK: usize = 32;
const LATENCY: usize = 128;
const WAIT: Duration = Duration::from_secs(2);

fn small_config() -> MorpherConfig {
    MorpherConfig {
        window: WINDOW,
        cache: 16,
        output_delay: 160,
        output_delay_bias: 32,
        ..MorpherConfig::default()
    }
}

fn prepared_stream() -> StreamCoordinator {
    let mut stream =
        StreamCoordinator::new(small_config(), CrossfadeModel::new(WINDOW)).expect("new stream");
    stream.prepare(48_000, BLOCK).expect("prepare");
    stream
}

/// Runs `input` through the stream block by block, letting each inference
/// land before the next callback so the output is deterministic.
fn render(
    stream: &mut StreamCoordinator,
    main: &[f32],
    sidechain: Option<&[f32]>,
    controls: &mut ControlState,
) -> Vec<f32> {
    let mut out = Vec::with_capacity(main.len());
    for (i, block) in main.chunks(BLOCK).enumerate() {
        let mut left = block.to_vec();
        let mut right = block.to_vec();
        let side = sidechain.map(|s| &s[i * BLOCK..(i * BLOCK + block.len()).min(s.len())]);
        stream.process(&mut left, &mut right, side.map(|s| (s, s)), controls);
        assert_eq!(left, right);
        out.extend(left);
        assert!(stream.wait_for_inference(WAIT), "inference did not settle");
    }
    out
}

fn impulse(len: usize, at: usize, value: f32) -> Vec<f32> {
    let mut signal = vec![0.0; len];
    signal[at] = value;
    signal
}

struct GateModel {
    release: Receiver<()>,
    window: usize,
}

impl MorphModel for GateModel {
    fn warm_up(&mut self) -> Result<(), MorpherError> {
        Ok(())
    }

    fn infer(&mut self, request: &InferenceRequest) -> Result<StereoWindow, MorpherError> {
        let _ = self.release.recv();
        Ok(StereoWindow::from_channels(
            request.primary.left[..self.window].to_vec(),
            request.primary.right[..self.window].to_vec(),
        ))
    }

    fn reset(&mut self) {}
}

#[test]
fn default_stream_outputs_silence_for_the_first_1920_frames() {
    let mut stream =
        StreamCoordinator::new(MorpherConfig::default(), CrossfadeModel::new(1024))
            .expect("new stream");
    stream.prepare(48_000, 1024).expect("prepare");
    assert_eq!(stream.latency_samples(), 1920);

    let mut controls = ControlState::default();
    let mut out = Vec::new();
    for _ in 0..4 {
        let mut left = vec![0.0; 1024];
        let mut right = vec![0.0; 1024];
        stream.process(&mut left, &mut right, None, &mut controls);
        out.extend(left);
    }

    assert_eq!(out.len(), 4096);
    assert!(out[..1920].iter().all(|&s| s == 0.0));
}

#[test]
fn impulse_emerges_exactly_one_latency_later() {
    let mut stream = prepared_stream();
    let mut controls = ControlState::default();

    let input = impulse(BLOCK * 16, 40, 1.0);
    let out = render(&mut stream, &input, None, &mut controls);

    let expected = impulse(input.len(), 40 + LATENCY, 1.0);
    assert_eq!(out, expected);

    let diag = stream.diagnostics();
    assert_eq!(diag.underruns, 0);
    assert_eq!(diag.callbacks, 16);
    assert_eq!(diag.frames_out, input.len());
    assert!(diag.inference_completed >= 4);
}

#[test]
fn fully_morphed_output_follows_the_scaled_sidechain() {
    let mut stream = prepared_stream();
    let mut controls = ControlState {
        harmony: 1.0,
        rhythm: 1.0,
        sidechain_gain: 0.5,
        ..ControlState::default()
    };

    let main = vec![0.25; BLOCK * 12];
    let side = impulse(main.len(), 10, 1.0);
    let out = render(&mut stream, &main, Some(&side), &mut controls);

    assert_eq!(out, impulse(main.len(), 10 + LATENCY, 0.5));
}

#[test]
fn missing_sidechain_is_treated_as_silence() {
    let mut stream = prepared_stream();
    let mut controls = ControlState {
        harmony: 1.0,
        rhythm: 1.0,
        ..ControlState::default()
    };

    let main = vec![0.8; BLOCK * 12];
    let out = render(&mut stream, &main, None, &mut controls);
    assert!(out.iter().all(|&s| s == 0.0));
    assert!(stream.diagnostics().inference_completed > 0);
}

#[test]
fn source_gain_scales_what_the_model_sees() {
    let mut stream = prepared_stream();
    let mut controls = ControlState {
        source_gain: 0.5,
        ..ControlState::default()
    };

    let input = impulse(BLOCK * 10, 3, 1.0);
    let out = render(&mut stream, &input, None, &mut controls);
    assert_eq!(out, impulse(input.len(), 3 + LATENCY, 0.5));
}

#[test]
fn stalled_model_underruns_to_silence_without_blocking() {
    let (release_tx, release_rx) = bounded(4);
    let mut stream = StreamCoordinator::new(small_config(), GateModel {
        release: release_rx,
        window: WINDOW,
    })
        .expect("new stream");
    stream.prepare(48_000, BLOCK).expect("prepare");

    let mut controls = ControlState::default();
    let mut out = Vec::new();
    for _ in 0..12 {
        let mut left = vec![0.5; BLOCK];
        let mut right = vec![0.5; BLOCK];
        stream.process(&mut left, &mut right, None, &mut controls);
        out.extend(left);
    }

    assert!(out.iter().all(|&s| s == 0.0));
    let diag = stream.diagnostics();
    assert_eq!(diag.inference_requests, 1);
    assert!(diag.skipped_triggers > 0);
    assert_eq!(diag.underruns, 12 - LATENCY / BLOCK);
    assert!(stream.is_inferring());
    assert!(!stream.wait_for_inference(Duration::from_millis(20)));

    release_tx.send(()).expect("release gate");
    assert!(stream.wait_for_inference(WAIT));
    assert_eq!(stream.buffered_output(), WINDOW);
}

#[test]
fn reset_while_inferring_drops_the_stale_result() {
    let (release_tx, release_rx) = bounded(4);
    let mut stream = StreamCoordinator::new(small_config(), GateModel {
        release: release_rx,
        window: WINDOW,
    })
        .expect("new stream");
    stream.prepare(48_000, BLOCK).expect("prepare");

    let mut controls = ControlState::default();
    for _ in 0..3 {
        let mut left = vec![0.5; BLOCK];
        let mut right = vec![0.5; BLOCK];
        stream.process(&mut left, &mut right, None, &mut controls);
    }
    assert!(stream.is_inferring());

    let mut events = stream.subscribe_inference();
    stream.reset(&controls);
    release_tx.send(()).expect("release gate");
    assert!(stream.wait_for_inference(WAIT));

    assert_eq!(stream.buffered_output(), LATENCY);
    let event = events.try_recv().expect("discard event");
    assert_eq!(event.outcome, InferenceOutcome::Discarded);
    assert_eq!(stream.diagnostics().discarded_results, 1);
}

#[test]
fn sync_links_rhythm_then_harmony_across_callbacks() {
    let mut stream = prepared_stream();
    let mut controls = ControlState {
        sync: true,
        ..ControlState::default()
    };

    let mut left = vec![0.0; BLOCK];
    let mut right = vec![0.0; BLOCK];

    controls.harmony = 0.7;
    stream.process(&mut left, &mut right, None, &mut controls);
    assert_eq!((controls.harmony, controls.rhythm), (0.7, 0.7));

    controls.rhythm = 0.3;
    stream.process(&mut left, &mut right, None, &mut controls);
    assert_eq!((controls.harmony, controls.rhythm), (0.3, 0.3));

    controls.sync = false;
    controls.harmony = 0.9;
    stream.process(&mut left, &mut right, None, &mut controls);
    assert_eq!((controls.harmony, controls.rhythm), (0.9, 0.3));
}

#[test]
fn interleaved_blocks_line_up_like_planar_ones() {
    let mut stream = prepared_stream();
    let mut controls = ControlState::default();

    let frames = BLOCK * 12;
    let mut out = Vec::new();
    for block in 0..frames / BLOCK {
        let mut interleaved = vec![0.0; BLOCK * 2];
        if block == 1 {
            // Frame 37: left = 1.0, right = -1.0.
            interleaved[2 * 5] = 1.0;
            interleaved[2 * 5 + 1] = -1.0;
        }
        stream.process_interleaved(&mut interleaved, None, &mut controls);
        out.extend(interleaved);
        assert!(stream.wait_for_inference(WAIT));
    }

    let at = 37 + LATENCY;
    for (frame, pair) in out.chunks_exact(2).enumerate() {
        let expected = if frame == at { (1.0, -1.0) } else { (0.0, 0.0) };
        assert_eq!((pair[0], pair[1]), expected, "frame {frame}");
    }
}

#[test]
fn oversized_interleaved_block_is_processed_in_chunks() {
    let mut stream = prepared_stream();
    let mut controls = ControlState::default();

    let mut interleaved = vec![0.0; BLOCK * 3 * 2 + 1];
    stream.process_interleaved(&mut interleaved, None, &mut controls);

    assert!(interleaved.iter().all(|&s| s == 0.0));
    let diag = stream.diagnostics();
    assert_eq!(diag.callbacks, 3);
    assert_eq!(diag.frames_in, BLOCK * 3);
}

#[test]
fn completed_inference_is_broadcast() {
    let mut stream = prepared_stream();
    let mut events = stream.subscribe_inference();
    let mut controls = ControlState::default();

    render(&mut stream, &vec![0.1; BLOCK * 3], None, &mut controls);

    let event = events.try_recv().expect("inference event");
    assert_eq!(event.seq, 1);
    assert_eq!(event.outcome, InferenceOutcome::Completed);
    assert_eq!(event.frames, WINDOW);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn interleaved_sidechain_shorter_than_the_block_is_padded() {
    let mut stream = prepared_stream();
    let mut controls = ControlState {
        harmony: 1.0,
        rhythm: 1.0,
        ..ControlState::default()
    };

    // 96 frames of main against 10 frames of sidechain: the second and
    // third chunks start past the end of the sidechain.
    let mut main = vec![0.0; BLOCK * 3 * 2];
    let side = vec![0.5; 10 * 2];
    stream.process_interleaved(&mut main, Some(&side), &mut controls);

    assert!(main.iter().all(|&s| s == 0.0));
    let diag = stream.diagnostics();
    assert_eq!(diag.callbacks, 3);
    assert_eq!(diag.frames_in, BLOCK * 3);
}

#[test]
fn interleaved_sidechain_reaches_the_model() {
    let mut stream = prepared_stream();
    let mut controls = ControlState {
        harmony: 1.0,
        rhythm: 1.0,
        ..ControlState::default()
    };

    let mut out = Vec::new();
    for block in 0..12 {
        let mut main = vec![0.25; BLOCK * 2];
        let mut side = vec![0.0; BLOCK * 2];
        if block == 0 {
            side[2 * 7] = 1.0;
            side[2 * 7 + 1] = 1.0;
        }
        stream.process_interleaved(&mut main, Some(&side), &mut controls);
        out.extend(main);
        assert!(stream.wait_for_inference(WAIT));
    }

    let at = 7 + LATENCY;
    for (frame, pair) in out.chunks_exact(2).enumerate() {
        let expected = if frame == at { 1.0 } else { 0.0 };
        assert_eq!((pair[0], pair[1]), (expected, expected), "frame {frame}");
    }
}

#[test]
fn short_latency_for_the_block_size_underruns_once_and_shifts_output() {
    const DEFAULT_BLOCK: usize = 1024;
    let config = MorpherConfig::default();
    assert!(!config.latency_covers_startup(DEFAULT_BLOCK));

    let (release_tx, release_rx) = bounded(8);
    let mut stream = StreamCoordinator::new(
        config,
        GateModel {
            release: release_rx,
            window: 1024,
        },
    )
    .expect("new stream");
    stream.prepare(48_000, DEFAULT_BLOCK).expect("prepare");

    let mut controls = ControlState::default();
    let input = impulse(DEFAULT_BLOCK * 5, 0, 1.0);
    let mut out = Vec::new();
    for block in input.chunks(DEFAULT_BLOCK) {
        let mut left = block.to_vec();
        let mut right = block.to_vec();
        stream.process(&mut left, &mut right, None, &mut controls);
        out.extend(left);
        // The gate holds each inference until after its callback returned.
        if stream.is_inferring() {
            release_tx.send(()).expect("release gate");
        }
        assert!(stream.wait_for_inference(WAIT));
    }

    let diag = stream.diagnostics();
    assert_eq!(diag.underruns, 1);
    assert_eq!(diag.underrun_frames, DEFAULT_BLOCK);
    assert_eq!(stream.output_offset(), 1920 + DEFAULT_BLOCK);
    assert_eq!(out, impulse(input.len(), stream.output_offset(), 1.0));
}
