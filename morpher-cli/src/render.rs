use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use morpher_core::{
    audio::{read_wav, resample_clip, write_wav, StereoClip},
    ControlState, CrossfadeModel, DiagnosticsSnapshot, InferenceEvent, MorpherConfig,
    StreamCoordinator,
};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};

use crate::RenderArgs;

/// How long a single inference may take before the offline render gives up
/// waiting for it.
const INFERENCE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderReport {
    input: String,
    sidechain: Option<String>,
    output: String,
    model: String,
    sample_rate: u32,
    frames: usize,
    block_size: usize,
    latency_samples: usize,
    /// Latency plus underrun frames; what the output was trimmed by.
    output_offset: usize,
    elapsed_ms: f64,
    controls: ControlState,
    config: MorpherConfig,
    diagnostics: DiagnosticsSnapshot,
    events: Vec<InferenceEvent>,
}

pub fn print_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<MorpherConfig> {
    let Some(path) = path else {
        return Ok(MorpherConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: MorpherConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn build_stream(config: MorpherConfig, args: &RenderArgs) -> Result<(StreamCoordinator, String)> {
    match &args.model {
        #[cfg(feature = "onnx")]
        Some(path) => {
            use morpher_core::{OnnxMorphModel, OnnxMorphModelConfig};
            let model = OnnxMorphModel::new(OnnxMorphModelConfig {
                model_path: path.clone(),
                window: config.window,
                cache: config.cache,
                intra_threads: None,
            })?;
            Ok((
                StreamCoordinator::new(config, model)?,
                path.display().to_string(),
            ))
        }
        #[cfg(not(feature = "onnx"))]
        Some(path) => bail!(
            "cannot load {}: morpher was built without the 'onnx' feature",
            path.display()
        ),
        None => {
            let window = config.window;
            Ok((
                StreamCoordinator::new(config, CrossfadeModel::new(window))?,
                "crossfade".to_string(),
            ))
        }
    }
}

fn load_sidechain(path: &Path, main: &StereoClip) -> Result<StereoClip> {
    let clip = read_wav(path).with_context(|| format!("reading sidechain {}", path.display()))?;
    let mut clip = if clip.sample_rate == main.sample_rate {
        clip
    } else {
        info!(
            from = clip.sample_rate,
            to = main.sample_rate,
            "resampling sidechain to main rate"
        );
        resample_clip(&clip, main.sample_rate)?
    };
    if clip.len() != main.len() {
        warn!(
            sidechain = clip.len(),
            main = main.len(),
            "sidechain length differs from main input; padding or cutting"
        );
        clip.resize(main.len());
    }
    Ok(clip)
}

fn drain_events(rx: &mut broadcast::Receiver<InferenceEvent>, out: &mut Vec<InferenceEvent>) {
    loop {
        match rx.try_recv() {
            Ok(event) => out.push(event),
            Err(TryRecvError::Lagged(n)) => warn!(missed = n, "inference events lagged"),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

pub fn run(args: &RenderArgs) -> Result<()> {
    if args.block_size == 0 {
        bail!("--block-size must be > 0");
    }

    let main = read_wav(&args.input)
        .with_context(|| format!("reading input {}", args.input.display()))?;
    if main.is_empty() {
        bail!("input {} has no audio", args.input.display());
    }
    let sidechain = args
        .sidechain
        .as_deref()
        .map(|path| load_sidechain(path, &main))
        .transpose()?;

    let config = load_config(args.config.as_deref())?;
    let (mut stream, model_name) = build_stream(config, args)?;
    stream.prepare(main.sample_rate, args.block_size)?;
    let latency = stream.latency_samples();
    let mut events_rx = stream.subscribe_inference();

    let mut controls = ControlState {
        harmony: args.harmony,
        rhythm: args.rhythm,
        source_gain: args.source_gain,
        sidechain_gain: args.sidechain_gain,
        sync: args.sync,
    }
    .clamped();

    info!(
        input = %args.input.display(),
        frames = main.len(),
        sample_rate = main.sample_rate,
        latency,
        model = model_name.as_str(),
        "rendering"
    );

    if !stream.config().latency_covers_startup(args.block_size) {
        warn!(
            latency,
            block_size = args.block_size,
            "latency is too short for this block size; output will be realigned by the underrun count"
        );
    }

    // Keep feeding silence until the tail has come out. Underruns push the
    // tail further back; a stream that never catches up stops at `limit`.
    let limit = 2 * (main.len() + latency);
    let mut rendered = StereoClip::silent(main.sample_rate, 0);
    let mut left = vec![0.0f32; args.block_size];
    let mut right = vec![0.0f32; args.block_size];
    let mut side_left = vec![0.0f32; args.block_size];
    let mut side_right = vec![0.0f32; args.block_size];
    let block_time = Duration::from_secs_f64(args.block_size as f64 / f64::from(main.sample_rate));
    let mut events = Vec::new();
    let started = Instant::now();

    let mut start = 0;
    loop {
        let total = (main.len() + stream.output_offset()).min(limit);
        if start >= total {
            break;
        }
        let n = (total - start).min(args.block_size);
        let src = start.min(main.len())..(start + n).min(main.len());
        let copied = src.len();

        left[..copied].copy_from_slice(&main.left[src.clone()]);
        right[..copied].copy_from_slice(&main.right[src.clone()]);
        left[copied..n].fill(0.0);
        right[copied..n].fill(0.0);
        if let Some(side) = &sidechain {
            side_left[..copied].copy_from_slice(&side.left[src.clone()]);
            side_right[..copied].copy_from_slice(&side.right[src]);
            side_left[copied..n].fill(0.0);
            side_right[copied..n].fill(0.0);
        }

        let block_started = Instant::now();
        let side = sidechain
            .as_ref()
            .map(|_| (&side_left[..n], &side_right[..n]));
        stream.process(&mut left[..n], &mut right[..n], side, &mut controls);

        rendered.left.extend_from_slice(&left[..n]);
        rendered.right.extend_from_slice(&right[..n]);

        if args.realtime {
            if let Some(rest) = block_time.checked_sub(block_started.elapsed()) {
                std::thread::sleep(rest);
            }
        } else if !stream.wait_for_inference(INFERENCE_TIMEOUT) {
            bail!("inference did not finish within {INFERENCE_TIMEOUT:?}");
        }
        drain_events(&mut events_rx, &mut events);
        start += n;
    }

    stream.wait_for_inference(INFERENCE_TIMEOUT);
    drain_events(&mut events_rx, &mut events);
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    // Exact for underruns before the first result; later ones are in-stream
    // gaps that no trim can undo.
    let output_offset = stream.output_offset();
    rendered.trim_front(output_offset);
    rendered.resize(main.len());
    write_wav(&args.output, &rendered)
        .with_context(|| format!("writing output {}", args.output.display()))?;

    let diagnostics = stream.diagnostics();
    info!(
        output = %args.output.display(),
        duration_secs = rendered.duration_secs(),
        elapsed_ms,
        underruns = diagnostics.underruns,
        inferences = diagnostics.inference_completed,
        errors = diagnostics.inference_errors,
        peak = rendered.peak(),
        "render finished"
    );
    if diagnostics.underruns > 0 {
        warn!(
            underruns = diagnostics.underruns,
            underrun_frames = diagnostics.underrun_frames,
            output_offset,
            "output underran; trimmed by latency plus underrun frames"
        );
    }

    if let Some(path) = &args.report {
        let report = RenderReport {
            input: args.input.display().to_string(),
            sidechain: args.sidechain.as_ref().map(|p| p.display().to_string()),
            output: args.output.display().to_string(),
            model: model_name,
            sample_rate: main.sample_rate,
            frames: main.len(),
            block_size: args.block_size,
            latency_samples: latency,
            output_offset,
            elapsed_ms,
            controls,
            config: stream.config().clone(),
            diagnostics,
            events,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing report {}", path.display()))?;
        info!(report = %path.display(), "wrote render report");
    }

    Ok(())
}
