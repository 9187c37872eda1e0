fn main() {
    if let Err(e) = run() {
        eprintln!("benchmark failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use morpher_core::{ControlState, CrossfadeModel, MorpherConfig, StreamCoordinator};
    use serde::Serialize;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    #[derive(Debug)]
    struct Args {
        block_size: usize,
        seconds: f64,
        sample_rate: u32,
        realtime: bool,
        model: Option<PathBuf>,
        output: Option<PathBuf>,
    }

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Summary {
        model: String,
        block_size: usize,
        sample_rate: u32,
        callbacks: usize,
        budget_ms: f64,
        p50_callback_ms: f64,
        p95_callback_ms: f64,
        p99_callback_ms: f64,
        max_callback_ms: f64,
        over_budget: usize,
        underruns: usize,
        skipped_triggers: usize,
        inference_completed: usize,
        inference_errors: usize,
    }

    fn parse_args() -> Result<Args, String> {
        let mut args = Args {
            block_size: 512,
            seconds: 10.0,
            sample_rate: 48_000,
            realtime: false,
            model: None,
            output: None,
        };

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            let mut value = |name: &str| it.next().ok_or(format!("missing value for {name}"));
            match arg.as_str() {
                "--block-size" => {
                    args.block_size = value("--block-size")?
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --block-size".to_string())?
                        .clamp(16, 8192);
                }
                "--seconds" => {
                    args.seconds = value("--seconds")?
                        .parse::<f64>()
                        .map_err(|_| "invalid value for --seconds".to_string())?
                        .clamp(0.1, 600.0);
                }
                "--sample-rate" => {
                    args.sample_rate = value("--sample-rate")?
                        .parse::<u32>()
                        .map_err(|_| "invalid value for --sample-rate".to_string())?;
                }
                "--realtime" => args.realtime = true,
                "--model" => args.model = Some(PathBuf::from(value("--model")?)),
                "--output" => args.output = Some(PathBuf::from(value("--output")?)),
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p morpher-core --bin benchmark -- \\
  [--block-size <n>] [--seconds <s>] [--sample-rate <hz>] [--realtime] \\
  [--model <file.onnx>] [--output <file.json>]"
                    );
                    std::process::exit(0);
                }
                other => {
                    return Err(format!("unknown argument: {other}"));
                }
            }
        }
        Ok(args)
    }

    fn percentile(values: &[f64], p: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    const INFERENCE_TIMEOUT: Duration = Duration::from_secs(5);

    let args = parse_args()?;
    let config = MorpherConfig::default();

    let (mut stream, model_name) = match &args.model {
        #[cfg(feature = "onnx")]
        Some(path) => {
            use morpher_core::{OnnxMorphModel, OnnxMorphModelConfig};
            let model = OnnxMorphModel::new(OnnxMorphModelConfig {
                model_path: path.clone(),
                window: config.window,
                cache: config.cache,
                intra_threads: None,
            })
            .map_err(|e| e.to_string())?;
            let stream = StreamCoordinator::new(config.clone(), model).map_err(|e| e.to_string())?;
            (stream, path.display().to_string())
        }
        #[cfg(not(feature = "onnx"))]
        Some(_) => return Err("--model requires the 'onnx' feature".into()),
        None => {
            let stream = StreamCoordinator::new(config.clone(), CrossfadeModel::new(config.window))
                .map_err(|e| e.to_string())?;
            (stream, "crossfade".to_string())
        }
    };
    stream
        .prepare(args.sample_rate, args.block_size)
        .map_err(|e| e.to_string())?;

    let total_frames = (args.seconds * f64::from(args.sample_rate)) as usize;
    let callbacks = total_frames.div_ceil(args.block_size);
    let budget = Duration::from_secs_f64(args.block_size as f64 / f64::from(args.sample_rate));

    println!(
        "Running morpher callback benchmark: model={model_name} block={} callbacks={callbacks} realtime={}",
        args.block_size, args.realtime
    );

    let mut controls = ControlState {
        harmony: 0.5,
        rhythm: 0.5,
        ..ControlState::default()
    };
    let mut left = vec![0.0f32; args.block_size];
    let mut right = vec![0.0f32; args.block_size];
    let mut side_left = vec![0.0f32; args.block_size];
    let mut side_right = vec![0.0f32; args.block_size];
    let mut timings = Vec::with_capacity(callbacks);
    let mut phase = 0.0f32;
    let step = 220.0 * std::f32::consts::TAU / args.sample_rate as f32;

    for _ in 0..callbacks {
        for i in 0..args.block_size {
            left[i] = phase.sin() * 0.5;
            right[i] = left[i];
            side_left[i] = (phase * 1.5).sin() * 0.5;
            side_right[i] = side_left[i];
            phase = (phase + step) % std::f32::consts::TAU;
        }

        let started = Instant::now();
        stream.process(
            &mut left,
            &mut right,
            Some((&side_left, &side_right)),
            &mut controls,
        );
        let elapsed = started.elapsed();
        timings.push(elapsed.as_secs_f64() * 1000.0);

        if args.realtime {
            if let Some(rest) = budget.checked_sub(elapsed) {
                std::thread::sleep(rest);
            }
        } else if !stream.wait_for_inference(INFERENCE_TIMEOUT) {
            return Err(format!(
                "inference did not finish within {INFERENCE_TIMEOUT:?}; the model looks stalled"
            ));
        }
    }

    let budget_ms = budget.as_secs_f64() * 1000.0;
    let diag = stream.diagnostics();
    let summary = Summary {
        model: model_name,
        block_size: args.block_size,
        sample_rate: args.sample_rate,
        callbacks,
        budget_ms,
        p50_callback_ms: percentile(&timings, 0.50),
        p95_callback_ms: percentile(&timings, 0.95),
        p99_callback_ms: percentile(&timings, 0.99),
        max_callback_ms: timings.iter().copied().fold(0.0, f64::max),
        over_budget: timings.iter().filter(|&&t| t > budget_ms).count(),
        underruns: diag.underruns,
        skipped_triggers: diag.skipped_triggers,
        inference_completed: diag.inference_completed,
        inference_errors: diag.inference_errors,
    };

    println!(
        "Done. callbacks={} p50={:.3}ms p99={:.3}ms budget={:.3}ms underruns={}",
        summary.callbacks,
        summary.p50_callback_ms,
        summary.p99_callback_ms,
        summary.budget_ms,
        summary.underruns
    );

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote benchmark report: {}", out.display());
    } else {
        println!("{json}");
    }

    Ok(())
}
