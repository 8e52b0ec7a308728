//! Offline real-time check for the denoiser.
//!
//! Runs synthetic frames through the same `TransformHandle` the engine uses and
//! prints a JSON latency summary. A realtime factor below 1.0 means the
//! transform keeps up with the stream at 48 kHz.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use livefilter_core::metrics::frame_duration_ms;
use livefilter_core::{
    DeepFilterFactory, PassthroughFactory, TransformFactory, TransformHandle, TransformRequest,
    SAMPLE_RATE,
};
use rand::Rng;
use serde::Serialize;

#[derive(Debug)]
struct Args {
    library: Option<PathBuf>,
    model: Option<PathBuf>,
    frames: usize,
    warmup: usize,
    atten: f32,
    passthrough: bool,
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    backend: String,
    model: String,
    frame_len: usize,
    frame_ms: f64,
    frames: usize,
    mean_ms: f64,
    p50_ms: f64,
    p95_ms: f64,
    max_ms: f64,
    realtime_factor: f64,
    mean_snr_db: f64,
    failed_frames: usize,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("rt-benchmark failed: {e:#}");
        std::process::exit(1);
    }
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        library: None,
        model: None,
        frames: 1_000,
        warmup: 20,
        atten: 24.0,
        passthrough: false,
        output: None,
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--lib" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --lib");
                };
                args.library = Some(PathBuf::from(v));
            }
            "--model" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --model");
                };
                args.model = Some(PathBuf::from(v));
            }
            "--frames" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --frames");
                };
                args.frames = v
                    .parse::<usize>()
                    .with_context(|| format!("invalid value for --frames: {v}"))?
                    .max(1);
            }
            "--warmup" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --warmup");
                };
                args.warmup = v
                    .parse::<usize>()
                    .with_context(|| format!("invalid value for --warmup: {v}"))?;
            }
            "--atten" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --atten");
                };
                args.atten = v
                    .parse::<f32>()
                    .with_context(|| format!("invalid value for --atten: {v}"))?
                    .clamp(0.0, 40.0);
            }
            "--output" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --output");
                };
                args.output = Some(PathBuf::from(v));
            }
            "--passthrough" => args.passthrough = true,
            "--help" | "-h" => {
                println!(
                    "Usage: rt-benchmark [--lib <path>] [--model <path>] [--frames <n>] \\
  [--warmup <n>] [--atten <db>] [--passthrough] [--output <file.json>]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
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

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn run() -> Result<()> {
    let args = parse_args()?;

    let (factory, backend, model): (Arc<dyn TransformFactory>, String, PathBuf) =
        if args.passthrough {
            (
                Arc::new(PassthroughFactory::default()),
                "passthrough".into(),
                PathBuf::new(),
            )
        } else {
            let library = args
                .library
                .or_else(|| env_path("DEEPFILTER_DYLIB"))
                .context("no library: pass --lib or set DEEPFILTER_DYLIB")?;
            let model = args
                .model
                .or_else(|| env_path("DF_MODEL_TAR"))
                .context("no model: pass --model or set DF_MODEL_TAR")?;
            (
                Arc::new(DeepFilterFactory::new(library.clone())),
                library.display().to_string(),
                model,
            )
        };

    let mut handle = TransformHandle::create(
        factory.as_ref(),
        &TransformRequest {
            model_path: model.clone(),
            attenuation_db: args.atten,
            log_level: None,
        },
    )?;
    let frame_len = handle.frame_length();

    // Speech-band tone under white noise, one fresh frame per iteration.
    let mut rng = rand::thread_rng();
    let mut phase = 0.0f32;
    let step = 2.0 * std::f32::consts::PI * 220.0 / SAMPLE_RATE as f32;
    let mut frame = vec![0.0f32; frame_len];
    let mut next_frame = |frame: &mut [f32]| {
        for s in frame.iter_mut() {
            *s = 0.2 * phase.sin() + rng.gen_range(-0.05..0.05);
            phase = (phase + step) % (2.0 * std::f32::consts::PI);
        }
    };

    for _ in 0..args.warmup {
        next_frame(&mut frame);
        let _ = handle.process_frame(&frame);
    }

    let mut latencies = Vec::with_capacity(args.frames);
    let mut snr_sum = 0.0f64;
    let mut failed_frames = 0;
    for _ in 0..args.frames {
        next_frame(&mut frame);
        let started = Instant::now();
        let result = handle.process_frame(&frame).map(|(snr, _)| snr);
        latencies.push(started.elapsed().as_secs_f64() * 1000.0);
        match result {
            Ok(snr) => snr_sum += f64::from(snr),
            Err(_) => failed_frames += 1,
        }
    }
    handle.destroy();

    let frame_ms = frame_duration_ms(frame_len, SAMPLE_RATE).unwrap_or(f64::NAN);
    let mean_ms = latencies.iter().sum::<f64>() / latencies.len() as f64;
    let ok_frames = (args.frames - failed_frames).max(1);
    let summary = Summary {
        backend,
        model: model.display().to_string(),
        frame_len,
        frame_ms,
        frames: args.frames,
        mean_ms,
        p50_ms: percentile(&latencies, 0.50),
        p95_ms: percentile(&latencies, 0.95),
        max_ms: latencies.iter().copied().fold(0.0, f64::max),
        realtime_factor: mean_ms / frame_ms,
        mean_snr_db: snr_sum / ok_frames as f64,
        failed_frames,
    };

    let json = serde_json::to_string_pretty(&summary)?;
    println!("{json}");
    if let Some(path) = args.output {
        std::fs::write(&path, &json)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}
