//! livefilter terminal host.
//!
//! Runs the duplex engine on the selected microphone and speakers and reads
//! control commands from stdin. A reporter thread prints the latency readout
//! every 500 ms while the stream is running.

mod commands;
mod paths;
mod settings;
mod state;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, RecvTimeoutError};
use livefilter_core::audio::device::{list_input_devices, list_output_devices};
use livefilter_core::{
    CpalBackend, DeepFilterFactory, DuplexEngine, EngineConfig, EngineStatus, PassthroughFactory,
    TransformFactory,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use commands::{execute, format_metrics, parse, Flow, HELP};
use settings::{default_settings_path, load_settings, normalize_device_name};
use state::AppState;

const METRICS_INTERVAL: Duration = Duration::from_millis(500);

const USAGE: &str = "\
Usage: livefilter [options]
  --input <name>       input device (default: system default)
  --output <name>      output device (default: system default)
  --atten <db>         attenuation limit, 0-40 dB
  --model <path>       model archive (or DF_MODEL_TAR)
  --lib <path>         native library (or DEEPFILTER_DYLIB)
  --passthrough        skip the denoiser; route mic to speakers unchanged
  --autostart          start the stream immediately
  --list-devices       print audio devices and exit
  --no-save            do not write settings
  -h, --help";

#[derive(Debug, Default)]
struct Args {
    input: Option<String>,
    output: Option<String>,
    atten: Option<f32>,
    model: Option<PathBuf>,
    library: Option<PathBuf>,
    passthrough: bool,
    autostart: bool,
    list_devices: bool,
    no_save: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |name: &str| {
            it.next()
                .with_context(|| format!("missing value for {name}"))
        };
        match arg.as_str() {
            "--input" => args.input = Some(value("--input")?),
            "--output" => args.output = Some(value("--output")?),
            "--atten" => {
                let raw = value("--atten")?;
                args.atten = Some(
                    raw.parse::<f32>()
                        .with_context(|| format!("invalid value for --atten: {raw}"))?,
                );
            }
            "--model" => args.model = Some(PathBuf::from(value("--model")?)),
            "--lib" => args.library = Some(PathBuf::from(value("--lib")?)),
            "--passthrough" => args.passthrough = true,
            "--autostart" => args.autostart = true,
            "--list-devices" => args.list_devices = true,
            "--no-save" => args.no_save = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("livefilter=info")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("livefilter: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = parse_args()?;

    if args.list_devices {
        let mut out = io::stdout().lock();
        for d in list_input_devices().iter().chain(list_output_devices().iter()) {
            writeln!(out, "{}", serde_json::to_string(d)?)?;
        }
        return Ok(());
    }

    let settings_path = default_settings_path();
    let mut settings = load_settings(&settings_path);
    if let Some(input) = args.input.as_deref() {
        settings.input_device = normalize_device_name(Some(input));
    }
    if let Some(output) = args.output.as_deref() {
        settings.output_device = normalize_device_name(Some(output));
    }
    if let Some(db) = args.atten {
        settings.attenuation_db = db;
    }
    if let Some(model) = args.model.clone() {
        settings.model_path = Some(model);
    }
    if let Some(library) = args.library.clone() {
        settings.library_path = Some(library);
    }
    settings.normalize();

    let (factory, model_path): (Arc<dyn TransformFactory>, PathBuf) = if args.passthrough {
        info!("passthrough mode: denoiser disabled");
        (
            Arc::new(PassthroughFactory::default()),
            settings.model_path.clone().unwrap_or_default(),
        )
    } else {
        let library = paths::resolve_library(settings.library_path.as_deref())
            .context("cannot locate the DeepFilterNet library")?;
        let model = paths::resolve_model(settings.model_path.as_deref())
            .context("cannot locate a DeepFilterNet model")?;
        info!(library = %library.display(), model = %model.display(), "denoiser located");
        (Arc::new(DeepFilterFactory::new(library)), model)
    };

    let config = EngineConfig {
        model_path,
        log_level: (settings.native_log_level != "off").then(|| settings.native_log_level.clone()),
        attenuation_db: settings.attenuation_db,
        post_filter_beta: settings.post_filter_beta,
        ..EngineConfig::default()
    };
    let engine = Arc::new(DuplexEngine::new(config, factory, Arc::new(CpalBackend::new())));
    let autostart = args.autostart || settings.autostart;
    let state = AppState::new(
        Arc::clone(&engine),
        settings,
        (!args.no_save).then_some(settings_path),
    );

    spawn_status_printer(&engine);
    let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
    let reporter = {
        let engine = Arc::clone(&engine);
        thread::Builder::new()
            .name("livefilter-metrics".into())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(METRICS_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => {
                        if engine.status() == EngineStatus::Running {
                            println!("{}", format_metrics(&engine.get_metrics()));
                        }
                    }
                    _ => break,
                }
            })
            .context("failed to spawn metrics reporter")?
    };

    println!("{HELP}");
    if autostart {
        if let Err(e) = state.start_engine() {
            println!("start failed: {e}");
        }
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let cmd = match parse(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(msg) => {
                println!("{msg}");
                continue;
            }
        };
        let mut out = io::stdout().lock();
        if execute(&state, cmd, &mut out)? == Flow::Quit {
            break;
        }
        out.flush()?;
    }

    drop(shutdown_tx);
    if reporter.join().is_err() {
        warn!("metrics reporter panicked");
    }
    engine.stop()?;
    info!("livefilter exiting");
    Ok(())
}

/// Print status transitions that carry a detail (failed starts).
fn spawn_status_printer(engine: &DuplexEngine) {
    let mut rx = engine.subscribe_status();
    let spawned = thread::Builder::new()
        .name("livefilter-status".into())
        .spawn(move || {
            while let Ok(event) = rx.blocking_recv() {
                if let Some(detail) = event.detail {
                    println!("[{:?}] {detail}", event.status);
                }
            }
        });
    if let Err(e) = spawned {
        warn!("status printer not started: {e}");
    }
}
