//! Line commands read from stdin.
//!
//! Each line is parsed into a `Command` and executed against `AppState`;
//! replies go to the given writer.

use std::io::{self, Write};
use std::path::PathBuf;

use livefilter_core::audio::device::{list_input_devices, list_output_devices, DeviceInfo};
use livefilter_core::engine::ATTENUATION_RANGE_DB;
use livefilter_core::{EngineMetrics, EngineStatus};
use tracing::info;

use crate::settings::normalize_device_name;
use crate::state::AppState;

pub const HELP: &str = "\
commands:
  start | stop | toggle     control the duplex stream
  atten <0-40>              attenuation limit in dB
  beta <x>                  post-filter beta (>= 0)
  model <path>              switch model archive
  in <name|default>         input device
  out <name|default>        output device
  devices                   list audio devices
  status | metrics          show engine state / latency
  help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Toggle,
    Attenuation(f32),
    Beta(f32),
    Model(PathBuf),
    Input(Option<String>),
    Output(Option<String>),
    Devices,
    Status,
    Metrics,
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Parse one input line. `Ok(None)` for blank lines.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let cmd = match word.to_ascii_lowercase().as_str() {
        "start" => Command::Start,
        "stop" => Command::Stop,
        "toggle" => Command::Toggle,
        "atten" | "attenuation" => {
            let db = parse_number(rest, "atten")?;
            let (lo, hi) = ATTENUATION_RANGE_DB;
            if !(lo..=hi).contains(&db) {
                return Err(format!("attenuation must be between {lo} and {hi} dB"));
            }
            Command::Attenuation(db)
        }
        "beta" => {
            let beta = parse_number(rest, "beta")?;
            if beta < 0.0 {
                return Err("beta must not be negative".into());
            }
            Command::Beta(beta)
        }
        "model" => {
            if rest.is_empty() {
                return Err("usage: model <path>".into());
            }
            Command::Model(PathBuf::from(rest))
        }
        "in" | "input" => Command::Input(normalize_device_name(Some(rest))),
        "out" | "output" => Command::Output(normalize_device_name(Some(rest))),
        "devices" => Command::Devices,
        "status" => Command::Status,
        "metrics" => Command::Metrics,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command '{other}' (try 'help')")),
    };
    Ok(Some(cmd))
}

fn parse_number(raw: &str, name: &str) -> Result<f32, String> {
    if raw.is_empty() {
        return Err(format!("usage: {name} <value>"));
    }
    raw.parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("invalid value for {name}: '{raw}'"))
}

/// One-line latency readout.
pub fn format_metrics(metrics: &EngineMetrics) -> String {
    match (metrics.average_latency_ms, metrics.realtime_factor) {
        (Some(ms), Some(rf)) => format!("Latency: {ms:.2} ms | RT factor: {rf:.3}"),
        (Some(ms), None) => format!("Latency: {ms:.2} ms | RT factor: --"),
        _ => "Latency: -- ms | RT factor: --".into(),
    }
}

pub fn execute(state: &AppState, cmd: Command, out: &mut dyn Write) -> io::Result<Flow> {
    let engine = &state.engine;
    match cmd {
        Command::Start => match state.start_engine() {
            Ok(()) => writeln!(out, "running")?,
            Err(e) => writeln!(out, "start failed: {e}")?,
        },
        Command::Stop => {
            engine.stop().map_err(io::Error::other)?;
            writeln!(out, "stopped")?;
        }
        Command::Toggle => {
            if engine.status() == EngineStatus::Idle {
                return execute(state, Command::Start, out);
            }
            return execute(state, Command::Stop, out);
        }
        Command::Attenuation(db) => {
            let applied = engine.set_attenuation(db);
            state.update_settings(|s| s.attenuation_db = applied);
            writeln!(out, "attenuation limit {applied} dB")?;
        }
        Command::Beta(beta) => {
            engine.set_post_filter_beta(beta);
            state.update_settings(|s| s.post_filter_beta = Some(beta));
            writeln!(out, "post-filter beta {beta}")?;
        }
        Command::Model(path) => match engine.swap_model(&path) {
            Ok(()) => {
                state.update_settings(|s| s.model_path = Some(path.clone()));
                writeln!(out, "model {}", path.display())?;
            }
            Err(e) => writeln!(out, "model switch failed: {e}")?,
        },
        Command::Input(name) => {
            state.update_settings(|s| s.input_device = name.clone());
            info!(device = name.as_deref().unwrap_or("default"), "input device selected");
            report_device_change(state, "input", name.as_deref(), out)?;
        }
        Command::Output(name) => {
            state.update_settings(|s| s.output_device = name.clone());
            info!(device = name.as_deref().unwrap_or("default"), "output device selected");
            report_device_change(state, "output", name.as_deref(), out)?;
        }
        Command::Devices => {
            writeln!(out, "input devices:")?;
            write_devices(&list_input_devices(), out)?;
            writeln!(out, "output devices:")?;
            write_devices(&list_output_devices(), out)?;
        }
        Command::Status => {
            let settings = state.settings.lock().clone();
            let frame = engine
                .frame_length()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "--".into());
            writeln!(
                out,
                "{:?} | atten {} dB | frame {frame} | in {} | out {} | model {}",
                engine.status(),
                engine.attenuation(),
                settings.input_device.as_deref().unwrap_or("default"),
                settings.output_device.as_deref().unwrap_or("default"),
                engine.model_path().display(),
            )?;
            let diag = engine.diagnostics_snapshot();
            writeln!(
                out,
                "frames {} | silenced {} | lock timeouts {} | driver flags {}",
                diag.frames_processed,
                diag.silenced(),
                diag.lock_timeouts,
                diag.driver_status_flags
            )?;
        }
        Command::Metrics => writeln!(out, "{}", format_metrics(&engine.get_metrics()))?,
        Command::Help => writeln!(out, "{HELP}")?,
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn report_device_change(
    state: &AppState,
    which: &str,
    name: Option<&str>,
    out: &mut dyn Write,
) -> io::Result<()> {
    writeln!(out, "{which} device: {}", name.unwrap_or("default"))?;
    if let Err(e) = state.restart_if_running() {
        writeln!(out, "restart failed: {e}")?;
    }
    Ok(())
}

fn write_devices(devices: &[DeviceInfo], out: &mut dyn Write) -> io::Result<()> {
    if devices.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for d in devices {
        writeln!(
            out,
            "  {} {}{}{}",
            if d.is_default { "*" } else { " " },
            d.name,
            if d.supports_48k { "" } else { " [no 48 kHz]" },
            if d.is_loopback_like { " [loopback]" } else { "" },
        )?;
    }
    Ok(())
}
