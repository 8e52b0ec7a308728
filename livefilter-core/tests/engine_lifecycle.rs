mod common;

use std::sync::{atomic::Ordering, Arc};
use std::time::Duration;

use approx::assert_relative_eq;
use livefilter_core::audio::NegotiatedFormat;
use livefilter_core::{DuplexEngine, EngineConfig, EngineError, EngineStatus, PassthroughFactory};
use tokio::sync::broadcast::error::TryRecvError;

use common::{new_log, position, EventLog, FakeBackend, RecordingFactory};

const N: usize = 480;

fn config() -> EngineConfig {
    EngineConfig {
        model_path: "models/DeepFilterNet3_onnx.tar.gz".into(),
        ..EngineConfig::default()
    }
}

fn recording_engine(
    frame_len: usize,
) -> (DuplexEngine, Arc<RecordingFactory>, Arc<FakeBackend>, EventLog) {
    let log = new_log();
    let factory = Arc::new(RecordingFactory::new(Arc::clone(&log), frame_len));
    let backend = Arc::new(FakeBackend::new(Arc::clone(&log)));
    let engine = DuplexEngine::new(config(), factory.clone(), backend.clone());
    (engine, factory, backend, log)
}

fn ramp(len: usize) -> Vec<f32> {
    (0..len).map(|i| (i as f32 / len as f32) - 0.5).collect()
}

#[test]
fn passthrough_end_to_end() {
    let backend = Arc::new(FakeBackend::new(new_log()));
    let engine = DuplexEngine::new(
        config(),
        Arc::new(PassthroughFactory::default()),
        backend.clone(),
    );

    engine.start(None, None).expect("start");
    assert_eq!(engine.status(), EngineStatus::Running);
    assert_eq!(engine.frame_length(), Some(N));

    let zeros = vec![0.0; N];
    let mut out = vec![1.0; N];
    assert!(backend.drive(&zeros, &mut out, N));
    assert!(out.iter().all(|s| *s == 0.0));

    let signal = ramp(N);
    assert!(backend.drive(&signal, &mut out, N));
    assert_eq!(out, signal);

    let metrics = engine.get_metrics();
    assert!(metrics.average_latency_ms.is_some());
    assert!(metrics.realtime_factor.is_some());
    assert_eq!(engine.diagnostics_snapshot().frames_processed, 2);

    engine.stop().expect("stop");
    assert_eq!(engine.status(), EngineStatus::Idle);
    assert_eq!(engine.get_metrics().average_latency_ms, None);
    assert!(!backend.drive(&signal, &mut out, N));
}

#[test]
fn block_size_matches_transform_frame_length() {
    let (engine, _factory, backend, _log) = recording_engine(960);
    engine.start(None, None).expect("start");

    let requests = backend.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].block_frames, 960);
    assert_eq!(requests[0].sample_rate, 48_000);
}

#[test]
fn mismatched_block_is_silenced_and_engine_keeps_running() {
    let (engine, _factory, backend, _log) = recording_engine(N);
    engine.start(None, None).expect("start");

    let mut out = vec![0.9; 512];
    assert!(backend.drive(&vec![0.3; 512], &mut out, 512));
    assert!(out.iter().all(|s| *s == 0.0));
    assert_eq!(engine.status(), EngineStatus::Running);
    assert!(engine.metrics().is_empty());

    let mut out = vec![0.0; N];
    let signal = ramp(N);
    assert!(backend.drive(&signal, &mut out, N));
    assert_eq!(out, signal);

    let diag = engine.diagnostics_snapshot();
    assert_eq!(diag.silenced_mismatch, 1);
    assert_eq!(diag.frames_processed, 1);
    assert_eq!(diag.last_snr_db, Some(7.5));
}

#[test]
fn stop_is_idempotent_and_clears_metrics() {
    let (engine, factory, backend, _log) = recording_engine(N);
    engine.stop().expect("stop while idle");

    engine.start(None, None).expect("start");
    let mut out = vec![0.0; N];
    backend.drive(&ramp(N), &mut out, N);
    assert!(!engine.metrics().is_empty());

    engine.stop().expect("first stop");
    engine.stop().expect("second stop");
    assert_eq!(engine.status(), EngineStatus::Idle);
    assert!(engine.metrics().is_empty());
    assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(factory.live_instances(), 0);
}

#[test]
fn stream_stops_before_transform_is_destroyed() {
    let (engine, _factory, _backend, log) = recording_engine(N);
    engine.start(None, None).expect("start");
    engine.stop().expect("stop");

    let stopped = position(&log, "stream-stopped").expect("stream stopped");
    let destroyed = position(&log, "destroy:0").expect("transform destroyed");
    assert!(stopped < destroyed);
}

#[test]
fn start_while_running_is_rejected() {
    let (engine, factory, _backend, _log) = recording_engine(N);
    engine.start(None, None).expect("start");
    assert!(matches!(
        engine.start(None, None),
        Err(EngineError::AlreadyRunning)
    ));
    assert_eq!(engine.status(), EngineStatus::Running);
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);
}

#[test]
fn creation_failure_returns_to_idle_without_touching_devices() {
    let (engine, factory, backend, _log) = recording_engine(N);
    factory.fail.store(true, Ordering::SeqCst);

    assert!(matches!(
        engine.start(None, None),
        Err(EngineError::CreationFailed(_))
    ));
    assert_eq!(engine.status(), EngineStatus::Idle);
    assert!(backend.requests.lock().is_empty());

    factory.fail.store(false, Ordering::SeqCst);
    engine.start(None, None).expect("start after fixing the model");
}

#[test]
fn device_failure_releases_the_new_transform() {
    let (engine, factory, backend, _log) = recording_engine(N);
    backend.fail_validate.store(true, Ordering::SeqCst);

    let err = engine
        .start(Some("Missing Mic".into()), None)
        .unwrap_err();
    assert!(matches!(err, EngineError::DeviceConfig(_)));
    assert_eq!(engine.status(), EngineStatus::Idle);
    assert_eq!(factory.live_instances(), 0);
    assert_eq!(backend.requests.lock()[0].devices.input.as_deref(), Some("Missing Mic"));
}

#[test]
fn stream_open_failure_releases_the_new_transform() {
    let (engine, factory, backend, _log) = recording_engine(N);
    backend.fail_open.store(true, Ordering::SeqCst);

    assert!(matches!(engine.start(None, None), Err(EngineError::Audio(_))));
    assert_eq!(engine.status(), EngineStatus::Idle);
    assert_eq!(factory.live_instances(), 0);
    assert!(!backend.has_callback());
}

#[test]
fn attenuation_reaches_running_transform_and_next_start() {
    let (engine, factory, backend, log) = recording_engine(N);
    factory.log_frames.store(true, Ordering::SeqCst);

    assert_eq!(engine.set_attenuation(12.0), 12.0);
    engine.start(None, None).expect("start");
    assert!(position(&log, "create:models/DeepFilterNet3_onnx.tar.gz:12").is_some());

    let signal = ramp(N);
    let mut out = vec![0.0; N];
    assert!(backend.drive(&signal, &mut out, N));

    // The setter lands before the very next frame the driver pulls.
    engine.set_attenuation(30.0);
    let before_next = log.lock().len();
    assert!(backend.drive(&signal, &mut out, N));
    {
        let entries = log.lock();
        let applied = entries.iter().position(|e| e == "atten:30").expect("atten:30");
        assert!(applied < before_next);
        assert_eq!(entries[before_next..], ["frame:0".to_string()]);
    }
    assert_eq!(engine.attenuation(), 30.0);

    assert_eq!(engine.set_attenuation(55.0), 40.0);
    assert!(position(&log, "atten:40").is_some());
    assert_eq!(engine.set_attenuation(-3.0), 0.0);
}

#[test]
fn post_filter_beta_is_forwarded_and_validated() {
    let (engine, _factory, _backend, log) = recording_engine(N);
    engine.start(None, None).expect("start");

    engine.set_post_filter_beta(0.02);
    assert!(position(&log, "beta:0.02").is_some());

    let before = log.lock().len();
    engine.set_post_filter_beta(-1.0);
    engine.set_post_filter_beta(f32::NAN);
    assert_eq!(log.lock().len(), before);
}

#[test]
fn configured_beta_is_applied_on_start() {
    let log = new_log();
    let factory = Arc::new(RecordingFactory::new(Arc::clone(&log), N));
    let backend = Arc::new(FakeBackend::new(Arc::clone(&log)));
    let engine = DuplexEngine::new(
        EngineConfig {
            post_filter_beta: Some(0.05),
            ..config()
        },
        factory,
        backend,
    );
    engine.start(None, None).expect("start");
    assert!(position(&log, "beta:0.05").is_some());
}

#[test]
fn latency_window_keeps_last_thirty_frames() {
    let (engine, _factory, _backend, _log) = recording_engine(N);
    engine.start(None, None).expect("start");

    let window = engine.metrics();
    for ms in 1..=35 {
        window.record(ms as f64);
    }

    let metrics = engine.get_metrics();
    assert_relative_eq!(metrics.average_latency_ms.unwrap(), 20.5, epsilon = 1e-9);
    // 480 samples at 48 kHz is a 10 ms frame.
    assert_relative_eq!(metrics.realtime_factor.unwrap(), 2.05, epsilon = 1e-9);
}

#[test]
fn stereo_devices_use_left_input_and_fan_out() {
    let log = new_log();
    let backend = Arc::new(FakeBackend::with_format(
        Arc::clone(&log),
        NegotiatedFormat {
            input_channels: 2,
            output_channels: 2,
        },
    ));
    let engine = DuplexEngine::new(
        config(),
        Arc::new(RecordingFactory::new(Arc::clone(&log), 2)),
        backend.clone(),
    );
    engine.start(None, None).expect("start");

    let mut out = [0.0; 4];
    assert!(backend.drive(&[0.25, -1.0, 0.5, -1.0], &mut out, 2));
    assert_eq!(out, [0.25, 0.25, 0.5, 0.5]);
}

#[test]
fn swap_model_replaces_running_transform() {
    let (engine, factory, backend, log) = recording_engine(N);
    engine.start(None, None).expect("start");

    *factory.gain.lock() = 2.0;
    engine
        .swap_model("models/DeepFilterNet2_onnx.tar.gz")
        .expect("swap");
    assert!(position(&log, "destroy:0").is_some());
    assert_eq!(factory.live_instances(), 1);
    assert_eq!(
        engine.model_path(),
        std::path::PathBuf::from("models/DeepFilterNet2_onnx.tar.gz")
    );

    let mut out = vec![0.0; N];
    backend.drive(&vec![0.25; N], &mut out, N);
    assert!(out.iter().all(|s| *s == 0.5));
}

#[test]
fn swap_model_rejects_frame_length_change() {
    let (engine, factory, backend, _log) = recording_engine(N);
    engine.start(None, None).expect("start");

    factory.frame_len.store(960, Ordering::SeqCst);
    let err = engine.swap_model("models/other.tar.gz").unwrap_err();
    assert!(matches!(
        err,
        EngineError::FrameLengthChanged {
            expected: 480,
            actual: 960
        }
    ));
    assert_eq!(factory.live_instances(), 1);

    let signal = ramp(N);
    let mut out = vec![0.0; N];
    backend.drive(&signal, &mut out, N);
    assert_eq!(out, signal);
}

#[test]
fn swap_model_while_idle_only_records_path() {
    let (engine, factory, _backend, log) = recording_engine(N);
    engine.swap_model("models/next.tar.gz").expect("swap");
    assert_eq!(factory.created.load(Ordering::SeqCst), 0);

    engine.start(None, None).expect("start");
    assert!(log
        .lock()
        .iter()
        .any(|e| e.starts_with("create:models/next.tar.gz")));
}

#[test]
fn status_events_follow_the_lifecycle() {
    let (engine, _factory, _backend, _log) = recording_engine(N);
    let mut rx = engine.subscribe_status();

    engine.start(None, None).expect("start");
    engine.stop().expect("stop");

    let mut seen = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => seen.push(ev.status),
            Err(TryRecvError::Empty) => break,
            Err(e) => panic!("status channel error: {e}"),
        }
    }
    assert_eq!(
        seen,
        vec![
            EngineStatus::Starting,
            EngineStatus::Running,
            EngineStatus::Stopping,
            EngineStatus::Idle
        ]
    );
}

#[test]
fn failed_start_reports_the_error_detail() {
    let (engine, factory, _backend, _log) = recording_engine(N);
    factory.fail.store(true, Ordering::SeqCst);
    let mut rx = engine.subscribe_status();

    let _ = engine.start(None, None);
    assert_eq!(rx.try_recv().unwrap().status, EngineStatus::Starting);
    let idle = rx.try_recv().unwrap();
    assert_eq!(idle.status, EngineStatus::Idle);
    assert!(idle.detail.unwrap().contains("cannot load"));
}

#[test]
fn restart_creates_a_fresh_transform() {
    let (engine, factory, backend, _log) = recording_engine(N);
    for _ in 0..3 {
        engine.start(None, None).expect("start");
        let mut out = vec![0.0; N];
        assert!(backend.drive(&ramp(N), &mut out, N));
        engine.stop().expect("stop");
    }
    assert_eq!(factory.created.load(Ordering::SeqCst), 3);
    assert_eq!(factory.destroyed.load(Ordering::SeqCst), 3);
}

#[test]
fn dropping_a_running_engine_releases_everything() {
    let (engine, factory, backend, _log) = recording_engine(N);
    engine.start(None, None).expect("start");
    drop(engine);
    assert_eq!(factory.live_instances(), 0);
    assert!(!backend.has_callback());
}

#[test]
fn stop_during_start_leaves_the_engine_idle() {
    let (engine, factory, backend, log) = recording_engine(N);
    *factory.create_delay.lock() = Duration::from_millis(200);
    let engine = Arc::new(engine);

    let starter = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || engine.start(None, None))
    };
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.status(), EngineStatus::Starting);

    engine.stop().expect("stop");
    assert_eq!(engine.status(), EngineStatus::Idle);
    assert!(starter.join().expect("start thread").is_ok());

    assert_eq!(engine.status(), EngineStatus::Idle);
    assert_eq!(factory.live_instances(), 0);
    assert!(!backend.has_callback());
    let stopped = position(&log, "stream-stopped").expect("stream stopped");
    let destroyed = position(&log, "destroy:0").expect("transform destroyed");
    assert!(stopped < destroyed);
}

#[test]
fn swap_model_during_start_targets_the_new_stream() {
    let (engine, factory, _backend, log) = recording_engine(N);
    *factory.create_delay.lock() = Duration::from_millis(150);
    let engine = Arc::new(engine);

    let starter = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || engine.start(None, None))
    };
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.status(), EngineStatus::Starting);

    engine
        .swap_model("models/DeepFilterNet2_onnx.tar.gz")
        .expect("swap");
    starter.join().expect("start thread").expect("start");

    assert_eq!(engine.status(), EngineStatus::Running);
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    assert_eq!(factory.live_instances(), 1);
    assert!(position(&log, "create:models/DeepFilterNet2_onnx.tar.gz:24").is_some());
    assert!(position(&log, "destroy:0").is_some());
}

#[test]
fn stop_waits_out_a_block_holding_the_driver() {
    // A block in flight when stop() runs must not deadlock: the callback
    // gives up on the control lock after its budget.
    let (engine, _factory, backend, _log) = recording_engine(N);
    let engine = Arc::new(engine);
    engine.start(None, None).expect("start");

    let driver = {
        let backend = Arc::clone(&backend);
        std::thread::spawn(move || {
            let signal = vec![0.1; N];
            let mut out = vec![0.0; N];
            let mut blocks = 0;
            while backend.drive(&signal, &mut out, N) {
                blocks += 1;
                std::thread::sleep(Duration::from_micros(200));
            }
            blocks
        })
    };

    std::thread::sleep(Duration::from_millis(20));
    engine.stop().expect("stop");
    let blocks = driver.join().expect("driver thread");
    assert!(blocks > 0);
    assert_eq!(engine.status(), EngineStatus::Idle);
}
