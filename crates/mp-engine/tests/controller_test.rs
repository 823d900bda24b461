//! Tests for the execution controller

use async_trait::async_trait;
use mp_core::{
    CapabilityError, CapabilityResult, InputEvent, InputEventKind, InputSink, MouseButton,
    Serializer, StepRecord,
};
use mp_engine::{
    telemetry, Capabilities, EngineConfig, EngineError, ExecutionController, HandlerRegistry,
    NoopObserver, NoopRunObserver, PlaybackStatus, RunState, RunStatus,
};
use mp_script::StepOutcome;
use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct KeyLog {
    keys: Mutex<Vec<String>>,
}

impl KeyLog {
    fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl InputSink for KeyLog {
    async fn move_to(&self, _x: i32, _y: i32) -> CapabilityResult<()> {
        Ok(())
    }

    async fn click(&self, _x: i32, _y: i32, _button: MouseButton, _clicks: u32) -> CapabilityResult<()> {
        Ok(())
    }

    async fn key_press(&self, key: &str, _modifiers: &[String]) -> CapabilityResult<()> {
        self.keys.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn key_release(&self, _key: &str) -> CapabilityResult<()> {
        Ok(())
    }

    async fn hotkey(&self, keys: &[String]) -> CapabilityResult<()> {
        self.keys.lock().unwrap().push(keys.join("+"));
        Ok(())
    }

    async fn type_text(&self, _text: &str, _interval: Duration) -> CapabilityResult<()> {
        Ok(())
    }

    async fn scroll(&self, _x: Option<i32>, _y: Option<i32>, _delta: i32) -> CapabilityResult<()> {
        Ok(())
    }
}

/// Serves "save.json" as a program and "typing.json" as a recording
struct Files;

#[async_trait]
impl Serializer for Files {
    async fn load_steps(&self, source: &str) -> CapabilityResult<Vec<StepRecord>> {
        match source {
            "save.json" => Ok(vec![
                StepRecord::new("save", "key", json!({"key": ["ctrl", "s"]})),
                StepRecord::new("confirm", "key", json!({"key": "enter"})),
            ]),
            _ => Err(CapabilityError::failed("serializer", format!("{} not found", source))),
        }
    }

    async fn load_events(&self, source: &str) -> CapabilityResult<Vec<InputEvent>> {
        if !source.ends_with("typing.json") {
            return Err(CapabilityError::failed("serializer", format!("{} not found", source)));
        }
        Ok(["h", "i", "!"]
            .iter()
            .enumerate()
            .map(|(i, key)| {
                InputEvent::new(
                    i as f64 * 2.0,
                    InputEventKind::KeyPress {
                        key: key.to_string(),
                        modifiers: Vec::new(),
                    },
                )
            })
            .collect())
    }
}

fn controller() -> (ExecutionController, Arc<KeyLog>) {
    let log = Arc::new(KeyLog::default());
    let capabilities = Capabilities::new()
        .with_input_sink(log.clone())
        .with_serializer(Arc::new(Files));
    (ExecutionController::new(EngineConfig::default(), capabilities), log)
}

#[tokio::test]
async fn test_run_source() {
    let (controller, log) = controller();
    let handle = controller
        .run_source("save.json", Arc::new(NoopRunObserver))
        .await
        .unwrap();
    let report = handle.wait().await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(log.keys(), vec!["ctrl+s", "enter"]);
    assert_eq!(controller.status().run, RunState::Completed(mp_script::Completion::Success));
}

#[tokio::test]
async fn test_run_source_load_error() {
    let (controller, _) = controller();
    let err = controller
        .run_source("missing.json", Arc::new(NoopRunObserver))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Capability(_)));
}

#[tokio::test]
async fn test_run_records_rejects_invalid_program() {
    let (controller, _) = controller();
    let records = vec![StepRecord::new("x", "teleport", json!({}))];
    let err = controller
        .run_records(&records, Arc::new(NoopRunObserver))
        .unwrap_err();
    assert!(matches!(err, EngineError::Program(_)));
    assert!(err.to_string().contains("teleport"));
}

#[tokio::test(start_paused = true)]
async fn test_play_source_and_status() {
    let (controller, log) = controller();
    let handle = controller
        .play_source("typing.json", 1.0, Arc::new(NoopObserver))
        .await
        .unwrap();
    assert!(!handle.session_id().is_empty());

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let status = controller.status();
    assert!(status.playback_playing);
    assert_eq!(status.cursor, 2);

    let second = controller.play(Vec::new(), 1.0, Arc::new(NoopObserver));
    assert!(matches!(second, Err(EngineError::Busy("playback"))));

    let report = handle.wait().await.unwrap();
    assert_eq!(report.status, PlaybackStatus::Completed);
    assert_eq!(log.keys(), vec!["h", "i", "!"]);
    assert!(!controller.status().playback_playing);
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_stop_reach_every_session() {
    let (controller, log) = controller();
    let run = controller
        .run_records(
            &[
                StepRecord::new("w", "wait", json!({"seconds": 10})),
                StepRecord::new("k", "key", json!({"key": "late"})),
            ],
            Arc::new(NoopRunObserver),
        )
        .unwrap();
    let playback = controller
        .play_source("typing.json", 1.0, Arc::new(NoopObserver))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(controller.pause());
    let status = controller.status();
    assert_eq!(status.run, RunState::Paused);
    assert!(status.playback_paused);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(log.keys(), vec!["h"]);

    assert!(controller.resume());
    assert!(controller.stop());

    assert_eq!(run.wait().await.status, RunStatus::Stopped);
    assert_eq!(playback.wait().await.unwrap().status, PlaybackStatus::Stopped);
    assert_eq!(log.keys(), vec!["h"]);
    assert!(!controller.stop());
}

#[tokio::test(start_paused = true)]
async fn test_second_run_is_busy() {
    let (controller, _) = controller();
    let records = [StepRecord::new("w", "wait", json!({"seconds": 1}))];
    let handle = controller
        .run_records(&records, Arc::new(NoopRunObserver))
        .unwrap();

    let err = controller
        .run_records(&records, Arc::new(NoopRunObserver))
        .unwrap_err();
    assert!(err.is_busy());
    assert_eq!(handle.wait().await.status, RunStatus::Success);
}

#[test]
fn test_set_speed_is_clamped() {
    let (controller, _) = controller();
    assert_eq!(controller.set_speed(50.0), 10.0);
    assert_eq!(controller.set_speed(0.01), 0.1);
    assert_eq!(controller.status().speed, 0.1);
}

#[test]
fn test_custom_handlers() {
    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register("ping", |_call| async move {
        Ok::<_, anyhow::Error>(StepOutcome::success().with_data(json!("pong")))
    });

    let (controller, _) = controller();
    let controller = controller.with_handlers(handlers);
    assert!(controller.handlers().has_handler("ping"));

    let records = [StepRecord::new(
        "c",
        "custom",
        json!({"handler": "ping", "save_to": "reply"}),
    )];
    let report = tokio_test::block_on(async {
        controller
            .run_records(&records, Arc::new(NoopRunObserver))
            .unwrap()
            .wait()
            .await
    });
    assert_eq!(report.variables["reply"], json!("pong"));
}

#[test]
fn test_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "playback:\n  default_speed: 2.0\nmatching:\n  confidence: 0.9").unwrap();

    let controller = ExecutionController::from_config_file(file.path(), Capabilities::new()).unwrap();
    assert_eq!(controller.config().playback.default_speed, 2.0);
    assert_eq!(controller.config().matching.confidence, 0.9);
    assert_eq!(controller.status().speed, 2.0);

    let mut bad = tempfile::NamedTempFile::new().unwrap();
    writeln!(bad, "engine:\n  poll_interval_ms: 0").unwrap();
    let err = ExecutionController::from_config_file(bad.path(), Capabilities::new()).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn test_init_tracing_once() {
    let config = EngineConfig::default();
    assert!(telemetry::init_tracing(&config.logging));
    assert!(!telemetry::init_tracing(&config.logging));
}
