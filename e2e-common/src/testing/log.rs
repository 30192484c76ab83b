//! JSONL records of test runs, for reading CI failures after the fact.
//!
//! Tests take a [`TestGuard`] through [`crate::test_guard!`]. When enabled
//! (`E2E_TEST_LOGGING=1`, or any CI environment) the guard appends a start
//! record and a pass or fail record to `target/test-logs/<test>.jsonl`.

use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use std::time::Instant;
use tracing_subscriber::prelude::*;

/// What a [`TestRecord`] marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestEvent {
    Start,
    Pass,
    Fail,
}

/// One JSONL line.
#[derive(Debug, Clone, Serialize)]
pub struct TestRecord {
    pub timestamp: String,
    pub test: String,
    pub event: TestEvent,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

static INIT: Once = Once::new();

/// Route `tracing` output of both crates to the test writer, plus
/// `all_tests.jsonl` (or `E2E_TEST_LOG_FILE`). Only the first call installs.
pub fn init_global_test_logging() {
    INIT.call_once(|| {
        let path = std::env::var_os("E2E_TEST_LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| log_dir().join("all_tests.jsonl"));
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let file = File::create(&path)
            .ok()
            .map(|file| tracing_subscriber::fmt::layer().json().with_writer(Mutex::new(file)));

        let level = std::env::var("E2E_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "e2e_common={level},e2e_runner={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(file)
            .with(tracing_subscriber::fmt::layer().with_test_writer().compact())
            .try_init();
    });
}

fn log_dir() -> PathBuf {
    if let Some(target) = std::env::var_os("CARGO_TARGET_DIR") {
        return PathBuf::from(target).join("test-logs");
    }
    let mut dir = std::env::current_dir().unwrap_or_default();
    while !dir.join("target").is_dir() {
        if !dir.pop() {
            return PathBuf::from("target/test-logs");
        }
    }
    dir.join("target").join("test-logs")
}

fn enabled() -> bool {
    match std::env::var("E2E_TEST_LOGGING").as_deref() {
        Ok("1" | "true") => true,
        Ok("0" | "false") => false,
        _ => std::env::var_os("CI").is_some(),
    }
}

struct Recorder {
    test: String,
    started: Instant,
    file: Option<File>,
}

impl Recorder {
    fn record(&mut self, event: TestEvent, reason: Option<String>) {
        let record = TestRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            test: self.test.clone(),
            event,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            reason,
        };
        tracing::info!(test = %record.test, elapsed_ms = record.elapsed_ms, "TEST {:?}", event);
        if let Some(file) = self.file.as_mut()
            && let Ok(line) = serde_json::to_string(&record)
        {
            let _ = writeln!(file, "{line}");
        }
    }
}

/// Writes the start record on creation and pass/fail on drop.
pub struct TestGuard {
    recorder: Option<Recorder>,
}

impl TestGuard {
    pub fn new(test: &str) -> Self {
        let recorder = enabled().then(|| {
            init_global_test_logging();
            let dir = log_dir();
            let file = std::fs::create_dir_all(&dir)
                .ok()
                .and_then(|()| File::create(dir.join(format!("{test}.jsonl"))).ok());
            let mut recorder = Recorder {
                test: test.to_string(),
                started: Instant::now(),
                file,
            };
            recorder.record(TestEvent::Start, None);
            recorder
        });
        Self { recorder }
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        if let Some(mut recorder) = self.recorder.take() {
            if std::thread::panicking() {
                recorder.record(TestEvent::Fail, Some("panicked".to_string()));
            } else {
                recorder.record(TestEvent::Pass, None);
            }
        }
    }
}

/// [`TestGuard`] named after the enclosing function.
#[macro_export]
macro_rules! test_guard {
    () => {{
        fn here() {}
        fn name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let path = name_of(here);
        let path = path
            .strip_suffix("::here")
            .unwrap_or(path)
            .trim_end_matches("::{{closure}}");
        $crate::testing::TestGuard::new(path.rsplit("::").next().unwrap_or(path))
    }};
}
