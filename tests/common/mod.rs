#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use inputs_harness::core::config::HarnessConfig;
use inputs_harness::core::context::Context;
use inputs_harness::fixture::browser::{Browser, BrowserOption, BrowserType};
use inputs_harness::fixture::inputs::{DeviceMode, InputsFixtureParams};
use inputs_harness::sim::SimDut;
use inputs_harness::telemetry::recorder::ActionRecorder;
use inputs_harness::testserver::InputsTestServer;
use inputs_harness::useractions::{UserContext, UserMode, new_inputs_user_context};
use parking_lot::{Mutex, MutexGuard};
use tempfile::TempDir;

/// The browser session lock is process-wide; tests that run fixtures take
/// this first.
static SERIAL: Mutex<()> = Mutex::new(());

pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock()
}

/// Captures tracing output for tests.
pub struct TestTracing {
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = Arc::clone(&self.buffer);
        let make_writer = move || TestWriter(Arc::clone(&writer));
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Config rooted in `dir`, with the sample data files written to its data
/// directory.
pub fn config_in(dir: &Path) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.paths.out_dir = dir.join("results");
    config.paths.data_dir = dir.join("data");
    config.paths.telemetry_log = dir.join("user_actions.jsonl");
    config.runner.default_test_timeout_secs = 60;
    write_data_files(&config.paths.data_dir);
    config
}

pub fn write_data_files(data_dir: &Path) {
    std::fs::create_dir_all(data_dir).unwrap();
    std::fs::write(data_dir.join("voice_en_hello.wav"), b"RIFF....WAVEfmt ").unwrap();
    std::fs::write(
        data_dir.join("handwriting_en_hello.txt"),
        "0.10,0.50 0.15,0.20 0.20,0.50\n0.30,0.40 0.40,0.40\n",
    )
    .unwrap();
}

/// A launched simulated browser with the test page open.
pub struct Session {
    pub dut: SimDut,
    pub browser: Arc<dyn Browser>,
    pub its: InputsTestServer,
    pub uc: UserContext,
    pub recorder: ActionRecorder,
    pub ctx: Context,
    pub dir: TempDir,
}

impl Session {
    pub fn data_path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join("data").join(name)
    }
}

pub fn dut() -> SimDut {
    SimDut::new()
        .with_transcript("voice_en_hello.wav", "hello")
        .with_handwriting_result("hello")
}

pub fn open_page(dm: DeviceMode, vk_enabled: bool) -> Session {
    open_page_on(dut(), InputsFixtureParams::new(dm, vk_enabled).browser_options(&[]))
}

pub fn open_page_on(dut: SimDut, opts: Vec<BrowserOption>) -> Session {
    let dir = tempfile::tempdir().unwrap();
    write_data_files(&dir.path().join("data"));
    let ctx = Context::background().with_timeout(Duration::from_secs(120));
    let browser = dut
        .launcher()
        .launch(&ctx, BrowserType::Ash, &opts)
        .unwrap();
    let its = InputsTestServer::launch(&ctx, &browser)
        .unwrap()
        .with_devices(dut.device_hub());
    let recorder = ActionRecorder::in_memory();
    let uc = new_inputs_user_context(
        &ctx,
        browser.test_conn().as_ref(),
        "inputs.Scenario",
        dir.path(),
        UserMode::Normal,
        Some(recorder.clone()),
    )
    .unwrap();
    Session {
        dut,
        browser,
        its,
        uc,
        recorder,
        ctx,
        dir,
    }
}
