//! Runner and fixture lifecycle against the simulated device.

mod common;

use std::sync::Arc;
use std::time::Duration;

use inputs_harness::core::context::Context;
use inputs_harness::core::errors::IthError;
use inputs_harness::fixture::FixtureData;
use inputs_harness::fixture::browser::{TABLET_MODE_FLAG, VK_ENABLED_FLAG};
use inputs_harness::fixture::inputs::{CLAMSHELL_NON_VK, KIOSK_NON_VK, TABLET_VK, standard_fixtures};
use inputs_harness::ime::InputMethod;
use inputs_harness::registry::deps::Dut;
use inputs_harness::registry::select::Selection;
use inputs_harness::registry::{Param, Registry, TestCase};
use inputs_harness::runner::state::State;
use inputs_harness::runner::{Harness, Outcome, RunReport};
use inputs_harness::sim::SimDut;
use inputs_harness::testserver::{InputField, InputsTestServer};
use inputs_harness::validate;

fn fixture_data(s: &State) -> inputs_harness::core::errors::Result<&FixtureData> {
    s.fixt_value::<FixtureData>().ok_or_else(|| IthError::Precondition {
        details: "no fixture value".to_string(),
    })
}

/// Type `text` into the text field and check it landed.
fn typing_test(name: &str, fixture: &str, dut: &SimDut, text: &'static str) -> TestCase {
    let dut = dut.clone();
    TestCase::new(name, move |ctx: &Context, s: &State| {
        let fd = fixture_data(s)?;
        let its = InputsTestServer::launch(ctx, &fd.browser)?.with_devices(dut.device_hub());
        its.clear_then_click_field_and_wait_for_active(InputField::Text)
            .run(ctx)?;
        its.device_hub()
            .and_then(|hub| hub.keyboard())?
            .type_str(ctx, text)?;
        its.validate_result(InputField::Text, text).run(ctx)
    })
    .fixture(fixture)
}

fn run(dut: &SimDut, registry: Registry, dir: &std::path::Path) -> RunReport {
    let config = common::config_in(dir);
    let mut registry = registry;
    registry
        .add_fixtures(standard_fixtures(config.fixture.timeouts()))
        .unwrap();
    let harness = Harness::new(registry, dut.environment(config));
    harness
        .run(&Context::background(), &Selection::parse::<&str>(&[]).unwrap())
        .unwrap()
}

#[test]
fn tests_sharing_a_fixture_reuse_one_browser() {
    let _guard = common::serial();
    let dir = tempfile::tempdir().unwrap();
    let dut = common::dut();
    let mut registry = Registry::new();
    registry
        .add_test(typing_test("inputs.First", CLAMSHELL_NON_VK, &dut, "one"))
        .unwrap();
    registry
        .add_test(typing_test("inputs.Second", CLAMSHELL_NON_VK, &dut, "two"))
        .unwrap();
    registry
        .add_test(typing_test("inputs.OnTablet", TABLET_VK, &dut, "three"))
        .unwrap();

    let report = run(&dut, registry, dir.path());
    assert_eq!(report.passed, 3, "{:#?}", report.results);
    assert_eq!(report.exit_code(), 0);

    let launches = dut.launches();
    assert_eq!(launches.len(), 2);
    assert!(launches.iter().any(|l| !l.args.iter().any(|a| a == TABLET_MODE_FLAG)));
    assert!(launches.iter().any(|l| {
        l.args.iter().any(|a| a == TABLET_MODE_FLAG) && l.args.iter().any(|a| a == VK_ENABLED_FLAG)
    }));
    assert_eq!(dut.ops().iter().filter(|op| **op == "reset_state").count(), 1);
    assert!(!dut.is_running());
}

#[test]
fn failed_fixture_setup_fails_one_test_and_retries() {
    let _guard = common::serial();
    let dir = tempfile::tempdir().unwrap();
    let dut = common::dut();
    dut.fail_next_launches(1);
    let mut registry = Registry::new();
    registry
        .add_test(typing_test("inputs.A", CLAMSHELL_NON_VK, &dut, "a"))
        .unwrap();
    registry
        .add_test(typing_test("inputs.B", CLAMSHELL_NON_VK, &dut, "b"))
        .unwrap();

    let report = run(&dut, registry, dir.path());
    assert_eq!((report.passed, report.failed), (1, 1));
    let failed = report.result("inputs.A").unwrap();
    assert_eq!(failed.outcome, Outcome::Failed);
    assert!(failed.errors[0].contains("[ITH-2001]"), "{:?}", failed.errors);
    assert_eq!(report.result("inputs.B").unwrap().outcome, Outcome::Passed);
    assert_eq!(dut.launches().len(), 1);
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn missing_software_dependency_skips_without_launching() {
    let _guard = common::serial();
    let dir = tempfile::tempdir().unwrap();
    let dut = common::dut();
    let mut registry = Registry::new();
    registry
        .add_test(
            typing_test("inputs.NeedsVk", TABLET_VK, &dut, "x")
                .software_deps(&["google_virtual_keyboard"]),
        )
        .unwrap();

    let config = common::config_in(dir.path());
    registry
        .add_fixtures(standard_fixtures(config.fixture.timeouts()))
        .unwrap();
    let report = Harness::new(registry, dut.environment(config))
        .with_dut(Dut::new("betty"))
        .run(&Context::background(), &Selection::parse(&["inputs.*"]).unwrap())
        .unwrap();

    let result = report.result("inputs.NeedsVk").unwrap();
    assert_eq!(result.outcome, Outcome::Skipped);
    assert!(!result.skip_reasons.is_empty());
    assert!(dut.launches().is_empty());
}

#[test]
fn failing_body_leaves_diagnostics_and_report() {
    let _guard = common::serial();
    let dir = tempfile::tempdir().unwrap();
    let dut = common::dut();
    let mut registry = Registry::new();
    registry
        .add_test(TestCase::new("inputs.Broken", |ctx: &Context, s: &State| {
            let fd = fixture_data(s)?;
            let its = InputsTestServer::launch(ctx, &fd.browser)?;
            validate::wait_for_field_text_to_be_with_timeout(
                Arc::clone(its.conn()),
                &InputField::Text.finder(),
                "never typed",
                Duration::from_secs(1),
            )
            .run(ctx)
        })
        .fixture(CLAMSHELL_NON_VK)
        .timeout(Duration::from_secs(20)))
        .unwrap();

    let report = run(&dut, registry, dir.path());
    let result = report.result("inputs.Broken").unwrap();
    assert_eq!(result.outcome, Outcome::Failed);
    assert!(result.out_dir.join("ui_tree.txt").is_file());
    assert!(result.out_dir.join("screenshot.png").is_file());

    let path = dir.path().join("report.json");
    report.write_json(&path).unwrap();
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"inputs.Broken\""));
    assert!(raw.contains("\"failed\""));
}

#[test]
fn parameterized_variants_see_their_value() {
    let _guard = common::serial();
    let dir = tempfile::tempdir().unwrap();
    let dut = common::dut();
    let mut registry = Registry::new();
    registry
        .add_test(
            TestCase::new("inputs.PerIme", |_ctx: &Context, s: &State| {
                let im = s.param::<InputMethod>().ok_or_else(|| IthError::Precondition {
                    details: "missing param".to_string(),
                })?;
                s.log(format!("running with {}", im.name()));
                Ok(())
            })
            .params([
                Param::new("us").val(InputMethod::EnglishUS),
                Param::new("pinyin").val(InputMethod::ChinesePinyin),
            ]),
        )
        .unwrap();

    let report = run(&dut, registry, dir.path());
    assert_eq!(report.passed, 2);
    let names: Vec<&str> = report.results.iter().map(|r| r.name.as_str()).collect();
    assert!(names.contains(&"inputs.PerIme.us"));
    assert!(names.contains(&"inputs.PerIme.pinyin"));
    let log = std::fs::read_to_string(
        report.result("inputs.PerIme.us").unwrap().out_dir.join("log.txt"),
    )
    .unwrap();
    assert!(log.contains("running with"));
}

#[test]
fn kiosk_fixture_serves_the_page_through_policy() {
    let _guard = common::serial();
    let dir = tempfile::tempdir().unwrap();
    let dut = common::dut();
    let hub_dut = dut.clone();
    let mut registry = Registry::new();
    registry
        .add_test(
            TestCase::new("inputs.Kiosk", move |ctx: &Context, s: &State| {
                let fd = fixture_data(s)?;
                let its = InputsTestServer::launch_server(ctx, Arc::clone(&fd.conn))?
                    .with_devices(hub_dut.device_hub());
                its.clear_then_click_field_and_wait_for_active(InputField::TextArea)
                    .run(ctx)?;
                its.device_hub()
                    .and_then(|hub| hub.keyboard())?
                    .type_str(ctx, "kiosk")?;
                its.validate_result(InputField::TextArea, "kiosk").run(ctx)
            })
            .fixture(KIOSK_NON_VK),
        )
        .unwrap();

    let report = run(&dut, registry, dir.path());
    assert_eq!(report.passed, 1, "{:#?}", report.results);
    assert!(dut.launches().iter().any(|l| l.kiosk));
    assert!(dut.policy().is_some());
}
