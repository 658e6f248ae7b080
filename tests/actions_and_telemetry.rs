//! Action composition, user-action telemetry and keyboard planning across
//! module boundaries.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{TestTracing, open_page};
use inputs_harness::action::{Action, combine};
use inputs_harness::core::context::Context;
use inputs_harness::core::errors::IthError;
use inputs_harness::fixture::inputs::DeviceMode;
use inputs_harness::telemetry::jsonl::ActionEvent;
use inputs_harness::telemetry::recorder::ActionRecorder;
use inputs_harness::testserver::InputField;
use inputs_harness::useractions::{
    ActionTag, AttributeKey, UserActionCfg, UserContext, user_action,
};

fn counting(hits: &Arc<AtomicUsize>) -> Action {
    let hits = Arc::clone(hits);
    Action::new(move |_| {
        hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

#[test]
fn user_actions_append_one_jsonl_line_per_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::config_in(dir.path());
    config.telemetry.enabled = true;
    let recorder = ActionRecorder::from_config(&config);
    let uc = UserContext::new("inputs.Telemetry", dir.path(), Some(recorder.clone()));
    uc.set_attribute(AttributeKey::InputField, "textInputField");
    uc.add_tags(&[ActionTag::EssentialInputs]);

    let hits = Arc::new(AtomicUsize::new(0));
    let action = user_action(
        "type hello",
        counting(&hits),
        &uc,
        UserActionCfg::new()
            .attribute(AttributeKey::InputField, "searchInputField")
            .tag(ActionTag::PKTyping),
    );
    let ctx = Context::background();
    action.run(&ctx).unwrap();
    action.run(&ctx).unwrap();
    recorder.flush();

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    let raw = std::fs::read_to_string(&config.paths.telemetry_log).unwrap();
    let events: Vec<ActionEvent> = raw
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events.len(), 2);
    let event = &events[0];
    assert_eq!(event.name, "type hello");
    assert_eq!(event.test_name, "inputs.Telemetry");
    assert_eq!(
        event.attributes.get("InputField").map(String::as_str),
        Some("searchInputField")
    );
    assert!(event.tags.contains("EssentialInputs"));
    assert!(event.tags.contains("PKTyping"));
}

#[test]
fn failing_validation_is_recorded_with_its_code() {
    let recorder = ActionRecorder::in_memory();
    let uc = UserContext::new("inputs.Telemetry", "/tmp", Some(recorder.clone()));
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_cb = Arc::clone(&seen);
    let action = user_action(
        "validate",
        Action::noop(),
        &uc,
        UserActionCfg::new()
            .validate_result(Action::new(|_| Err(IthError::automation("text mismatch"))))
            .callback(move |_, err| {
                if err.is_some() {
                    seen_cb.fetch_add(1, Ordering::SeqCst);
                }
            }),
    );

    let err = action.run(&Context::background()).unwrap_err();
    assert_eq!(err.code(), "ITH-3001");
    assert!(err.to_string().contains("failed to validate"), "{err}");
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    let events = recorder.events();
    assert_eq!(events.len(), 1);
    assert!(!events[0].ok);
    assert_eq!(events[0].error_code.as_deref(), Some("ITH-3001"));
    assert!(
        events[0]
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("text mismatch"))
    );
}

#[test]
fn composite_stops_at_failing_step() {
    let hits = Arc::new(AtomicUsize::new(0));
    let action = combine(
        "switch input method",
        [
            counting(&hits),
            Action::new(|_| Err(IthError::automation("menu missing"))),
            counting(&hits),
        ],
    );
    let err = action.run(&Context::background()).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("switch input method on step 2"), "{msg}");
    assert!(msg.contains("menu missing"), "{msg}");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn cancelled_context_stops_a_composite_before_its_first_step() {
    let hits = Arc::new(AtomicUsize::new(0));
    let action = combine("never", [counting(&hits)]);
    let (ctx, cancel) = Context::background().with_cancel();
    cancel.cancel();
    let err = action.run(&ctx).unwrap_err();
    assert!(err.root_cause().is_cancellation(), "{err}");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn untypeable_text_injects_nothing() {
    let s = open_page(DeviceMode::Clamshell, false);
    s.its
        .clear_then_click_field_and_wait_for_active(InputField::Text)
        .run(&s.ctx)
        .unwrap();
    let hub = s.its.device_hub().unwrap();
    let kb = hub.keyboard().unwrap();

    let err = kb.type_str(&s.ctx, "naïve").unwrap_err();
    assert!(matches!(err, IthError::Untypeable { position: 2, .. }), "{err}");
    let err = kb.accel(&s.ctx, "Ctrl+Nope").unwrap_err();
    assert!(matches!(err, IthError::UnknownKey { .. }), "{err}");
    assert_eq!(s.dut.field_value("textInputField").as_deref(), Some(""));
}

#[test]
fn action_without_recorder_logs_instead() {
    let tracing = TestTracing::new();
    let _guard = tracing.install();
    let uc = UserContext::new("inputs.Quiet", "/tmp", None);
    user_action("quiet", Action::noop(), &uc, UserActionCfg::new())
        .run(&Context::background())
        .unwrap();
    tracing.assert_contains("[ITH-ACTION] no recorder attached");
}
