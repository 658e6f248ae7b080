//! End-to-end input scenarios against the simulated device.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Session, open_page};
use inputs_harness::ime::data::{InputData, Message};
use inputs_harness::ime::{self, DEFAULT_INPUT_METHOD, InputMethod};
use inputs_harness::input::keycodes::KeyCode;
use inputs_harness::fixture::inputs::DeviceMode;
use inputs_harness::sim::IME_PREFIX;
use inputs_harness::testserver::{InputField, InputModality};
use inputs_harness::validate;

fn expect_field(s: &Session, field: InputField, expected: &str) {
    validate::wait_for_field_text_to_be(Arc::clone(s.its.conn()), &field.finder(), expected)
        .run(&s.ctx)
        .unwrap_or_else(|err| panic!("{field}: {err}"));
}

fn focus(s: &Session, field: InputField) {
    s.its
        .clear_then_click_field_and_wait_for_active(field)
        .run(&s.ctx)
        .unwrap();
}

#[test]
fn english_pk_typing_in_textarea() {
    let s = open_page(DeviceMode::Clamshell, false);
    focus(&s, InputField::TextArea);
    let hub = s.its.device_hub().unwrap();
    hub.keyboard()
        .unwrap()
        .type_str(&s.ctx, "Hello!\nTesting 123.")
        .unwrap();
    expect_field(&s, InputField::TextArea, "Hello!\nTesting 123.");
    assert!(!s.dut.is_vk_shown());
}

#[test]
fn english_pk_edit_in_the_middle() {
    let s = open_page(DeviceMode::Clamshell, false);
    focus(&s, InputField::Text);
    let hub = s.its.device_hub().unwrap();
    let kb = hub.keyboard().unwrap();
    kb.type_str(&s.ctx, "abc").unwrap();
    kb.accel(&s.ctx, "Left").unwrap();
    kb.accel(&s.ctx, "Backspace").unwrap();
    kb.type_str(&s.ctx, "bc ab").unwrap();
    expect_field(&s, InputField::Text, "abc abc");
}

#[test]
fn physical_numpad() {
    let s = open_page(DeviceMode::Clamshell, false);
    focus(&s, InputField::TextArea);
    let hub = s.its.device_hub().unwrap();
    let kb = hub.keyboard().unwrap();
    let digits = [
        KeyCode::KP0,
        KeyCode::KP1,
        KeyCode::KP2,
        KeyCode::KP3,
        KeyCode::KP4,
        KeyCode::KP5,
        KeyCode::KP6,
        KeyCode::KP7,
        KeyCode::KP8,
        KeyCode::KP9,
    ];
    for code in digits {
        kb.type_key(&s.ctx, code).unwrap();
    }
    expect_field(&s, InputField::TextArea, "0123456789");
    for code in [
        KeyCode::KPASTERISK,
        KeyCode::KPPLUS,
        KeyCode::KPMINUS,
        KeyCode::KPSLASH,
        KeyCode::KPEQUAL,
        KeyCode::KPDOT,
    ] {
        kb.type_key(&s.ctx, code).unwrap();
    }
    expect_field(&s, InputField::TextArea, "0123456789*+-/=.");
    kb.type_key(&s.ctx, KeyCode::KPENTER).unwrap();
    expect_field(&s, InputField::TextArea, "0123456789*+-/=.\n");
}

#[test]
fn caps_lock_swaps_case_until_shift() {
    let s = open_page(DeviceMode::Clamshell, false);
    focus(&s, InputField::Text);
    let hub = s.its.device_hub().unwrap();
    let kb = hub.keyboard().unwrap();
    kb.accel(&s.ctx, "Alt+Search").unwrap();
    assert!(s.dut.caps_lock());
    kb.type_str(
        &s.ctx,
        "abcdefghijklmnopqrstuvwxyz01234! ABCDEFGHIJKLMNOPQRSTUVWXYZ01234!",
    )
    .unwrap();
    expect_field(
        &s,
        InputField::Text,
        "ABCDEFGHIJKLMNOPQRSTUVWXYZ01234! abcdefghijklmnopqrstuvwxyz01234!",
    );
    kb.accel(&s.ctx, "Shift").unwrap();
    assert!(!s.dut.caps_lock());
    kb.type_str(&s.ctx, "x").unwrap();
    expect_field(
        &s,
        InputField::Text,
        "ABCDEFGHIJKLMNOPQRSTUVWXYZ01234! abcdefghijklmnopqrstuvwxyz01234!x",
    );
}

#[test]
fn add_and_remove_ime_in_os_settings() {
    let s = open_page(DeviceMode::Clamshell, false);
    let conn = Arc::clone(s.its.conn());
    let im = InputMethod::JapaneseWithUSKeyboard;
    let full_id = format!("{IME_PREFIX}{}", im.id());

    ime::add_input_method_in_os_settings(&conn, im)
        .run(&s.ctx)
        .unwrap();
    let installed = ime::installed_input_methods(&s.ctx, conn.as_ref()).unwrap();
    assert!(installed.contains(&full_id), "{installed:?}");

    im.activate(Arc::clone(&conn)).run(&s.ctx).unwrap();
    ime::remove_input_method_in_os_settings(&conn, im)
        .run(&s.ctx)
        .unwrap();
    assert!(!s.dut.installed_input_methods().contains(&full_id));
    assert_eq!(
        ime::active_input_method(&s.ctx, conn.as_ref()).unwrap(),
        DEFAULT_INPUT_METHOD
    );
    // Only the test page is left open.
    assert_eq!(s.dut.open_tabs().len(), 1);
}

#[test]
fn japanese_romaji_becomes_hiragana() {
    let s = open_page(DeviceMode::Clamshell, false);
    InputMethod::JapaneseWithUSKeyboard
        .install_and_activate(Arc::clone(s.its.conn()))
        .run(&s.ctx)
        .unwrap();
    focus(&s, InputField::Text);
    let hub = s.its.device_hub().unwrap();
    hub.keyboard().unwrap().type_str(&s.ctx, "nihongo").unwrap();
    expect_field(&s, InputField::Text, "にほんご");
}

#[test]
fn emoji_from_right_click_picker() {
    let s = open_page(DeviceMode::Clamshell, false);
    s.its
        .input_emoji_with_emoji_picker(&s.uc, InputField::Text, "😂")
        .run(&s.ctx)
        .unwrap();
    assert_eq!(s.dut.field_value("textInputField").as_deref(), Some("😂"));
    let events = s.recorder.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].ok);
    assert!(events[0].tags.contains("EmojiPicker"));
}

#[test]
fn emoji_picker_search() {
    let s = open_page(DeviceMode::Clamshell, false);
    s.its
        .input_emoji_with_emoji_picker_search(&s.uc, InputField::TextArea, "party", "🎉")
        .run(&s.ctx)
        .unwrap();
    expect_field(&s, InputField::TextArea, "🎉");
}

#[test]
fn glide_typing_skips_password_field() {
    let s = open_page(DeviceMode::Tablet, true);
    let hub = s.its.device_hub().unwrap();
    let keys: Vec<String> = "hello".chars().map(String::from).collect();

    s.its
        .click_field_until_vk_shown(InputField::TextArea)
        .run(&s.ctx)
        .unwrap();
    s.its
        .vkb()
        .glide_typing(Arc::clone(&hub), &keys)
        .run(&s.ctx)
        .unwrap();
    expect_field(&s, InputField::TextArea, "hello");
    assert_eq!(s.its.vkb().suggestions(&s.ctx).unwrap(), vec!["hello"]);

    s.its
        .click_field_until_vk_shown(InputField::Password)
        .run(&s.ctx)
        .unwrap();
    s.its.vkb().glide_typing(hub, &keys).run(&s.ctx).unwrap();
    s.its
        .validate_result(InputField::Password, "o")
        .run(&s.ctx)
        .unwrap();
}

#[test]
fn vk_typing_commits_pinyin_from_suggestion_bar() {
    let s = open_page(DeviceMode::Tablet, true);
    InputMethod::ChinesePinyin
        .install_and_activate(Arc::clone(s.its.conn()))
        .run(&s.ctx)
        .unwrap();
    let data = Message::Hello.input_data(InputMethod::ChinesePinyin).unwrap();
    s.its
        .validate_input_field_for_mode(
            &s.uc,
            InputField::Text,
            InputModality::Vk,
            &data,
            |f| s.data_path(f),
        )
        .run(&s.ctx)
        .unwrap();
    assert_eq!(s.dut.field_value("textInputField").as_deref(), Some("你好"));
}

#[test]
fn pk_typing_per_modality_records_one_event() {
    let s = open_page(DeviceMode::Clamshell, false);
    let data = Message::Hello.input_data(InputMethod::EnglishUS).unwrap();
    s.its
        .validate_input_field_for_mode(
            &s.uc,
            InputField::Search,
            InputModality::Pk,
            &data,
            |f| s.data_path(f),
        )
        .run(&s.ctx)
        .unwrap();
    let events = s.recorder.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "PK typing input");
    assert_eq!(
        events[0].attributes.get("InputField").map(String::as_str),
        Some("searchInputField")
    );
}

#[test]
fn voice_and_handwriting_on_tablet_vk() {
    let s = open_page(DeviceMode::Tablet, true);
    let voice = Message::VoiceHello.input_data(InputMethod::EnglishUS).unwrap();
    s.its
        .validate_input_field_for_mode(
            &s.uc,
            InputField::TextArea,
            InputModality::Voice,
            &voice,
            |f| s.data_path(f),
        )
        .run(&s.ctx)
        .unwrap();

    let hw = Message::HandwritingHello
        .input_data(InputMethod::EnglishUS)
        .unwrap();
    s.its
        .validate_input_field_for_mode(
            &s.uc,
            InputField::Text,
            InputModality::Handwriting,
            &hw,
            |f| s.data_path(f),
        )
        .run(&s.ctx)
        .unwrap();
    assert_eq!(s.recorder.events().iter().filter(|e| e.ok).count(), 2);
}

#[test]
fn unsupported_modality_is_a_precondition_failure() {
    let s = open_page(DeviceMode::Clamshell, false);
    let data = Message::VoiceHello.input_data(InputMethod::EnglishUS).unwrap();
    let err = s
        .its
        .validate_input_field_for_mode(
            &s.uc,
            InputField::Password,
            InputModality::Voice,
            &data,
            |f| s.data_path(f),
        )
        .run(&s.ctx)
        .unwrap_err();
    assert!(err.to_string().contains("not supported"), "{err}");
}

#[test]
fn keyboard_typing_is_validated_case_sensitively() {
    let s = open_page(DeviceMode::Clamshell, false);
    let data = InputData {
        character_key_seq: "hello".chars().map(String::from).collect(),
        expected_text: "Hello".to_string(),
        ..InputData::default()
    };
    let short = s.ctx.with_timeout(Duration::from_secs(5));
    let err = s
        .its
        .validate_input_field_for_mode(&s.uc, InputField::Text, InputModality::Pk, &data, |f| {
            s.data_path(f)
        })
        .run(&short)
        .unwrap_err();
    assert!(err.to_string().contains("PK typing input"), "{err}");
    assert_eq!(s.dut.field_value("textInputField").as_deref(), Some("hello"));
    let events = s.recorder.events();
    assert_eq!(events.len(), 1);
    assert!(!events[0].ok);

    assert!(
        s.its
            .validate_result(InputField::Text, "Hello")
            .run(&s.ctx.with_timeout(Duration::from_secs(1)))
            .is_err()
    );
    s.its
        .validate_result_ignoring_case(InputField::Text, "Hello")
        .run(&s.ctx)
        .unwrap();
}

#[test]
fn clearing_twice_leaves_the_field_empty() {
    let s = open_page(DeviceMode::Clamshell, false);
    focus(&s, InputField::Text);
    let hub = s.its.device_hub().unwrap();
    hub.keyboard().unwrap().type_str(&s.ctx, "abc").unwrap();
    expect_field(&s, InputField::Text, "abc");
    s.its.clear(InputField::Text).run(&s.ctx).unwrap();
    s.its.clear(InputField::Text).run(&s.ctx).unwrap();
    expect_field(&s, InputField::Text, "");
}

#[test]
fn editing_one_field_keeps_the_others() {
    let s = open_page(DeviceMode::Clamshell, false);
    let hub = s.its.device_hub().unwrap();
    focus(&s, InputField::TextArea);
    hub.keyboard().unwrap().type_str(&s.ctx, "kept").unwrap();
    expect_field(&s, InputField::TextArea, "kept");

    focus(&s, InputField::Search);
    let kb = hub.keyboard().unwrap();
    kb.type_str(&s.ctx, "query").unwrap();
    kb.accel(&s.ctx, "Backspace").unwrap();
    expect_field(&s, InputField::Search, "quer");
    expect_field(&s, InputField::TextArea, "kept");
}
