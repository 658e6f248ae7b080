//! Virtual keyboard helpers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use crate::action::poll::PollOptions;
use crate::action::{self, Action, combine, if_success_then, named};
use crate::core::context::Context;
use crate::core::errors::{IthError, Result};
use crate::input::devices::DeviceHub;
use crate::surface::{AutomationConn, ConnExt, MouseButton, Request};
use crate::uiauto::automation::UiAutoContext;
use crate::uiauto::finder::Finder;
use crate::uiauto::node::{Point, Rect, Role};

/// Accessible name of the keyboard's root web area.
pub const VK_ROOT_NAME: &str = "Chrome OS Virtual Keyboard";

/// Preference toggling the accessibility keyboard.
pub const A11Y_VK_PREF: &str = "settings.a11y.virtual_keyboard";

pub fn vk_root_finder() -> Finder {
    Finder::new().role(Role::RootWebArea).name(VK_ROOT_NAME)
}

/// Any node on the virtual keyboard.
pub fn node_finder() -> Finder {
    Finder::new().ancestor(vk_root_finder())
}

/// A key button on the virtual keyboard.
pub fn key_finder() -> Finder {
    node_finder().role(Role::Button)
}

/// Key whose name equals `name` ignoring case.
pub fn key_by_name_ignoring_case(name: &str) -> Finder {
    match Regex::new(&format!("(?i)^{}$", regex::escape(name))) {
        Ok(re) => key_finder().name_regex(re),
        Err(_) => key_finder().name(name),
    }
}

/// Suggestion candidate in the suggestion bar.
pub fn suggestion_finder() -> Finder {
    key_finder().class_name("sk")
}

fn voice_active_finder() -> Finder {
    node_finder().has_class("voice-mic-img")
}

fn handwriting_canvas_finder() -> Finder {
    node_finder().role(Role::Canvas)
}

/// Helpers driving the on-screen keyboard.
#[derive(Debug, Clone)]
pub struct VirtualKeyboardContext {
    ui: UiAutoContext,
}

impl VirtualKeyboardContext {
    pub fn new(conn: Arc<dyn AutomationConn>) -> Self {
        Self {
            ui: UiAutoContext::new(conn),
        }
    }

    pub fn ui(&self) -> &UiAutoContext {
        &self.ui
    }

    /// Force the keyboard up through the input-method API.
    pub fn show(&self) -> Action {
        let conn = Arc::clone(self.ui.conn());
        action::retry(
            3,
            combine(
                "force show virtual keyboard",
                [
                    Action::new(move |ctx| conn.exec(ctx, Request::ShowVirtualKeyboard)),
                    self.wait_location_stable(),
                ],
            ),
        )
    }

    /// Force the keyboard down through the input-method API.
    pub fn hide(&self) -> Action {
        let conn = Arc::clone(self.ui.conn());
        action::retry(
            3,
            combine(
                "force hide virtual keyboard",
                [
                    Action::new(move |ctx| conn.exec(ctx, Request::HideVirtualKeyboard)),
                    self.wait_until_hidden(),
                ],
            ),
        )
    }

    pub fn is_shown(&self, ctx: &Context) -> Result<bool> {
        self.ui.is_node_found(ctx, &vk_root_finder())
    }

    pub fn is_key_shown(&self, ctx: &Context, key: &str) -> Result<bool> {
        self.ui.is_node_found(ctx, &key_finder().name(key))
    }

    /// Wait for the keyboard to appear and stop moving.
    pub fn wait_location_stable(&self) -> Action {
        self.ui
            .with_timeout(Duration::from_secs(5))
            .wait_for_location(&vk_root_finder())
    }

    pub fn location(&self, ctx: &Context) -> Result<Rect> {
        self.ui.location(ctx, &vk_root_finder())
    }

    /// Wait until the keyboard is gone and stays gone for 3 s.
    pub fn wait_until_hidden(&self) -> Action {
        self.ui
            .ensure_gone_for(&vk_root_finder(), Duration::from_secs(3))
    }

    fn tap(&self, finder: &Finder) -> Action {
        combine(
            "move mouse to key center point and click",
            [
                self.ui.mouse_move_to(finder, Duration::from_millis(10)),
                self.ui.mouse_press(MouseButton::Left),
                action::sleep(Duration::from_millis(50)),
                self.ui.mouse_release(MouseButton::Left),
            ],
        )
    }

    /// Tap the key named `key` (case-sensitive).
    pub fn tap_key(&self, key: &str) -> Action {
        self.tap(&key_finder().name(key))
    }

    pub fn tap_key_ignoring_case(&self, key: &str) -> Action {
        self.tap(&key_by_name_ignoring_case(key))
    }

    fn tap_keys_with(&self, keys: &[String], ignore_case: bool) -> Action {
        let taps: Vec<Action> = keys
            .iter()
            .map(|k| {
                let tap = if ignore_case {
                    self.tap_key_ignoring_case(k)
                } else {
                    self.tap_key(k)
                };
                tap.then("tap key", action::sleep(Duration::from_millis(100)))
            })
            .collect();
        named(
            format!("tap virtual keys {keys:?}"),
            combine("tap keys", taps),
        )
    }

    /// Tap `keys` in order, 100 ms apart.
    pub fn tap_keys(&self, keys: &[String]) -> Action {
        self.tap_keys_with(keys, false)
    }

    pub fn tap_keys_ignoring_case(&self, keys: &[String]) -> Action {
        self.tap_keys_with(keys, true)
    }

    /// Wait until every named key is on screen.
    pub fn wait_for_keys_exist(&self, keys: &[String]) -> Action {
        let waits: Vec<Action> = keys
            .iter()
            .map(|k| self.ui.wait_until_exists(&key_finder().name(k.as_str())))
            .collect();
        combine("wait for keys", waits)
    }

    /// Candidates currently shown in the suggestion bar.
    pub fn suggestions(&self, ctx: &Context) -> Result<Vec<String>> {
        Ok(self
            .ui
            .nodes_info(ctx, &suggestion_finder())?
            .into_iter()
            .map(|info| info.name)
            .collect())
    }

    /// Wait for `candidate` in the suggestion bar and click it.
    pub fn select_from_suggestion(&self, candidate: &str) -> Action {
        let finder = suggestion_finder().name(candidate);
        let ui = self.ui.with_poll_opts(
            PollOptions::with_timeout(Duration::from_secs(3)).interval(Duration::from_millis(500)),
        );
        combine(
            "wait for suggestion and select",
            [ui.wait_until_exists(&finder), ui.left_click(&finder)],
        )
    }

    /// Keep clicking `finder` until the keyboard is shown.
    pub fn click_until_vk_shown(&self, finder: &Finder) -> Action {
        let ui = self.ui.with_poll_opts(
            PollOptions::with_timeout(Duration::from_secs(10)).interval(Duration::from_secs(2)),
        );
        action::retry(5, ui.left_click_until(finder, self.wait_location_stable()))
    }

    /// Switch to the voice layout unless already there.
    pub fn switch_to_voice_input(&self) -> Action {
        let active = voice_active_finder();
        combine(
            "switch to voice input",
            [
                if_success_then(
                    self.ui.gone(&active),
                    self.ui
                        .left_click(&key_finder().name_starting_with("switch to voice")),
                ),
                self.ui.wait_until_exists(&active),
            ],
        )
    }

    /// Switch to handwriting and dismiss the first-run dialogue if shown.
    pub fn switch_to_handwriting(&self) -> Action {
        let close = key_finder().name("Got it");
        let quick = self.ui.with_timeout(Duration::from_secs(1));
        combine(
            "switch to handwriting",
            [
                self.ui
                    .left_click(&key_finder().name_starting_with("switch to handwriting")),
                self.ui.wait_until_exists(&handwriting_canvas_finder()),
                if_success_then(
                    quick.wait_until_exists(&close),
                    self.ui.left_click_until(
                        &close,
                        self.ui
                            .with_timeout(Duration::from_millis(500))
                            .wait_until_gone(&close),
                    ),
                ),
            ],
        )
    }

    /// Enable or disable the accessibility keyboard (clamshell VK).
    pub fn enable_a11y_virtual_keyboard(&self, enabled: bool) -> Action {
        let conn = Arc::clone(self.ui.conn());
        Action::new(move |ctx| {
            conn.exec(
                ctx,
                Request::SetPref {
                    name: A11Y_VK_PREF.to_string(),
                    value: Value::Bool(enabled),
                },
            )
        })
    }

    /// Glide a single finger across the centres of `keys` in order.
    pub fn glide_typing(&self, hub: Arc<DeviceHub>, keys: &[String]) -> Action {
        let ui = self.ui.clone();
        let keys = keys.to_vec();
        named(
            format!("glide typing {}", keys.concat()),
            Action::new(move |ctx| {
                let mut points = Vec::with_capacity(keys.len());
                for key in &keys {
                    points.push(ui.location(ctx, &key_by_name_ignoring_case(key))?.center());
                }
                let ts = hub.touchscreen()?;
                ts.stroke(ctx, &points, Duration::from_millis(50) * u32::try_from(points.len()).unwrap_or(1))
            }),
        )
    }

    /// Draw the strokes in `file` on the handwriting canvas.
    ///
    /// One stroke per line as space-separated `x,y` pairs normalised to the
    /// canvas (0.0 to 1.0).
    pub fn draw_handwriting(&self, hub: Arc<DeviceHub>, file: &Path) -> Action {
        let ui = self.ui.clone();
        let file = file.to_path_buf();
        Action::new(move |ctx| {
            let raw = std::fs::read_to_string(&file).map_err(|source| IthError::io(&file, source))?;
            let strokes = parse_strokes(&raw)?;
            let canvas = ui.location(ctx, &handwriting_canvas_finder())?;
            let ts = hub.touchscreen()?;
            for stroke in strokes {
                let points: Vec<Point> = stroke
                    .into_iter()
                    .map(|p| {
                        Point::new(
                            f64::from(canvas.left) + p.x * f64::from(canvas.width),
                            f64::from(canvas.top) + p.y * f64::from(canvas.height),
                        )
                    })
                    .collect();
                ts.stroke(ctx, &points, Duration::from_millis(100))?;
            }
            Ok(())
        })
    }
}

/// Parse a normalised stroke file.
pub fn parse_strokes(raw: &str) -> Result<Vec<Vec<Point>>> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|line| {
            line.split_whitespace()
                .map(|pair| {
                    let parsed = pair.split_once(',').and_then(|(x, y)| {
                        Some(Point::new(x.parse().ok()?, y.parse().ok()?))
                    });
                    parsed.ok_or_else(|| IthError::Serialization {
                        context: "handwriting strokes",
                        details: format!("bad point {pair:?}"),
                    })
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uiauto::node::UiNode;

    #[test]
    fn ignoring_case_finder_matches_any_case_exactly() {
        let tree = UiNode {
            id: 1,
            role: Role::RootWebArea,
            name: VK_ROOT_NAME.to_string(),
            children: vec![
                UiNode {
                    id: 2,
                    role: Role::Button,
                    name: "A".to_string(),
                    ..UiNode::default()
                },
                UiNode {
                    id: 3,
                    role: Role::Button,
                    name: "ab".to_string(),
                    ..UiNode::default()
                },
            ],
            ..UiNode::default()
        };
        let found = key_by_name_ignoring_case("a").find_all(&tree);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 2);
    }

    #[test]
    fn strokes_parse_and_reject_garbage() {
        let strokes = parse_strokes("# hello\n0.1,0.2 0.3,0.4\n\n0.5,0.5\n").unwrap();
        assert_eq!(strokes.len(), 2);
        assert_eq!(strokes[0][1], Point::new(0.3, 0.4));
        assert!(parse_strokes("0.1;0.2").is_err());
    }
}
