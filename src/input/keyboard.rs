//! Keyboard facade: typing strings, accelerators and raw event codes.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::action::Action;
use crate::core::context::Context;
use crate::core::errors::{IthError, Result};
use crate::input::devices::{DeviceSlot, KeyboardDevice};
use crate::input::keycodes::{KeyCode, key_by_name, qwerty};

/// Exclusive handle on the keyboard; released when dropped.
pub struct KeyboardEventWriter {
    slot: Arc<DeviceSlot<dyn KeyboardDevice>>,
    device: Mutex<Option<Box<dyn KeyboardDevice>>>,
    key_delay: Duration,
}

impl std::fmt::Debug for KeyboardEventWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyboardEventWriter")
            .field("key_delay", &self.key_delay)
            .finish_non_exhaustive()
    }
}

/// Parse a `'+'`-separated accelerator into key codes, in press order.
pub fn parse_accel(spec: &str) -> Result<Vec<KeyCode>> {
    if spec.trim().is_empty() {
        return Err(IthError::UnknownKey {
            name: spec.to_string(),
        });
    }
    spec.split('+')
        .map(|name| {
            key_by_name(name).ok_or_else(|| IthError::UnknownKey {
                name: name.trim().to_string(),
            })
        })
        .collect()
}

/// Key strokes typing `s` on US-QWERTY; fails at the first untypeable char.
pub fn plan_typing(s: &str) -> Result<Vec<(KeyCode, bool)>> {
    s.chars()
        .enumerate()
        .map(|(position, ch)| qwerty(ch).ok_or(IthError::Untypeable { ch, position }))
        .collect()
}

impl KeyboardEventWriter {
    pub(crate) fn new(slot: Arc<DeviceSlot<dyn KeyboardDevice>>, device: Box<dyn KeyboardDevice>) -> Self {
        Self {
            slot,
            device: Mutex::new(Some(device)),
            key_delay: Duration::ZERO,
        }
    }

    /// Pause between successive key strokes.
    #[must_use]
    pub fn with_key_delay(mut self, delay: Duration) -> Self {
        self.key_delay = delay;
        self
    }

    fn emit(&self, ctx: &Context, code: KeyCode, pressed: bool) -> Result<()> {
        ctx.err()?;
        let mut guard = self.device.lock();
        let device = guard.as_deref_mut().ok_or(IthError::Device {
            device: "keyboard",
            details: "writer already closed".to_string(),
        })?;
        device.key(code, pressed)
    }

    fn stroke(&self, ctx: &Context, code: KeyCode, shift: bool) -> Result<()> {
        if shift {
            self.emit(ctx, KeyCode::LEFTSHIFT, true)?;
        }
        let pressed = self
            .emit(ctx, code, true)
            .and_then(|()| self.emit(ctx, code, false));
        if shift {
            // Release shift even if the stroke failed.
            let released = self.emit(&Context::background(), KeyCode::LEFTSHIFT, false);
            pressed?;
            released?;
        } else {
            pressed?;
        }
        if !self.key_delay.is_zero() {
            ctx.sleep(self.key_delay)?;
        }
        Ok(())
    }

    /// Type `s` on a US-QWERTY layout, synthesising shift where needed.
    ///
    /// The whole string is checked first; an untypeable character fails
    /// with its position before any event is injected.
    pub fn type_str(&self, ctx: &Context, s: &str) -> Result<()> {
        let plan = plan_typing(s)?;
        for (code, shift) in plan {
            self.stroke(ctx, code, shift)?;
        }
        Ok(())
    }

    /// Press and release an accelerator such as `"Ctrl+Shift+Space"`.
    ///
    /// Unknown names fail before any event is injected. Keys are released
    /// in reverse order.
    pub fn accel(&self, ctx: &Context, spec: &str) -> Result<()> {
        let keys = parse_accel(spec)?;
        self.press_all(ctx, &keys)?;
        self.release_all(ctx, &keys)?;
        if !self.key_delay.is_zero() {
            ctx.sleep(self.key_delay)?;
        }
        Ok(())
    }

    /// Press the accelerator's keys without releasing them.
    pub fn accel_press(&self, ctx: &Context, spec: &str) -> Result<()> {
        let keys = parse_accel(spec)?;
        self.press_all(ctx, &keys)
    }

    /// Release the accelerator's keys in reverse order.
    pub fn accel_release(&self, ctx: &Context, spec: &str) -> Result<()> {
        let keys = parse_accel(spec)?;
        self.release_all(ctx, &keys)
    }

    fn press_all(&self, ctx: &Context, keys: &[KeyCode]) -> Result<()> {
        for (pressed, code) in keys.iter().enumerate() {
            if let Err(err) = self.emit(ctx, *code, true) {
                // Do not leave earlier keys held down.
                let _ = self.release_all(&Context::background(), &keys[..pressed]);
                return Err(err);
            }
        }
        Ok(())
    }

    fn release_all(&self, ctx: &Context, keys: &[KeyCode]) -> Result<()> {
        let mut first_err = None;
        for code in keys.iter().rev() {
            if let Err(err) = self.emit(ctx, *code, false) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Press and release a single raw event code (numpad keys).
    pub fn type_key(&self, ctx: &Context, code: KeyCode) -> Result<()> {
        self.stroke(ctx, code, false)
    }

    /// Run [`Self::accel`] for each entry in turn.
    pub fn type_sequence(&self, ctx: &Context, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.accel(ctx, key)?;
        }
        Ok(())
    }

    /// Deferred [`Self::type_str`].
    pub fn type_action(self: &Arc<Self>, s: impl Into<String>) -> Action {
        let kb = Arc::clone(self);
        let s = s.into();
        Action::new(move |ctx| kb.type_str(ctx, &s))
    }

    /// Deferred [`Self::accel`].
    pub fn accel_action(self: &Arc<Self>, spec: impl Into<String>) -> Action {
        let kb = Arc::clone(self);
        let spec = spec.into();
        Action::new(move |ctx| kb.accel(ctx, &spec))
    }

    /// Deferred [`Self::type_key`].
    pub fn type_key_action(self: &Arc<Self>, code: KeyCode) -> Action {
        let kb = Arc::clone(self);
        Action::new(move |ctx| kb.type_key(ctx, code))
    }

    pub fn accel_press_action(self: &Arc<Self>, spec: impl Into<String>) -> Action {
        let kb = Arc::clone(self);
        let spec = spec.into();
        Action::new(move |ctx| kb.accel_press(ctx, &spec))
    }

    pub fn accel_release_action(self: &Arc<Self>, spec: impl Into<String>) -> Action {
        let kb = Arc::clone(self);
        let spec = spec.into();
        Action::new(move |ctx| kb.accel_release(ctx, &spec))
    }
}

impl Drop for KeyboardEventWriter {
    fn drop(&mut self) {
        if let Some(device) = self.device.lock().take() {
            self.slot.put_back(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::devices::DeviceHub;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(u16, bool)>>>);

    impl KeyboardDevice for Recorder {
        fn key(&mut self, code: KeyCode, pressed: bool) -> Result<()> {
            self.0.lock().push((code.0, pressed));
            Ok(())
        }
    }

    fn hub() -> (Arc<DeviceHub>, Recorder) {
        let rec = Recorder::default();
        let hub = DeviceHub::builder().keyboard(Box::new(rec.clone())).build();
        (hub, rec)
    }

    #[test]
    fn uppercase_synthesises_shift() {
        let (hub, rec) = hub();
        let kb = hub.keyboard().unwrap();
        kb.type_str(&Context::background(), "aB").unwrap();
        assert_eq!(
            *rec.0.lock(),
            vec![
                (30, true),
                (30, false),
                (42, true),
                (48, true),
                (48, false),
                (42, false)
            ]
        );
    }

    #[test]
    fn accel_releases_in_reverse_order() {
        let (hub, rec) = hub();
        let kb = hub.keyboard().unwrap();
        kb.accel(&Context::background(), "ctrl+SHIFT+Space").unwrap();
        assert_eq!(
            *rec.0.lock(),
            vec![
                (29, true),
                (42, true),
                (57, true),
                (57, false),
                (42, false),
                (29, false)
            ]
        );
    }

    #[test]
    fn unknown_accel_key_injects_nothing() {
        let (hub, rec) = hub();
        let kb = hub.keyboard().unwrap();
        let err = kb.accel(&Context::background(), "Ctrl+Hyper").unwrap_err();
        assert!(matches!(err, IthError::UnknownKey { ref name } if name == "Hyper"));
        assert!(rec.0.lock().is_empty());
    }

    #[test]
    fn untypeable_char_reports_position_before_injecting() {
        let (hub, rec) = hub();
        let kb = hub.keyboard().unwrap();
        let err = kb.type_str(&Context::background(), "caf\u{e9}").unwrap_err();
        assert!(matches!(
            err,
            IthError::Untypeable {
                ch: '\u{e9}',
                position: 3
            }
        ));
        assert!(rec.0.lock().is_empty());
    }

    #[test]
    fn accel_press_and_release_split() {
        let (hub, rec) = hub();
        let kb = hub.keyboard().unwrap();
        kb.accel_press(&Context::background(), "a").unwrap();
        assert_eq!(*rec.0.lock(), vec![(30, true)]);
        kb.accel_release(&Context::background(), "a").unwrap();
        assert_eq!(rec.0.lock().len(), 2);
    }

    #[test]
    fn cancelled_context_stops_typing() {
        let (hub, rec) = hub();
        let kb = hub.keyboard().unwrap();
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        assert!(kb.type_str(&ctx, "abc").unwrap_err().is_cancellation());
        assert!(rec.0.lock().is_empty());
    }
}
