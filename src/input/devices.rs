//! Process-wide input devices with scoped, exclusive acquisition.
//!
//! Each device lives in a [`DeviceSlot`]. Acquiring takes the backend out of
//! its slot and hands it to a guard; dropping the guard puts it back. A
//! second acquisition while a guard is alive fails with
//! [`IthError::DeviceBusy`].

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::context::Context;
use crate::core::errors::{IthError, Result};
use crate::input::keyboard::KeyboardEventWriter;
use crate::input::keycodes::KeyCode;
use crate::input::touch::TouchEventWriter;
use crate::surface::MouseButton;
use crate::uiauto::node::Point;

/// Backend delivering key events to the OS input stack.
pub trait KeyboardDevice: Send {
    fn key(&mut self, code: KeyCode, pressed: bool) -> Result<()>;
}

/// One finger on a touch surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub slot: u8,
    pub point: Point,
}

/// Backend for touchscreens and trackpads. Each report lists every contact
/// currently down; an empty report lifts all fingers.
pub trait TouchDevice: Send {
    fn report(&mut self, contacts: &[Contact]) -> Result<()>;
}

/// Backend for a relative pointer.
pub trait PointerDevice: Send {
    fn move_by(&mut self, dx: i32, dy: i32) -> Result<()>;
    fn button(&mut self, button: MouseButton, pressed: bool) -> Result<()>;
}

/// CRAS-style audio backend with a loopback (Aloop) driver.
pub trait AudioDevice: Send + Sync {
    fn set_aloop(&self, ctx: &Context, enabled: bool) -> Result<()>;
    fn play(&self, ctx: &Context, file: &Path) -> Result<()>;
}

/// Holder of one exclusive device backend.
pub struct DeviceSlot<T: ?Sized> {
    name: &'static str,
    backend: Mutex<Option<Box<T>>>,
    present: bool,
}

impl<T: ?Sized> DeviceSlot<T> {
    fn new(name: &'static str, backend: Option<Box<T>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            present: backend.is_some(),
            backend: Mutex::new(backend),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take the backend out of the slot.
    pub(crate) fn take(&self) -> Result<Box<T>> {
        if !self.present {
            return Err(IthError::Device {
                device: self.name,
                details: "device not present on this DUT".to_string(),
            });
        }
        self.backend
            .lock()
            .take()
            .ok_or(IthError::DeviceBusy { device: self.name })
    }

    /// Return the backend to the slot.
    pub(crate) fn put_back(&self, backend: Box<T>) {
        tracing::debug!(device = self.name, "released");
        *self.backend.lock() = Some(backend);
    }

    pub fn is_available(&self) -> bool {
        self.backend.lock().is_some()
    }
}

/// Relative pointer guard.
pub struct MouseWriter {
    slot: Arc<DeviceSlot<dyn PointerDevice>>,
    device: Mutex<Option<Box<dyn PointerDevice>>>,
}

impl MouseWriter {
    fn with<R>(&self, f: impl FnOnce(&mut dyn PointerDevice) -> Result<R>) -> Result<R> {
        let mut guard = self.device.lock();
        let device = guard.as_deref_mut().ok_or(IthError::Device {
            device: "mouse",
            details: "writer already closed".to_string(),
        })?;
        f(device)
    }

    pub fn move_by(&self, ctx: &Context, dx: i32, dy: i32) -> Result<()> {
        ctx.err()?;
        self.with(|d| d.move_by(dx, dy))
    }

    pub fn click(&self, ctx: &Context, button: MouseButton) -> Result<()> {
        ctx.err()?;
        self.with(|d| {
            d.button(button, true)?;
            d.button(button, false)
        })
    }
}

impl Drop for MouseWriter {
    fn drop(&mut self) {
        if let Some(device) = self.device.lock().take() {
            self.slot.put_back(device);
        }
    }
}

/// Registry of the DUT's input devices.
pub struct DeviceHub {
    keyboard: Arc<DeviceSlot<dyn KeyboardDevice>>,
    touchscreen: Arc<DeviceSlot<dyn TouchDevice>>,
    trackpad: Arc<DeviceSlot<dyn TouchDevice>>,
    mouse: Arc<DeviceSlot<dyn PointerDevice>>,
    audio: Option<Arc<dyn AudioDevice>>,
}

impl std::fmt::Debug for DeviceHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHub")
            .field("keyboard", &self.keyboard.is_available())
            .field("touchscreen", &self.touchscreen.is_available())
            .field("trackpad", &self.trackpad.is_available())
            .field("mouse", &self.mouse.is_available())
            .field("audio", &self.audio.is_some())
            .finish()
    }
}

/// Builder for [`DeviceHub`]; absent devices fail on acquisition.
#[derive(Default)]
pub struct DeviceHubBuilder {
    keyboard: Option<Box<dyn KeyboardDevice>>,
    touchscreen: Option<Box<dyn TouchDevice>>,
    trackpad: Option<Box<dyn TouchDevice>>,
    mouse: Option<Box<dyn PointerDevice>>,
    audio: Option<Arc<dyn AudioDevice>>,
}

impl DeviceHubBuilder {
    #[must_use]
    pub fn keyboard(mut self, device: Box<dyn KeyboardDevice>) -> Self {
        self.keyboard = Some(device);
        self
    }

    #[must_use]
    pub fn touchscreen(mut self, device: Box<dyn TouchDevice>) -> Self {
        self.touchscreen = Some(device);
        self
    }

    #[must_use]
    pub fn trackpad(mut self, device: Box<dyn TouchDevice>) -> Self {
        self.trackpad = Some(device);
        self
    }

    #[must_use]
    pub fn mouse(mut self, device: Box<dyn PointerDevice>) -> Self {
        self.mouse = Some(device);
        self
    }

    #[must_use]
    pub fn audio(mut self, device: Arc<dyn AudioDevice>) -> Self {
        self.audio = Some(device);
        self
    }

    pub fn build(self) -> Arc<DeviceHub> {
        Arc::new(DeviceHub {
            keyboard: DeviceSlot::new("keyboard", self.keyboard),
            touchscreen: DeviceSlot::new("touchscreen", self.touchscreen),
            trackpad: DeviceSlot::new("trackpad", self.trackpad),
            mouse: DeviceSlot::new("mouse", self.mouse),
            audio: self.audio,
        })
    }
}

impl DeviceHub {
    pub fn builder() -> DeviceHubBuilder {
        DeviceHubBuilder::default()
    }

    /// Acquire the keyboard until the returned writer is dropped.
    pub fn keyboard(&self) -> Result<KeyboardEventWriter> {
        let device = self.keyboard.take()?;
        tracing::debug!(device = "keyboard", "acquired");
        Ok(KeyboardEventWriter::new(Arc::clone(&self.keyboard), device))
    }

    pub fn touchscreen(&self) -> Result<TouchEventWriter> {
        let device = self.touchscreen.take()?;
        tracing::debug!(device = "touchscreen", "acquired");
        Ok(TouchEventWriter::new(Arc::clone(&self.touchscreen), device))
    }

    pub fn trackpad(&self) -> Result<TouchEventWriter> {
        let device = self.trackpad.take()?;
        tracing::debug!(device = "trackpad", "acquired");
        Ok(TouchEventWriter::new(Arc::clone(&self.trackpad), device))
    }

    pub fn mouse(&self) -> Result<MouseWriter> {
        let device = self.mouse.take()?;
        tracing::debug!(device = "mouse", "acquired");
        Ok(MouseWriter {
            slot: Arc::clone(&self.mouse),
            device: Mutex::new(Some(device)),
        })
    }

    pub fn audio(&self) -> Result<Arc<dyn AudioDevice>> {
        self.audio.clone().ok_or(IthError::Device {
            device: "audio",
            details: "device not present on this DUT".to_string(),
        })
    }
}
