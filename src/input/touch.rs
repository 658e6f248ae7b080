//! Touchscreen and trackpad injection.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::context::Context;
use crate::core::errors::{IthError, Result};
use crate::input::devices::{Contact, DeviceSlot, TouchDevice};
use crate::uiauto::node::Point;

/// Time between interpolated touch reports.
const FRAME: Duration = Duration::from_millis(5);

/// Exclusive handle on a touch surface; released when dropped.
pub struct TouchEventWriter {
    slot: Arc<DeviceSlot<dyn TouchDevice>>,
    device: Mutex<Option<Box<dyn TouchDevice>>>,
}

impl std::fmt::Debug for TouchEventWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TouchEventWriter")
            .field("device", &self.slot.name())
            .finish_non_exhaustive()
    }
}

impl TouchEventWriter {
    pub(crate) fn new(slot: Arc<DeviceSlot<dyn TouchDevice>>, device: Box<dyn TouchDevice>) -> Self {
        Self {
            slot,
            device: Mutex::new(Some(device)),
        }
    }

    fn report(&self, ctx: &Context, contacts: &[Contact]) -> Result<()> {
        ctx.err()?;
        let mut guard = self.device.lock();
        let device = guard.as_deref_mut().ok_or(IthError::Device {
            device: self.slot.name(),
            details: "writer already closed".to_string(),
        })?;
        device.report(contacts)
    }

    /// Writer for one finger.
    pub fn single_touch(&self) -> SingleTouchWriter<'_> {
        SingleTouchWriter {
            writer: self,
            down: false,
        }
    }

    /// Writer for several fingers moving together.
    pub fn multi_touch(&self, fingers: u8) -> MultiTouchWriter<'_> {
        MultiTouchWriter {
            writer: self,
            fingers: fingers.max(1),
        }
    }

    /// Touch down at `points[0]`, move through every point over `duration`,
    /// then lift.
    pub fn stroke(&self, ctx: &Context, points: &[Point], duration: Duration) -> Result<()> {
        let Some(first) = points.first() else {
            return Ok(());
        };
        let mut stw = self.single_touch();
        stw.move_to(ctx, first.x, first.y)?;
        let segments = u32::try_from(points.len().saturating_sub(1)).unwrap_or(u32::MAX);
        let per_segment = if segments == 0 {
            Duration::ZERO
        } else {
            duration / segments
        };
        for pair in points.windows(2) {
            stw.glide(ctx, pair[0], pair[1], per_segment)?;
        }
        stw.end(ctx)
    }
}

impl Drop for TouchEventWriter {
    fn drop(&mut self) {
        if let Some(device) = self.device.lock().take() {
            self.slot.put_back(device);
        }
    }
}

fn frames(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis() / FRAME.as_millis())
        .unwrap_or(u32::MAX)
        .max(1)
}

fn lerp(a: Point, b: Point, t: f64) -> Point {
    Point::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t)
}

/// One finger: press-and-move, then release.
pub struct SingleTouchWriter<'a> {
    writer: &'a TouchEventWriter,
    down: bool,
}

impl SingleTouchWriter<'_> {
    /// Put the finger at (x, y), touching down if it was up.
    pub fn move_to(&mut self, ctx: &Context, x: f64, y: f64) -> Result<()> {
        self.writer.report(
            ctx,
            &[Contact {
                slot: 0,
                point: Point::new(x, y),
            }],
        )?;
        self.down = true;
        Ok(())
    }

    fn glide(&mut self, ctx: &Context, from: Point, to: Point, duration: Duration) -> Result<()> {
        let n = frames(duration);
        let step = duration / n;
        for i in 1..=n {
            let p = lerp(from, to, f64::from(i) / f64::from(n));
            self.move_to(ctx, p.x, p.y)?;
            if !step.is_zero() {
                ctx.sleep(step)?;
            }
        }
        Ok(())
    }

    /// Lift the finger.
    pub fn end(&mut self, ctx: &Context) -> Result<()> {
        self.writer.report(ctx, &[])?;
        self.down = false;
        Ok(())
    }
}

impl Drop for SingleTouchWriter<'_> {
    fn drop(&mut self) {
        if self.down {
            let _ = self.writer.report(&Context::background(), &[]);
        }
    }
}

/// Several fingers side by side.
pub struct MultiTouchWriter<'a> {
    writer: &'a TouchEventWriter,
    fingers: u8,
}

impl MultiTouchWriter<'_> {
    fn contacts(&self, at: Point, spacing: f64) -> Vec<Contact> {
        (0..self.fingers)
            .map(|slot| Contact {
                slot,
                point: Point::new(at.x + f64::from(slot) * spacing, at.y),
            })
            .collect()
    }

    /// Swipe all fingers from (x0, y0) to (x1, y1) over `duration`, fingers
    /// `spacing` apart horizontally, then lift.
    #[allow(clippy::too_many_arguments)]
    pub fn swipe(
        &self,
        ctx: &Context,
        x0: f64,
        y0: f64,
        x1: f64,
        y1: f64,
        spacing: f64,
        duration: Duration,
    ) -> Result<()> {
        let from = Point::new(x0, y0);
        let to = Point::new(x1, y1);
        let n = frames(duration);
        let step = duration / n;
        self.writer.report(ctx, &self.contacts(from, spacing))?;
        let moved = (1..=n).try_for_each(|i| {
            let p = lerp(from, to, f64::from(i) / f64::from(n));
            self.writer.report(ctx, &self.contacts(p, spacing))?;
            if step.is_zero() {
                Ok(())
            } else {
                ctx.sleep(step)
            }
        });
        let lifted = self.writer.report(&Context::background(), &[]);
        moved.and(lifted)
    }
}
