//! Input-event injection: keyboard, touch, pointer and audio loopback.

pub mod devices;
pub mod keyboard;
pub mod keycodes;
pub mod touch;
pub mod voice;
