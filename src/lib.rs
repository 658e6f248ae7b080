#![forbid(unsafe_code)]

//! inputs_harness: test orchestration and input-validation engine for
//! end-to-end input-method and keyboard suites.
//!
//! Tests are registered as [`registry::TestCase`]s, run under shared
//! [`fixture`]s by the [`runner::Harness`], and drive the device through
//! composable [`action::Action`]s:
//! 1. **Input injection**: virtual keyboard, touchscreen, mouse and audio
//!    loopback devices acquired one at a time through [`input::devices`]
//! 2. **UI automation**: accessibility-tree finders and the virtual keyboard
//!    helpers in [`uiauto`]
//! 3. **Validation**: polling field values on the input test page until they
//!    match, in [`validate`]
//!
//! # Library usage
//!
//! ```rust,no_run
//! use inputs_harness::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use inputs_harness::core::config::HarnessConfig;
//! use inputs_harness::uiauto::finder::Finder;
//! ```

pub mod prelude;

pub mod action;
pub mod core;
pub mod faillog;
pub mod fixture;
pub mod ime;
pub mod input;
pub mod registry;
pub mod runner;
pub mod sim;
pub mod surface;
pub mod telemetry;
pub mod testserver;
pub mod uiauto;
pub mod useractions;
pub mod validate;
