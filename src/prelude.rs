//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use inputs_harness::prelude::*;
//! ```

// Core
pub use crate::core::config::HarnessConfig;
pub use crate::core::context::{CancelHandle, Context};
pub use crate::core::errors::{IthError, Result, ResultExt};

// Actions
pub use crate::action::poll::{PollOptions, poll};
pub use crate::action::{Action, combine, compose, named, retry, sleep};

// UI automation
pub use crate::surface::{AutomationConn, ConnExt, Request};
pub use crate::uiauto::automation::UiAutoContext;
pub use crate::uiauto::finder::Finder;
pub use crate::uiauto::node::{Point, Rect, Role, UiNode};
pub use crate::uiauto::vkb::VirtualKeyboardContext;

// Input
pub use crate::input::devices::DeviceHub;
pub use crate::input::keyboard::KeyboardEventWriter;
pub use crate::ime::InputMethod;
pub use crate::ime::data::InputData;

// Test page and validation
pub use crate::testserver::{InputField, InputModality, InputsTestServer};
pub use crate::validate::wait_for_field_text_to_be;

// Fixtures, registry and runner
pub use crate::fixture::inputs::{InputsFixtureParams, standard_fixtures};
pub use crate::fixture::{Environment, FixtureData};
pub use crate::registry::{Param, Registry, TestCase};
pub use crate::runner::{Harness, RunReport, State};

// User actions
pub use crate::useractions::{UserActionCfg, UserContext, user_action};
