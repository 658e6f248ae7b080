//! Request/response transport to the browser's automation surface.
//!
//! The harness never talks to the browser directly; every operation is a
//! [`Request`] sent over an [`AutomationConn`]. Responses are JSON values
//! decoded by the typed helpers on [`ConnExt`].

#![allow(missing_docs)]

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::context::Context;
use crate::core::errors::{IthError, Result};
use crate::uiauto::node::{Point, UiNode};

/// Mouse buttons understood by the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Accessibility actions performed on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum NodeAction {
    DoDefault,
    Focus,
    MakeVisible,
    SetValue(String),
}

/// One call on the automation surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Request {
    /// Evaluate a script expression; returns its JSON result.
    Eval { expr: String },
    /// Full accessibility tree of the desktop; returns a [`UiNode`].
    Snapshot,
    MouseClick {
        point: Point,
        button: MouseButton,
        double: bool,
    },
    MousePress { button: MouseButton },
    MouseRelease { button: MouseButton },
    MouseMove { point: Point, duration_ms: u64 },
    NodeAction { node_id: u64, action: NodeAction },
    GetPref { name: String },
    SetPref { name: String, value: Value },
    /// Installed input method ids, in installation order.
    InputMethods,
    AddInputMethod { id: String },
    RemoveInputMethod { id: String },
    SetCurrentInputMethod { id: String },
    CurrentInputMethod,
    /// Prefix the platform prepends to component IME ids.
    ImePrefix,
    ResetInputMethodSettings { id: String },
    /// Open a tab; returns its numeric id.
    NewTab {
        url: String,
        #[serde(default)]
        incognito: bool,
    },
    CloseTab { tab_id: u64 },
    ResetState,
    Ping,
    /// Whether the shell is in tablet mode; returns a bool.
    IsTabletMode,
    ShowVirtualKeyboard,
    HideVirtualKeyboard,
    Screenshot { path: PathBuf },
    StartRecording { path: PathBuf },
    StopRecording,
}

impl Request {
    /// Short operation name for logs.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Eval { .. } => "eval",
            Self::Snapshot => "snapshot",
            Self::MouseClick { .. } => "mouse_click",
            Self::MousePress { .. } => "mouse_press",
            Self::MouseRelease { .. } => "mouse_release",
            Self::MouseMove { .. } => "mouse_move",
            Self::NodeAction { .. } => "node_action",
            Self::GetPref { .. } => "get_pref",
            Self::SetPref { .. } => "set_pref",
            Self::InputMethods => "input_methods",
            Self::AddInputMethod { .. } => "add_input_method",
            Self::RemoveInputMethod { .. } => "remove_input_method",
            Self::SetCurrentInputMethod { .. } => "set_current_input_method",
            Self::CurrentInputMethod => "current_input_method",
            Self::ImePrefix => "ime_prefix",
            Self::ResetInputMethodSettings { .. } => "reset_input_method_settings",
            Self::NewTab { .. } => "new_tab",
            Self::CloseTab { .. } => "close_tab",
            Self::ResetState => "reset_state",
            Self::Ping => "ping",
            Self::IsTabletMode => "is_tablet_mode",
            Self::ShowVirtualKeyboard => "show_virtual_keyboard",
            Self::HideVirtualKeyboard => "hide_virtual_keyboard",
            Self::Screenshot { .. } => "screenshot",
            Self::StartRecording { .. } => "start_recording",
            Self::StopRecording => "stop_recording",
        }
    }
}

/// Bidirectional channel to the automation surface.
///
/// Implementations must honour `ctx`: a cancelled or expired context fails
/// the call with the context's error.
pub trait AutomationConn: Send + Sync {
    fn call(&self, ctx: &Context, req: &Request) -> Result<Value>;
}

/// Typed helpers over [`AutomationConn::call`].
pub trait ConnExt {
    /// Send `req`, discarding the response.
    fn exec(&self, ctx: &Context, req: Request) -> Result<()>;

    /// Send `req` and decode the response as `T`.
    fn fetch<T: DeserializeOwned>(&self, ctx: &Context, req: Request) -> Result<T>;

    fn snapshot(&self, ctx: &Context) -> Result<UiNode>;

    fn eval<T: DeserializeOwned>(&self, ctx: &Context, expr: &str) -> Result<T>;
}

impl<C: AutomationConn + ?Sized> ConnExt for C {
    fn exec(&self, ctx: &Context, req: Request) -> Result<()> {
        ctx.err()?;
        self.call(ctx, &req).map(|_| ())
    }

    fn fetch<T: DeserializeOwned>(&self, ctx: &Context, req: Request) -> Result<T> {
        ctx.err()?;
        let op = req.op();
        let value = self.call(ctx, &req)?;
        serde_json::from_value(value).map_err(|err| IthError::Serialization {
            context: "automation response",
            details: format!("{op}: {err}"),
        })
    }

    fn snapshot(&self, ctx: &Context) -> Result<UiNode> {
        self.fetch(ctx, Request::Snapshot)
    }

    fn eval<T: DeserializeOwned>(&self, ctx: &Context, expr: &str) -> Result<T> {
        self.fetch(
            ctx,
            Request::Eval {
                expr: expr.to_string(),
            },
        )
    }
}
