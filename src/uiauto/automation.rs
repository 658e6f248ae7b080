//! UI tree accessor over the automation surface.
//!
//! Every operation fetches a fresh snapshot; nodes are never cached across
//! calls, so an accessor stays valid across navigations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::action::poll::{PollOptions, poll, poll_break};
use crate::action::{self, Action};
use crate::core::context::Context;
use crate::core::errors::{IthError, Result};
use crate::surface::{AutomationConn, ConnExt, MouseButton, NodeAction, Request};
use crate::uiauto::finder::Finder;
use crate::uiauto::node::{NodeInfo, NodeState, Rect, UiNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Click {
    Left,
    Right,
    Double,
}

/// Finder-based operations against the live accessibility tree.
#[derive(Clone)]
pub struct UiAutoContext {
    conn: Arc<dyn AutomationConn>,
    opts: PollOptions,
}

impl std::fmt::Debug for UiAutoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiAutoContext")
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

impl UiAutoContext {
    pub fn new(conn: Arc<dyn AutomationConn>) -> Self {
        Self {
            conn,
            opts: PollOptions::default(),
        }
    }

    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut next = self.clone();
        next.opts.timeout = timeout;
        next
    }

    #[must_use]
    pub fn with_interval(&self, interval: Duration) -> Self {
        let mut next = self.clone();
        next.opts.interval = interval;
        next
    }

    #[must_use]
    pub fn with_poll_opts(&self, opts: PollOptions) -> Self {
        let mut next = self.clone();
        next.opts = opts;
        next
    }

    pub fn poll_opts(&self) -> PollOptions {
        self.opts
    }

    pub fn conn(&self) -> &Arc<dyn AutomationConn> {
        &self.conn
    }

    /// Fresh snapshot of the whole tree.
    pub fn snapshot(&self, ctx: &Context) -> Result<UiNode> {
        self.conn.snapshot(ctx)
    }

    fn with_node<T>(&self, ctx: &Context, finder: &Finder, f: impl FnOnce(&UiNode) -> T) -> Result<T> {
        let tree = self.snapshot(ctx)?;
        let node = finder.resolve(&tree)?;
        Ok(f(node))
    }

    // ──────────────────── existence ────────────────────

    /// Succeeds when a matching node exists right now.
    pub fn exists(&self, finder: &Finder) -> Action {
        let ui = self.clone();
        let finder = finder.clone();
        Action::new(move |ctx| ui.with_node(ctx, &finder, |_| ()))
    }

    /// Immediate existence check; only "not found" maps to `false`.
    pub fn is_node_found(&self, ctx: &Context, finder: &Finder) -> Result<bool> {
        match self.with_node(ctx, finder, |_| ()) {
            Ok(()) => Ok(true),
            Err(IthError::NodeNotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Succeeds when no matching node exists right now.
    pub fn gone(&self, finder: &Finder) -> Action {
        let ui = self.clone();
        let finder = finder.clone();
        Action::new(move |ctx| {
            if ui.is_node_found(ctx, &finder)? {
                Err(IthError::automation(format!("node {finder} still exists")))
            } else {
                Ok(())
            }
        })
    }

    pub fn wait_until_exists(&self, finder: &Finder) -> Action {
        let ui = self.clone();
        let exists = self.exists(finder);
        Action::new(move |ctx| poll(ctx, |c| exists.run(c), &ui.opts))
    }

    pub fn wait_until_gone(&self, finder: &Finder) -> Action {
        let ui = self.clone();
        let gone = self.gone(finder);
        Action::new(move |ctx| poll(ctx, |c| gone.run(c), &ui.opts))
    }

    /// Succeeds when the node stays absent for `duration`; fails as soon as
    /// it appears.
    pub fn ensure_gone_for(&self, finder: &Finder, duration: Duration) -> Action {
        let ui = self.clone();
        let finder = finder.clone();
        Action::new(move |ctx| {
            let start = Instant::now();
            let opts = PollOptions {
                timeout: duration + ui.opts.timeout,
                interval: ui.opts.interval,
            };
            poll(
                ctx,
                |c| {
                    if ui.is_node_found(c, &finder)? {
                        return Err(poll_break(IthError::automation(format!(
                            "node {finder} appeared when it should not"
                        ))));
                    }
                    let elapsed = start.elapsed();
                    if elapsed >= duration {
                        return Ok(());
                    }
                    Err(IthError::automation(format!(
                        "still watching {finder} for {:.1}s",
                        (duration - elapsed).as_secs_f64()
                    )))
                },
                &opts,
            )
        })
    }

    // ──────────────────── geometry and info ────────────────────

    /// Location of the node once it has stopped moving for one interval.
    pub fn location(&self, ctx: &Context, finder: &Finder) -> Result<Rect> {
        let mut last: Option<Rect> = None;
        let mut current = Rect::default();
        poll(
            ctx,
            |c| match self.immediate_location(c, finder) {
                Ok(rect) => {
                    current = rect;
                    if last == Some(rect) {
                        Ok(())
                    } else {
                        last = Some(rect);
                        Err(IthError::automation(format!(
                            "node {finder} has not stopped changing location"
                        )))
                    }
                }
                Err(err) => {
                    last = None;
                    Err(err)
                }
            },
            &self.opts,
        )?;
        Ok(current)
    }

    /// Location without waiting for it to stabilise.
    pub fn immediate_location(&self, ctx: &Context, finder: &Finder) -> Result<Rect> {
        self.with_node(ctx, finder, |n| n.location)
    }

    /// Waits until the node exists and its location is stable.
    pub fn wait_for_location(&self, finder: &Finder) -> Action {
        let ui = self.clone();
        let finder = finder.clone();
        Action::new(move |ctx| ui.location(ctx, &finder).map(|_| ()))
    }

    pub fn info(&self, ctx: &Context, finder: &Finder) -> Result<NodeInfo> {
        self.with_node(ctx, finder, UiNode::info)
    }

    /// Info of every matching node.
    pub fn nodes_info(&self, ctx: &Context, finder: &Finder) -> Result<Vec<NodeInfo>> {
        let tree = self.snapshot(ctx)?;
        Ok(finder.find_all(&tree).into_iter().map(UiNode::info).collect())
    }

    // ──────────────────── mouse ────────────────────

    fn click(&self, kind: Click, finder: &Finder, wait_stable: bool) -> Action {
        let ui = self.clone();
        let finder = finder.clone();
        Action::new(move |ctx| {
            let rect = if wait_stable {
                ui.location(ctx, &finder)?
            } else {
                ui.immediate_location(ctx, &finder)?
            };
            let (button, double) = match kind {
                Click::Left => (MouseButton::Left, false),
                Click::Right => (MouseButton::Right, false),
                Click::Double => (MouseButton::Left, true),
            };
            ui.conn.exec(
                ctx,
                Request::MouseClick {
                    point: rect.center(),
                    button,
                    double,
                },
            )
        })
    }

    /// Left-click the centre of the node once its location is stable.
    pub fn left_click(&self, finder: &Finder) -> Action {
        self.click(Click::Left, finder, true)
    }

    pub fn right_click(&self, finder: &Finder) -> Action {
        self.click(Click::Right, finder, true)
    }

    pub fn double_click(&self, finder: &Finder) -> Action {
        self.click(Click::Double, finder, true)
    }

    pub fn immediate_left_click(&self, finder: &Finder) -> Action {
        self.click(Click::Left, finder, false)
    }

    /// Click once, then keep clicking until `condition` succeeds.
    pub fn left_click_until(&self, finder: &Finder, condition: Action) -> Action {
        self.retry_until(
            self.left_click(finder),
            self.immediate_left_click(finder),
            condition,
        )
    }

    pub fn right_click_until(&self, finder: &Finder, condition: Action) -> Action {
        self.retry_until(
            self.right_click(finder),
            self.click(Click::Right, finder, false),
            condition,
        )
    }

    /// Run `action`, then poll `condition`, re-running `again` after each
    /// unmet check.
    fn retry_until(&self, first: Action, again: Action, condition: Action) -> Action {
        let ui = self.clone();
        Action::new(move |ctx| {
            first
                .run(ctx)
                .map_err(|err| IthError::action("initially do action", err))?;
            ctx.sleep(ui.opts.interval)?;
            poll(
                ctx,
                |c| match condition.run(c) {
                    Ok(()) => Ok(()),
                    Err(err) if err.is_cancellation() => Err(err),
                    Err(err) => {
                        again.run(c).map_err(|e| IthError::action("redo action", e))?;
                        Err(IthError::action("meet condition after action", err))
                    }
                },
                &ui.opts,
            )
        })
    }

    /// Do `action` until `condition` succeeds.
    pub fn do_until(&self, action: Action, condition: Action) -> Action {
        self.retry_until(action.clone(), action, condition)
    }

    /// Move the cursor to the centre of the node over `duration`.
    pub fn mouse_move_to(&self, finder: &Finder, duration: Duration) -> Action {
        let ui = self.clone();
        let finder = finder.clone();
        Action::new(move |ctx| {
            let rect = ui
                .location(ctx, &finder)
                .map_err(|err| IthError::action(format!("get location of {finder}"), err))?;
            ui.conn.exec(
                ctx,
                Request::MouseMove {
                    point: rect.center(),
                    duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                },
            )
        })
    }

    pub fn mouse_press(&self, button: MouseButton) -> Action {
        let conn = Arc::clone(&self.conn);
        Action::new(move |ctx| conn.exec(ctx, Request::MousePress { button }))
    }

    pub fn mouse_release(&self, button: MouseButton) -> Action {
        let conn = Arc::clone(&self.conn);
        Action::new(move |ctx| conn.exec(ctx, Request::MouseRelease { button }))
    }

    // ──────────────────── node actions ────────────────────

    fn node_action(&self, ctx: &Context, finder: &Finder, action: NodeAction) -> Result<()> {
        let id = self.with_node(ctx, finder, |n| n.id)?;
        self.conn.exec(ctx, Request::NodeAction { node_id: id, action })
    }

    /// Focus the node and wait until it reports the focused state.
    pub fn focus_and_wait(&self, finder: &Finder) -> Action {
        let ui = self.clone();
        let finder = finder.clone();
        Action::new(move |ctx| {
            poll(ctx, |c| ui.node_action(c, &finder, NodeAction::Focus), &ui.opts)?;
            let focused = finder.clone().focused();
            poll(ctx, |c| ui.with_node(c, &focused, |_| ()), &ui.opts)
        })
    }

    /// Focus the node unless it already has focus.
    pub fn ensure_focused(&self, finder: &Finder) -> Action {
        let ui = self.clone();
        let finder = finder.clone();
        Action::new(move |ctx| {
            let info = ui.info(ctx, &finder)?;
            if info.state.contains(&NodeState::Focused) {
                return Ok(());
            }
            ui.focus_and_wait(&finder).run(ctx)
        })
    }

    /// Scroll ancestors so the node becomes visible.
    pub fn make_visible(&self, finder: &Finder) -> Action {
        let ui = self.clone();
        let finder = finder.clone();
        Action::new(move |ctx| ui.node_action(ctx, &finder, NodeAction::MakeVisible))
    }

    /// Perform the node's default action, waiting for the node to appear.
    pub fn do_default(&self, finder: &Finder) -> Action {
        let ui = self.clone();
        let finder = finder.clone();
        Action::new(move |ctx| {
            poll(
                ctx,
                |c| ui.node_action(c, &finder, NodeAction::DoDefault),
                &ui.opts,
            )
        })
    }

    /// Replace the node's value.
    pub fn set_value(&self, finder: &Finder, value: impl Into<String>) -> Action {
        let ui = self.clone();
        let finder = finder.clone();
        let value = value.into();
        Action::new(move |ctx| ui.node_action(ctx, &finder, NodeAction::SetValue(value.clone())))
    }

    // ──────────────────── retries ────────────────────

    /// Retry with this context's poll interval between attempts.
    pub fn retry(&self, n: usize, action: Action) -> Action {
        action::with_interval(self.opts.interval).retry(n, action)
    }

    pub fn retry_silently(&self, n: usize, action: Action) -> Action {
        action::with_interval(self.opts.interval).retry_silently(n, action)
    }
}
