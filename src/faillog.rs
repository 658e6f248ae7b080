//! Failure diagnostics written to a test's output directory: a text dump
//! of the UI tree, a screenshot and an optional screen recording.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::context::Context;
use crate::core::errors::{IthError, Result, ResultExt};
use crate::core::paths;
use crate::surface::{AutomationConn, ConnExt, Request};
use crate::uiauto::node::dump_tree;

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|err| IthError::io(dir, err))
}

/// Write the current UI tree to `<dir>/ui_tree_<name>.txt`.
pub fn dump_ui_tree(ctx: &Context, conn: &dyn AutomationConn, dir: &Path, name: &str) -> Result<PathBuf> {
    ensure_dir(dir)?;
    let tree = conn.snapshot(ctx).wrap("snapshot ui tree")?;
    let path = dir.join(paths::ui_tree_file(name));
    fs::write(&path, dump_tree(&tree)).map_err(|err| IthError::io(&path, err))?;
    tracing::debug!(path = %path.display(), "[ITH-FAILLOG] ui tree dumped");
    Ok(path)
}

/// Save a screenshot as `<dir>/screenshot.png`.
pub fn save_screenshot(ctx: &Context, conn: &dyn AutomationConn, dir: &Path) -> Result<PathBuf> {
    ensure_dir(dir)?;
    let path = dir.join(paths::SCREENSHOT_FILE);
    conn.exec(ctx, Request::Screenshot { path: path.clone() })
        .wrap("take screenshot")?;
    Ok(path)
}

/// When `has_error`, dump the UI tree and take a screenshot. Both are
/// attempted; the first failure is returned.
pub fn dump_ui_tree_with_screenshot_on_error(
    ctx: &Context,
    conn: &dyn AutomationConn,
    dir: &Path,
    has_error: bool,
    name: &str,
) -> Result<()> {
    if !has_error {
        return Ok(());
    }
    let dumped = dump_ui_tree(ctx, conn, dir, name);
    let shot = save_screenshot(ctx, conn, dir);
    if let Err(err) = &dumped {
        tracing::warn!(error = %err, "[ITH-FAILLOG] failed to dump ui tree");
    }
    if let Err(err) = &shot {
        tracing::warn!(error = %err, "[ITH-FAILLOG] failed to take screenshot");
    }
    dumped.and(shot).map(|_| ())
}

/// An active screen recording. Stopping it saves `<TestName>.webm`.
pub struct ScreenRecorder {
    conn: Arc<dyn AutomationConn>,
    path: PathBuf,
    stopped: bool,
}

impl std::fmt::Debug for ScreenRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenRecorder")
            .field("path", &self.path)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl ScreenRecorder {
    /// Start recording into `<dir>/<test_name>.webm`.
    pub fn start(ctx: &Context, conn: Arc<dyn AutomationConn>, dir: &Path, test_name: &str) -> Result<Self> {
        ensure_dir(dir)?;
        let path = dir.join(paths::recording_file(test_name));
        conn.exec(ctx, Request::StartRecording { path: path.clone() })
            .wrap("start screen recording")?;
        tracing::debug!(path = %path.display(), "[ITH-FAILLOG] screen recording started");
        Ok(Self {
            conn,
            path,
            stopped: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop and keep the recording.
    pub fn stop_and_save(mut self, ctx: &Context) -> Result<PathBuf> {
        self.stopped = true;
        self.conn
            .exec(ctx, Request::StopRecording)
            .wrap("stop screen recording")?;
        Ok(self.path.clone())
    }
}

impl Drop for ScreenRecorder {
    fn drop(&mut self) {
        if !self.stopped
            && let Err(err) = self
                .conn
                .exec(&Context::background(), Request::StopRecording)
        {
            tracing::warn!(error = %err, "[ITH-FAILLOG] recording left running");
        }
    }
}
