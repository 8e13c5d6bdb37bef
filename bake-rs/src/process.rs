//! Abort signalling and child-process supervision.
//!
//! The host thread (Ctrl-C handler) and the engine thread share two things:
//!
//! * an [`AbortSignal`], checked by the engine before every instruction;
//! * a [`SubprocessSlot`] holding the kill trigger of the child started by
//!   `ShellExecute`, so an abort can stop it instead of waiting for it.
//!
//! [`AbortHandle`] bundles both and is what the host keeps.  The child itself
//! is a `tokio::process` child awaited by [`run_child`] on the engine thread.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::process::Command;
use tokio::sync::Notify;

// ── Abort ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ── Subprocess slot ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct Tracked {
    pid: Option<u32>,
    kill: Arc<Notify>,
}

/// At most one child process is tracked at a time.
#[derive(Debug, Clone, Default)]
pub struct SubprocessSlot(Arc<Mutex<Option<Tracked>>>);

impl SubprocessSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the tracked child to be killed and empty the slot.  Returns
    /// `true` if a child was tracked.
    pub fn kill(&self) -> bool {
        let Ok(mut slot) = self.0.lock() else { return false };
        match slot.take() {
            Some(tracked) => {
                tracing::debug!(pid = ?tracked.pid, "killing subprocess");
                tracked.kill.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.0.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Track a new child and hand back its kill trigger.
    fn put(&self, pid: Option<u32>) -> std::io::Result<Arc<Notify>> {
        let mut slot = self
            .0
            .lock()
            .map_err(|_| std::io::Error::other("subprocess slot poisoned"))?;
        let kill = Arc::new(Notify::new());
        *slot = Some(Tracked { pid, kill: Arc::clone(&kill) });
        Ok(kill)
    }

    fn release(&self) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = None;
        }
    }
}

/// What the host holds to stop a running build.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    pub signal: AbortSignal,
    pub slot: SubprocessSlot,
}

impl AbortHandle {
    /// Raise the abort signal and kill any running child.
    pub fn abort(&self) {
        self.signal.raise();
        if self.slot.kill() {
            tracing::info!("stopping running subprocess on abort");
        }
    }
}

// ── Running a child ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOutcome {
    Exited(i32),
    /// Killed because the abort signal was raised.
    Aborted,
}

/// Start `program` with whitespace-separated `params` and wait for it while
/// watching `abort`.
///
/// Called from the engine's blocking thread.  It borrows the ambient tokio
/// runtime when there is one and starts a current-thread runtime otherwise.
pub fn run_child(
    program: &str,
    params: Option<&str>,
    work_dir: Option<&Path>,
    abort: &AbortHandle,
) -> std::io::Result<ChildOutcome> {
    let mut cmd = Command::new(program);
    if let Some(p) = params {
        cmd.args(p.split_whitespace());
    }
    if let Some(dir) = work_dir {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null()).kill_on_drop(true);

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle.block_on(supervise(cmd, abort)),
        Err(_) => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(supervise(cmd, abort)),
    }
}

async fn supervise(mut cmd: Command, abort: &AbortHandle) -> std::io::Result<ChildOutcome> {
    let mut child = cmd.spawn()?;
    tracing::debug!(pid = ?child.id(), "spawned subprocess");
    let kill = abort.slot.put(child.id())?;

    let outcome = if abort.signal.is_raised() {
        child.kill().await.map(|()| ChildOutcome::Aborted)
    } else {
        tokio::select! {
            status = child.wait() => status.map(|s| ChildOutcome::Exited(s.code().unwrap_or(-1))),
            () = kill.notified() => child.kill().await.map(|()| ChildOutcome::Aborted),
        }
    };
    abort.slot.release();
    outcome
}

// ── Tests ─────────────────────────────────────────────────────────────────────
