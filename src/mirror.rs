//! OS cursor write worker.
//!
//! `CursorWriter` calls can block (an X11 round trip, a `SetCursorPos` that
//! stalls behind a busy desktop), so they never run on the engine thread.
//! `CursorMirror` owns a background thread holding the writer; commands are
//! queued on a bounded `tokio::sync::mpsc` channel with the non-blocking
//! `try_send()`. Every `MoveTo` yields exactly one `MirrorCompletion`, success
//! or failure, through the completion callback.
//!
//! When the worker exits it restores OS cursor visibility if it had hidden it.

use std::thread;

use tokio::sync::mpsc;

use crate::platform::{CursorWriter, PlatformError};
use crate::scheduler::OsPoint;

/// Channel capacity for pending writer commands. The scheduler keeps at most
/// one move in flight, so this only fills if the worker has wedged.
const CMD_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MirrorCommand {
    MoveTo(OsPoint),
    SetHidden(bool),
}

/// Result of one OS cursor write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorCompletion {
    pub target: OsPoint,
    pub ok: bool,
}

pub struct CursorMirror {
    cmd_tx: Option<mpsc::Sender<MirrorCommand>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CursorMirror {
    /// Moves `writer` onto a new worker thread.
    pub fn spawn(
        writer: Box<dyn CursorWriter>,
        on_complete: Box<dyn Fn(MirrorCompletion) + Send>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel::<MirrorCommand>(CMD_CAPACITY);

        let thread = thread::Builder::new()
            .name("cursor-mirror".into())
            .spawn(move || run_worker(writer, cmd_rx, on_complete));

        let thread = match thread {
            Ok(t) => Some(t),
            Err(e) => {
                log::error!("mirror: failed to spawn worker: {e}");
                None
            }
        };

        Self {
            cmd_tx: Some(cmd_tx),
            thread,
        }
    }

    /// Queues a move. An `Err` means the command never reached the worker
    /// and no completion will follow.
    pub fn move_to(&self, target: OsPoint) -> Result<(), PlatformError> {
        self.enqueue(MirrorCommand::MoveTo(target))
    }

    pub fn set_hidden(&self, hidden: bool) -> Result<(), PlatformError> {
        self.enqueue(MirrorCommand::SetHidden(hidden))
    }

    fn enqueue(&self, cmd: MirrorCommand) -> Result<(), PlatformError> {
        let Some(tx) = self.cmd_tx.as_ref() else {
            return Err(PlatformError::Other("mirror stopped".into()));
        };
        if self.thread.is_none() {
            return Err(PlatformError::Unavailable("mirror worker not running".into()));
        }

        match tx.try_send(cmd) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("mirror: command queue full, {cmd:?} dropped");
                Err(PlatformError::Other("mirror queue full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(PlatformError::Other("mirror worker exited".into()))
            }
        }
    }

    /// Closes the queue and waits for the worker to drain it and exit.
    pub fn shutdown(&mut self) {
        drop(self.cmd_tx.take());
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                log::error!("mirror: worker panicked");
            }
        }
    }
}

impl Drop for CursorMirror {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

fn run_worker(
    mut writer: Box<dyn CursorWriter>,
    mut cmd_rx: mpsc::Receiver<MirrorCommand>,
    on_complete: Box<dyn Fn(MirrorCompletion) + Send>,
) {
    log::debug!("mirror: worker started");
    let mut hidden = false;

    while let Some(cmd) = cmd_rx.blocking_recv() {
        match cmd {
            MirrorCommand::MoveTo(target) => {
                let ok = match writer.move_to(target.x, target.y) {
                    Ok(()) => true,
                    Err(e) => {
                        log::debug!("mirror: write to {target:?} rejected: {e}");
                        false
                    }
                };
                on_complete(MirrorCompletion { target, ok });
            }
            MirrorCommand::SetHidden(hide) if hide != hidden => match writer.set_hidden(hide) {
                Ok(()) => {
                    log::info!("mirror: system cursor {}", if hide { "hidden" } else { "restored" });
                    hidden = hide;
                }
                Err(e) => log::warn!("mirror: cannot change system cursor visibility: {e}"),
            },
            MirrorCommand::SetHidden(_) => {}
        }
    }

    if hidden {
        if let Err(e) = writer.set_hidden(false) {
            log::warn!("mirror: failed to restore system cursor: {e}");
        }
    }
    log::debug!("mirror: worker exited");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
