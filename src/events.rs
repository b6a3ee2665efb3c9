//! Shutdown triggers and parent-process notifications.
//!
//! Every way the session can end (operator signal, crashed child) is sent as
//! a `ShutdownReason` on one channel, which the main loop turns into a single
//! teardown pass.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::options::ServeDetails;

/// Environment variable naming the file or FIFO a parent process reads.
pub const IPC_PATH_ENV: &str = "DEVSERVE_IPC_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    SigInt,
    SigTerm,
}

/// Why the session is ending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The operator interrupted the CLI.
    Signal(ProcessSignal),
    /// A supervised process exited without being asked to.
    ChildExited { program: String, code: Option<i32> },
}

impl ShutdownReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Signal(_) => 0,
            Self::ChildExited { .. } => 1,
        }
    }
}

pub type ShutdownSender = mpsc::Sender<ShutdownReason>;

/// Forwards SIGINT/SIGTERM (Ctrl-C elsewhere) to the shutdown channel.
pub fn spawn_signal_listener(tx: ShutdownSender) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    let _ = tx.send(ShutdownReason::Signal(ProcessSignal::SigInt)).await;
                }
                _ = sigterm.recv() => {
                    let _ = tx.send(ShutdownReason::Signal(ProcessSignal::SigTerm)).await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            let _ = tx.send(ShutdownReason::Signal(ProcessSignal::SigInt)).await;
        }
    });
}

/// Structured event for a parent process.
#[derive(Debug, Serialize)]
pub struct IpcMessage<'a, T: Serialize> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub event: &'a str,
    pub data: &'a T,
}

pub trait IpcChannel: Send + Sync {
    /// Best effort; never fails the caller.
    fn emit_serve_ready(&self, details: &ServeDetails);
}

/// Drops every message. Used when nobody is listening.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIpc;

impl IpcChannel for NullIpc {
    fn emit_serve_ready(&self, _details: &ServeDetails) {}
}

/// Appends one JSON line per event to a file or FIFO.
#[derive(Debug, Clone)]
pub struct FileIpc {
    path: PathBuf,
}

impl FileIpc {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `FileIpc` when `DEVSERVE_IPC_PATH` is set, `NullIpc` otherwise.
    pub fn from_env() -> Box<dyn IpcChannel> {
        match std::env::var_os(IPC_PATH_ENV) {
            Some(path) if !path.is_empty() => Box::new(Self::new(path)),
            _ => Box::new(NullIpc),
        }
    }

    fn write<T: Serialize>(&self, event: &str, data: &T) -> anyhow::Result<()> {
        let message = IpcMessage {
            kind: "event",
            event,
            data,
        };
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl IpcChannel for FileIpc {
    fn emit_serve_ready(&self, details: &ServeDetails) {
        match self.write("serve:ready", details) {
            Ok(()) => debug!(path = %self.path.display(), "emitted serve:ready"),
            Err(err) => warn!(error = %err, "could not notify parent process"),
        }
    }
}
