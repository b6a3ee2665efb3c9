//! User-facing error types.
//!
//! Lower-level failures (spawn errors, hook exits, prompt I/O) are translated
//! into `ServeError` variants that carry an actionable message. The binary
//! prints these as-is and exits non-zero.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::hooks::HookError;
use crate::prompt::PromptError;

pub type ServeResult<T> = Result<T, ServeError>;

/// Fatal errors surfaced by the serve orchestration.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Wildcard bind requested but no usable interface exists.
    #[error(
        "No external network interfaces detected. In order to use the dev server externally you will need one."
    )]
    NoExternalInterface,

    /// Several interfaces are up and nothing says which one clients should use.
    #[error(
        "Multiple network interfaces detected! You're seeing this message because you are in non-interactive mode.\n\
         Please select which IP address to use by specifying --public-host=<ip>.\n\
         Detected addresses: {}",
        .addresses.join(", ")
    )]
    AmbiguousInterface { addresses: Vec<String> },

    /// No free port at or above the requested one.
    #[error("no open port found at or above {start}")]
    PortsExhausted { start: u16 },

    #[error("cannot bind to port {port}: address not available")]
    AddressNotAvailable { port: u16 },

    /// The executable is missing and could not (or may not) be installed.
    #[error("{pkg} is required for this command to work properly.")]
    ToolRequired { pkg: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The child went away before it reported readiness.
    #[error("{program} exited before it was ready{}", exit_suffix(.code))]
    ExitedBeforeReady { program: String, code: Option<i32> },

    #[error("failed to install {pkg}: {message}")]
    Install { pkg: String, message: String },

    #[error("failed to read {}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" (exit code {})", code),
        None => String::new(),
    }
}
