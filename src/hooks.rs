//! Lifecycle hooks around the serve action.
//!
//! A hook receives its name and a JSON payload (the serve options, merged
//! with the serve details for `serve:after`). The shell runner hands the
//! payload to commands through `DEVSERVE_HOOK_CONTEXT`.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::package::PackageManager;

pub const HOOK_CONTEXT_ENV: &str = "DEVSERVE_HOOK_CONTEXT";
/// Prefix for package.json scripts that act as hooks.
pub const HOOK_SCRIPT_PREFIX: &str = "devserve:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HookName {
    #[serde(rename = "serve:before")]
    ServeBefore,
    #[serde(rename = "serve:after")]
    ServeAfter,
}

impl HookName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServeBefore => "serve:before",
            Self::ServeAfter => "serve:after",
        }
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One hook invocation.
#[derive(Debug, Clone, Serialize)]
pub struct HookContext {
    pub name: HookName,
    pub project_type: String,
    pub payload: Value,
}

impl HookContext {
    pub fn new(name: HookName, project_type: impl Into<String>, payload: Value) -> Self {
        Self {
            name,
            project_type: project_type.into(),
            payload,
        }
    }
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("An error occurred while running the {hook} hook: {message}")]
    Failed { hook: HookName, message: String },

    #[error("invalid hook command for {hook}: {message}")]
    InvalidCommand { hook: HookName, message: String },
}

#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run(&self, ctx: &HookContext) -> Result<(), HookError>;
}

/// Does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

#[async_trait]
impl HookRunner for NoopHooks {
    async fn run(&self, ctx: &HookContext) -> Result<(), HookError> {
        debug!(hook = %ctx.name, "no hooks configured");
        Ok(())
    }
}

/// One runnable hook step.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HookCommand {
    program: String,
    args: Vec<String>,
}

/// Runs a package.json hook script and configured commands in the project
/// directory, in that order.
#[derive(Debug, Clone)]
pub struct ShellHooks {
    dir: PathBuf,
    npm_client: PackageManager,
    scripts: Vec<String>,
    commands: HashMap<String, Vec<String>>,
}

impl ShellHooks {
    /// `scripts` lists the package.json script names that exist.
    pub fn new(
        dir: PathBuf,
        npm_client: PackageManager,
        scripts: Vec<String>,
        commands: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            dir,
            npm_client,
            scripts,
            commands,
        }
    }

    fn commands_for(&self, hook: HookName) -> Result<Vec<HookCommand>, HookError> {
        let mut steps = Vec::new();
        let script = format!("{}{}", HOOK_SCRIPT_PREFIX, hook);
        if self.scripts.contains(&script) {
            steps.push(HookCommand {
                program: self.npm_client.program().to_string(),
                args: self.npm_client.run_args(&script, &[]),
            });
        }
        for raw in self.commands.get(hook.as_str()).into_iter().flatten() {
            let mut parts = shell_words::split(raw).map_err(|err| HookError::InvalidCommand {
                hook,
                message: err.to_string(),
            })?;
            if parts.is_empty() {
                return Err(HookError::InvalidCommand {
                    hook,
                    message: "empty command".to_string(),
                });
            }
            let program = parts.remove(0);
            steps.push(HookCommand {
                program,
                args: parts,
            });
        }
        Ok(steps)
    }
}

#[async_trait]
impl HookRunner for ShellHooks {
    async fn run(&self, ctx: &HookContext) -> Result<(), HookError> {
        let hook = ctx.name;
        let steps = self.commands_for(hook)?;
        if steps.is_empty() {
            return Ok(());
        }
        let payload = serde_json::to_string(ctx).map_err(|err| HookError::Failed {
            hook,
            message: err.to_string(),
        })?;
        for step in steps {
            info!(
                "Running {} hook: {}",
                hook,
                shell_words::join(std::iter::once(&step.program).chain(step.args.iter()))
            );
            let status = Command::new(&step.program)
                .args(&step.args)
                .current_dir(&self.dir)
                .env(HOOK_CONTEXT_ENV, &payload)
                .stdin(Stdio::null())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .await
                .map_err(|err| HookError::Failed {
                    hook,
                    message: format!("{}: {}", step.program, err),
                })?;
            if !status.success() {
                return Err(HookError::Failed {
                    hook,
                    message: format!(
                        "{} exited with code {}",
                        step.program,
                        status.code().unwrap_or(1)
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Merges two JSON objects, `overlay` winning on key collisions.
pub fn merge_payload(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            base.extend(overlay);
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, overlay) => {
            let mut map = Map::new();
            map.insert("details".to_string(), overlay);
            Value::Object(map)
        }
    }
}
