//! Supervision of one dev-server child process.
//!
//! A `Supervisor` resolves how to launch a tool (raw program or package.json
//! script), spawns it in its own process group, pipes both output streams
//! through the tool's line filters, and resolves once a filter fires the
//! ready signal. The child stays alive until teardown kills its whole
//! process tree, or until it dies on its own, which ends the session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Project;
use crate::error::{ServeError, ServeResult};
use crate::events::{ShutdownReason, ShutdownSender};
use crate::options::ServeOptions;
use crate::output::{LogSink, StreamKind};
use crate::package::{self, PackageManager};
use crate::prompt::{PromptError, Prompter};
use crate::teardown::TeardownRegistry;

/// How often the connectivity probe retries.
const PROBE_INTERVAL: Duration = Duration::from_millis(500);
/// How often the operator is told we are still waiting.
const NOTICE_INTERVAL: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
/// Time between SIGTERM and SIGKILL during teardown.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(800);

/// Lifecycle of a spawned child as seen by its waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Pending,
    Ready,
    Exited(Option<i32>),
}

/// Single-fire readiness signal shared by the line filters of one child.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    tx: Arc<watch::Sender<ReadyState>>,
}

impl ReadySignal {
    fn new() -> (Self, watch::Receiver<ReadyState>) {
        let (tx, rx) = watch::channel(ReadyState::Pending);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Marks the child ready. Only the first call has any effect.
    pub fn fire(&self) {
        self.tx.send_if_modified(|state| {
            if *state == ReadyState::Pending {
                *state = ReadyState::Ready;
                true
            } else {
                false
            }
        });
    }

    #[cfg(test)]
    pub fn is_ready(&self) -> bool {
        *self.tx.borrow() == ReadyState::Ready
    }

    fn exited(&self, code: Option<i32>) {
        self.tx.send_if_modified(|state| {
            if matches!(state, ReadyState::Exited(_)) {
                false
            } else {
                *state = ReadyState::Exited(code);
                true
            }
        });
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new().0
    }
}

/// What a line filter can see besides the line.
pub struct FilterContext<'a> {
    pub ready: &'a ReadySignal,
    /// The tool was launched through a package.json script, so its output
    /// may be wrapped or reformatted by the package manager.
    pub via_script: bool,
}

/// A supervised dev-server tool.
///
/// Implementations describe how to launch one tool and how to read its
/// output; `Supervisor` does the rest.
pub trait ServeCli: Send + Sync {
    /// Display name, e.g. "Angular CLI".
    fn name(&self) -> &str;
    /// npm package that provides `program`.
    fn pkg(&self) -> &str;
    fn program(&self) -> &str;
    /// Tag for forwarded log lines.
    fn prefix(&self) -> &str;

    /// package.json script preferred over `program` when it exists.
    fn script(&self) -> Option<&str> {
        None
    }

    /// Globally installed tools are never offered for local install.
    fn global(&self) -> bool {
        false
    }

    /// Arguments after `program` for a direct launch.
    fn build_args(&self, options: &ServeOptions) -> Vec<String>;

    /// Arguments passed to the script when launched through one.
    fn build_script_args(&self, _options: &ServeOptions) -> Vec<String> {
        Vec::new()
    }

    fn build_env_vars(&self, _options: &ServeOptions) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Returns whether `line` goes to the aggregated log. Without a better
    /// signal, any stdout output means the tool is up.
    fn stdout_filter(&self, _line: &str, cx: &FilterContext<'_>) -> bool {
        cx.ready.fire();
        true
    }

    fn stderr_filter(&self, _line: &str, _cx: &FilterContext<'_>) -> bool {
        true
    }

    /// URL handed to the browser for `url`.
    fn modify_open_url(&self, url: &str, options: &ServeOptions) -> String {
        format!("{}{}", url, options.browser_option.as_deref().unwrap_or(""))
    }
}

/// How a tool is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Program(String),
    Script {
        client: PackageManager,
        script: String,
    },
}

impl Invocation {
    /// Uses the tool's script when the project defines it.
    pub fn resolve(cli: &dyn ServeCli, project: &Project) -> Self {
        match cli.script() {
            Some(script) if project.has_script(script) => Self::Script {
                client: project.npm_client,
                script: script.to_string(),
            },
            _ => Self::Program(cli.program().to_string()),
        }
    }

    pub fn program(&self) -> &str {
        match self {
            Self::Program(program) => program,
            Self::Script { client, .. } => client.program(),
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(self, Self::Script { .. })
    }
}

/// Shared collaborators every supervisor needs.
#[derive(Clone)]
pub struct SupervisorDeps {
    pub log: LogSink,
    pub prompter: Arc<dyn Prompter>,
    pub shutdown_tx: ShutdownSender,
    pub teardown: TeardownRegistry,
    pub kill_grace: Duration,
}

/// Handle to a running child.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    program: String,
    pid: Option<u32>,
    stopping: AtomicBool,
    state: watch::Receiver<ReadyState>,
}

impl ProcessHandle {
    pub fn state(&self) -> ReadyState {
        *self.inner.state.borrow()
    }

    /// Resolves when the child reports ready; fails if it exits first.
    pub async fn wait_ready(&self) -> ServeResult<()> {
        let mut rx = self.inner.state.clone();
        let state = rx
            .wait_for(|state| *state != ReadyState::Pending)
            .await
            .map(|state| *state)
            .unwrap_or(ReadyState::Exited(None));
        match state {
            ReadyState::Exited(code) => Err(ServeError::ExitedBeforeReady {
                program: self.inner.program.clone(),
                code,
            }),
            _ => Ok(()),
        }
    }

    /// Kills the child's process tree. The exit is expected from here on,
    /// so it no longer ends the session.
    pub async fn terminate(&self, grace: Duration) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        let Some(pid) = self.inner.pid else {
            return;
        };
        if matches!(self.state(), ReadyState::Exited(_)) {
            return;
        }
        debug!(program = %self.inner.program, pid, "stopping process tree");
        signal_tree(pid, false);
        let mut rx = self.inner.state.clone();
        let exited = tokio::time::timeout(
            grace,
            rx.wait_for(|state| matches!(state, ReadyState::Exited(_))),
        )
        .await
        .map(|result| result.is_ok())
        .unwrap_or(false);
        if !exited {
            debug!(program = %self.inner.program, pid, "escalating to SIGKILL");
            signal_tree(pid, true);
        }
    }
}

enum SpawnFailure {
    NotFound,
    Failed(ServeError),
}

/// Launches and watches one `ServeCli` tool.
pub struct Supervisor {
    cli: Arc<dyn ServeCli>,
    dir: PathBuf,
    npm_client: PackageManager,
    invocation: Invocation,
    deps: SupervisorDeps,
}

impl Supervisor {
    pub fn new(cli: Arc<dyn ServeCli>, project: &Project, deps: SupervisorDeps) -> Self {
        let invocation = Invocation::resolve(cli.as_ref(), project);
        debug!(tool = cli.name(), ?invocation, "resolved invocation");
        Self {
            cli,
            dir: project.dir.clone(),
            npm_client: project.npm_client,
            invocation,
            deps,
        }
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    /// Spawns the tool for `options.host:options.port` and waits for it to
    /// report ready. A TCP probe runs alongside as a confirmation only.
    pub async fn serve(&self, options: &ServeOptions) -> ServeResult<ProcessHandle> {
        let handle = self.spawn_wrapper(options).await?;
        spawn_connectivity_probe(
            self.invocation.program().to_string(),
            options.host.clone(),
            options.port,
            handle.inner.state.clone(),
        );
        handle.wait_ready().await?;
        debug!(tool = self.cli.name(), "ready");
        Ok(handle)
    }

    async fn spawn_wrapper(&self, options: &ServeOptions) -> ServeResult<ProcessHandle> {
        match self.spawn(options) {
            Ok(handle) => Ok(handle),
            Err(SpawnFailure::Failed(err)) => Err(err),
            Err(SpawnFailure::NotFound) => {
                let pkg = self.cli.pkg().to_string();
                if self.cli.global() {
                    return Err(ServeError::ToolRequired { pkg });
                }
                info!(
                    "Looks like {} isn't installed in this project.\n\
                     This package is required for this command to work properly.",
                    pkg
                );
                if !self.prompt_to_install(&pkg).await? {
                    return Err(ServeError::ToolRequired { pkg });
                }
                package::install_package(self.npm_client, &self.dir, &pkg).await?;
                match self.spawn(options) {
                    Ok(handle) => Ok(handle),
                    Err(SpawnFailure::NotFound) => Err(ServeError::ToolRequired { pkg }),
                    Err(SpawnFailure::Failed(err)) => Err(err),
                }
            }
        }
    }

    async fn prompt_to_install(&self, pkg: &str) -> ServeResult<bool> {
        let prompter = Arc::clone(&self.deps.prompter);
        let message = format!("Install {}?", pkg);
        let answer = tokio::task::spawn_blocking(move || prompter.confirm(&message, true))
            .await
            .map_err(std::io::Error::other)?;
        match answer {
            Ok(confirmed) => Ok(confirmed),
            Err(PromptError::NonInteractive { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn command_line(&self, options: &ServeOptions) -> (String, Vec<String>) {
        match &self.invocation {
            Invocation::Program(program) => (program.clone(), self.cli.build_args(options)),
            Invocation::Script { client, script } => (
                client.program().to_string(),
                client.run_args(script, &self.cli.build_script_args(options)),
            ),
        }
    }

    fn spawn(&self, options: &ServeOptions) -> Result<ProcessHandle, SpawnFailure> {
        let (program, args) = self.command_line(options);
        let mut env = self.cli.build_env_vars(options);
        env.extend(options.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        info!(
            "> {}",
            shell_words::join(std::iter::once(&program).chain(args.iter()))
        );

        let mut command = Command::new(&program);
        if let Some(path) = package::local_bin_path(&self.dir) {
            command.env("PATH", path);
        }
        command
            .args(&args)
            .current_dir(&self.dir)
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            command.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err)
                if err.kind() == std::io::ErrorKind::NotFound && !self.invocation.is_script() =>
            {
                debug!(program = %program, "command not found");
                return Err(SpawnFailure::NotFound);
            }
            Err(err) => {
                return Err(SpawnFailure::Failed(ServeError::Spawn {
                    program,
                    source: err,
                }));
            }
        };
        let pid = child.id();
        debug!(program = %program, ?pid, "spawned");

        let (signal, state) = ReadySignal::new();
        let via_script = self.invocation.is_script();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_stream(
                StreamKind::Stdout,
                stdout,
                Arc::clone(&self.cli),
                signal.clone(),
                via_script,
                self.deps.log.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_stream(
                StreamKind::Stderr,
                stderr,
                Arc::clone(&self.cli),
                signal.clone(),
                via_script,
                self.deps.log.clone(),
            ));
        }

        let handle = ProcessHandle {
            inner: Arc::new(HandleInner {
                program: program.clone(),
                pid,
                stopping: AtomicBool::new(false),
                state,
            }),
        };

        let watcher = handle.clone();
        let shutdown_tx = self.deps.shutdown_tx.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(err) => {
                    warn!(program = %program, error = %err, "failed to wait on child");
                    None
                }
            };
            signal.exited(code);
            if watcher.inner.stopping.load(Ordering::SeqCst) {
                debug!(program = %program, ?code, "stopped");
                return;
            }
            let how = match code {
                Some(code) => format!("exit code {}", code),
                None => "killed by a signal".to_string(),
            };
            error!(
                "{} has unexpectedly closed ({}).\n\
                 The CLI will exit. Please check any output above for error details.",
                program, how
            );
            let _ = shutdown_tx
                .send(ShutdownReason::ChildExited { program, code })
                .await;
        });

        let victim = handle.clone();
        let grace = self.deps.kill_grace;
        self.deps.teardown.register(
            format!("kill {}", self.cli.prefix()),
            move || async move {
                victim.terminate(grace).await;
                Ok(())
            },
        );

        Ok(handle)
    }
}

async fn read_stream<R>(
    stream: StreamKind,
    reader: R,
    cli: Arc<dyn ServeCli>,
    signal: ReadySignal,
    via_script: bool,
    log: LogSink,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(?stream, error = %err, "output stream closed");
                break;
            }
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        let line = String::from_utf8_lossy(&buf);
        let cx = FilterContext {
            ready: &signal,
            via_script,
        };
        let forward = match stream {
            StreamKind::Stdout => cli.stdout_filter(&line, &cx),
            StreamKind::Stderr => cli.stderr_filter(&line, &cx),
        };
        if forward {
            log.emit(cli.prefix(), &line);
        }
    }
}

/// Polls `host:port` until it accepts a connection or the child exits,
/// telling the operator every few seconds that it is still waiting.
fn spawn_connectivity_probe(
    program: String,
    host: String,
    port: u16,
    state: watch::Receiver<ReadyState>,
) {
    tokio::spawn(async move {
        let target = probe_host(&host).to_string();
        debug!(host = %target, port, "awaiting TCP connection");
        let mut probe = tokio::time::interval(PROBE_INTERVAL);
        let mut notice = tokio::time::interval_at(
            tokio::time::Instant::now() + NOTICE_INTERVAL,
            NOTICE_INTERVAL,
        );
        loop {
            tokio::select! {
                _ = probe.tick() => {
                    if matches!(*state.borrow(), ReadyState::Exited(_)) {
                        return;
                    }
                    if is_host_connectable(&target, port).await {
                        debug!(host = %target, port, "connected");
                        return;
                    }
                }
                _ = notice.tick() => {
                    info!("Waiting for connectivity with {}...", program);
                }
            }
        }
    });
}

/// One connection attempt to `host:port`.
pub async fn is_host_connectable(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Wildcard binds are probed through loopback.
fn probe_host(host: &str) -> &str {
    match host {
        "0.0.0.0" => "127.0.0.1",
        "::" => "::1",
        other => other,
    }
}

#[cfg(unix)]
fn signal_tree(pid: u32, force: bool) {
    let sig = if force { libc::SIGKILL } else { libc::SIGTERM };
    unsafe {
        let pid = pid as i32;
        let _ = libc::kill(-pid, sig);
        let _ = libc::kill(pid, sig);
    }
}

#[cfg(windows)]
fn signal_tree(pid: u32, force: bool) {
    if force {
        let _ = std::process::Command::new("taskkill")
            .args(["/pid", &pid.to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        return;
    }
    use windows_sys::Win32::System::Console::GenerateConsoleCtrlEvent;
    use windows_sys::Win32::System::Console::CTRL_BREAK_EVENT;
    // CTRL_BREAK is the closest thing to SIGTERM for a console process group.
    unsafe {
        let _ = GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid);
    }
}

#[cfg(all(not(unix), not(windows)))]
fn signal_tree(_pid: u32, _force: bool) {}
