//! devserve: runs a frontend project's dev server and keeps it supervised.
//!
//! This is the entry point. It parses the command line, merges it with the
//! project's `devserve.toml`, runs one serve session, and then waits for the
//! session to end (Ctrl-C or a crashed child) before tearing everything down.

mod config;
mod error;
mod events;
mod frameworks;
mod hooks;
mod network;
mod opener;
mod options;
mod output;
mod package;
mod ports;
mod process;
mod prompt;
mod runner;
mod teardown;

use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use crate::config::{Project, ServeConfig};
use crate::error::ServeError;
use crate::events::{spawn_signal_listener, FileIpc, ShutdownReason};
use crate::hooks::ShellHooks;
use crate::options::{ServeInput, ServeOptions};
use crate::output::LogSink;
use crate::process::{SupervisorDeps, DEFAULT_KILL_GRACE};
use crate::prompt::{NonInteractivePrompter, Prompter, TerminalPrompter};
use crate::runner::ServeRunner;
use crate::teardown::TeardownRegistry;

/// Environment variable holding the log filter, e.g. `devserve=debug`.
const LOG_ENV: &str = "DEVSERVE_LOG";

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "devserve",
    version,
    about = "Start a local dev server for app development and testing",
    styles = help_styles(),
)]
struct Cli {
    /// Use specific host for the dev server.
    #[arg(long)]
    host: Option<String>,
    /// Use specific port for the dev server.
    #[arg(long, short = 'p')]
    port: Option<String>,
    /// Host the dev server on all network interfaces (i.e. --host=0.0.0.0).
    #[arg(long)]
    external: bool,
    /// Address clients should use when several interfaces are up.
    #[arg(long)]
    public_host: Option<String>,
    /// Do not spin up dev server live-reload.
    #[arg(long)]
    no_livereload: bool,
    /// Do not proxy API requests.
    #[arg(long)]
    no_proxy: bool,
    /// Also start the lab device preview.
    #[arg(long)]
    lab: bool,
    /// Use specific host for the lab preview.
    #[arg(long)]
    lab_host: Option<String>,
    /// Use specific port for the lab preview.
    #[arg(long)]
    lab_port: Option<String>,
    /// Open a browser window once the server is up.
    #[arg(long, short = 'o')]
    open: bool,
    /// Specifies the browser to use (safari, firefox, google chrome).
    #[arg(long, short = 'w')]
    browser: Option<String>,
    /// Specifies a path to open to (e.g. /#/tab/dash).
    #[arg(long)]
    browser_option: Option<String>,
    /// Platform styling for the opened app (ios, android).
    #[arg(long)]
    platform: Option<String>,
    /// Angular project to serve.
    #[arg(long)]
    project: Option<String>,
    /// Build configuration to use (e.g. production).
    #[arg(long, short = 'c')]
    configuration: Option<String>,
    /// Serve over HTTPS.
    #[arg(long)]
    https: bool,
    /// Fail unless the server gets an address other devices can reach.
    #[arg(long)]
    external_address_required: bool,
    /// Use an already running dev server instead of starting one.
    #[arg(long)]
    dev_server_url: Option<String>,
    /// Never prompt.
    #[arg(long)]
    no_interactive: bool,
    /// Print debug logs.
    #[arg(long)]
    verbose: bool,
    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
    /// Prepend elapsed time to server output.
    #[arg(long)]
    timestamp: bool,
    /// Path to devserve.toml.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Project directory (defaults to the current directory).
    #[arg(long)]
    project_dir: Option<PathBuf>,
    /// Arguments forwarded to the dev server after `--`.
    #[arg(last = true)]
    args: Vec<String>,
}

/// How the first phase of the session ended.
enum Phase {
    Served(Result<(), ServeError>),
    Interrupted(Option<ShutdownReason>),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, !cli.no_color);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let dir = match &cli.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let project = Project::load(&dir, cli.config.as_deref())?;
    debug!(
        dir = %dir.display(),
        project_type = %project.project_type,
        npm_client = %project.npm_client,
        "loaded project"
    );

    let serve_config = &project.config.serve;
    let colors = !cli.no_color && serve_config.prefix_colors.unwrap_or(true);
    let timestamp = cli.timestamp || serve_config.timestamp.unwrap_or(false);
    let options = ServeOptions::resolve(build_input(&cli, serve_config));

    let prompter: Arc<dyn Prompter> = if cli.no_interactive {
        Arc::new(NonInteractivePrompter)
    } else {
        Arc::from(TerminalPrompter::detect())
    };

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(8);
    spawn_signal_listener(shutdown_tx.clone());

    let teardown = TeardownRegistry::new();
    let deps = SupervisorDeps {
        log: LogSink::new(colors, timestamp),
        prompter,
        shutdown_tx,
        teardown: teardown.clone(),
        kill_grace: DEFAULT_KILL_GRACE,
    };

    let scripts = project
        .manifest
        .as_ref()
        .map(|m| m.scripts.keys().cloned().collect())
        .unwrap_or_default();
    let hooks = ShellHooks::new(
        dir.clone(),
        project.npm_client,
        scripts,
        project.config.hooks.clone(),
    );
    let adapter = frameworks::adapter_for(&project)?;
    let runner = ServeRunner::new(project, adapter, deps)
        .with_hooks(Arc::new(hooks))
        .with_ipc(Arc::from(FileIpc::from_env()));

    let phase = tokio::select! {
        result = runner.run(&options) => Phase::Served(result.map(|_| ())),
        reason = shutdown_rx.recv() => Phase::Interrupted(reason),
    };

    let mut code = match phase {
        Phase::Served(Ok(())) => {
            let reason = shutdown_rx.recv().await;
            debug!(?reason, "shutting down");
            reason.map(|r| r.exit_code()).unwrap_or(0)
        }
        Phase::Served(Err(err)) => {
            error!("{}", err);
            1
        }
        Phase::Interrupted(reason) => {
            debug!(?reason, "interrupted before the server was ready");
            reason.map(|r| r.exit_code()).unwrap_or(0)
        }
    };

    debug!(steps = teardown.len(), "running teardown");
    for err in teardown.run().await {
        error!("{:#}", err);
        code = 1;
    }
    Ok(code)
}

/// Flags win over `[serve]` values from the project file.
fn build_input(cli: &Cli, serve: &ServeConfig) -> ServeInput {
    ServeInput {
        host: cli.host.clone().or_else(|| serve.host.clone()),
        port: cli
            .port
            .clone()
            .or_else(|| serve.port.map(|p| p.to_string())),
        external: cli.external,
        external_address_required: cli.external_address_required,
        public_host: cli.public_host.clone().or_else(|| serve.public_host.clone()),
        livereload: if cli.no_livereload {
            Some(false)
        } else {
            serve.livereload
        },
        proxy: if cli.no_proxy { Some(false) } else { serve.proxy },
        lab: cli.lab,
        lab_host: cli.lab_host.clone().or_else(|| serve.lab_host.clone()),
        lab_port: cli
            .lab_port
            .clone()
            .or_else(|| serve.lab_port.map(|p| p.to_string())),
        open: cli.open || serve.open.unwrap_or(false),
        browser: cli.browser.clone().or_else(|| serve.browser.clone()),
        browser_option: cli.browser_option.clone(),
        platform: cli.platform.clone(),
        project: cli.project.clone(),
        configuration: cli.configuration.clone(),
        https: cli.https,
        dev_server_url: cli.dev_server_url.clone(),
        verbose: cli.verbose,
        env: HashMap::new(),
        separated_args: cli.args.clone(),
    }
}

fn init_logging(verbose: bool, color: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_ansi(color && std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}
