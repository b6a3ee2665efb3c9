//! The serve orchestration.
//!
//! `ServeRunner::run` sequences one serve session: before-hook, network and
//! port selection, the primary dev server, the optional lab preview, the
//! browser, the parent notification, and finally the after-hook, which is
//! parked in the teardown registry until the session ends.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::Project;
use crate::error::{ServeError, ServeResult};
use crate::events::{IpcChannel, NullIpc};
use crate::frameworks::{LabServeCli, LabTarget};
use crate::hooks::{merge_payload, HookContext, HookName, HookRunner, NoopHooks};
use crate::network::{
    is_externally_accessible, InterfaceSource, NetworkSelector, SelectRequest, SystemInterfaces,
    DEFAULT_ADDRESS,
};
use crate::opener::{BrowserOpener, SystemBrowser};
use crate::options::{LabDetails, ServeDetails, ServeOptions};
use crate::ports::find_closest_open_port;
use crate::process::{ServeCli, Supervisor, SupervisorDeps};

/// Builds the adapter that runs the lab preview around a primary server.
pub type LabFactory = Arc<dyn Fn(LabTarget) -> Arc<dyn ServeCli> + Send + Sync>;

pub struct ServeRunner {
    project: Project,
    cli: Arc<dyn ServeCli>,
    hooks: Arc<dyn HookRunner>,
    interfaces: Arc<dyn InterfaceSource>,
    browser: Arc<dyn BrowserOpener>,
    ipc: Arc<dyn IpcChannel>,
    lab: LabFactory,
    deps: SupervisorDeps,
}

impl ServeRunner {
    /// A runner with system collaborators and no hooks.
    pub fn new(project: Project, cli: Arc<dyn ServeCli>, deps: SupervisorDeps) -> Self {
        Self {
            project,
            cli,
            hooks: Arc::new(NoopHooks),
            interfaces: Arc::new(SystemInterfaces),
            browser: Arc::new(SystemBrowser),
            ipc: Arc::new(NullIpc),
            lab: Arc::new(|target: LabTarget| {
                Arc::new(LabServeCli::new(target)) as Arc<dyn ServeCli>
            }),
            deps,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn HookRunner>) -> Self {
        self.hooks = hooks;
        self
    }

    #[cfg(test)]
    pub fn with_interfaces(mut self, interfaces: Arc<dyn InterfaceSource>) -> Self {
        self.interfaces = interfaces;
        self
    }

    #[cfg(test)]
    pub fn with_browser(mut self, browser: Arc<dyn BrowserOpener>) -> Self {
        self.browser = browser;
        self
    }

    #[cfg(test)]
    pub fn with_lab(mut self, lab: LabFactory) -> Self {
        self.lab = lab;
        self
    }

    pub fn with_ipc(mut self, ipc: Arc<dyn IpcChannel>) -> Self {
        self.ipc = ipc;
        self
    }

    /// Runs one serve session up to readiness.
    ///
    /// Returns `None` when `dev_server_url` points at a server this process
    /// did not start. Supervised children keep running after this returns;
    /// they are stopped by the teardown registry.
    pub async fn run(&self, options: &ServeOptions) -> ServeResult<Option<ServeDetails>> {
        let project_type = self.project.project_type.to_string();
        let payload = serde_json::to_value(options).unwrap_or(Value::Null);

        self.hooks
            .run(&HookContext::new(
                HookName::ServeBefore,
                project_type.clone(),
                payload.clone(),
            ))
            .await?;

        let details = match options.dev_server_url.as_deref() {
            Some(url) => {
                info!("Using dev server at {}", url);
                None
            }
            None => Some(self.serve_project(options).await?),
        };

        let lab = if options.lab {
            Some(self.serve_lab(options, details.as_ref()).await?)
        } else {
            None
        };

        self.print_banner(options, details.as_ref(), lab.as_ref());

        if options.open {
            self.open_browser(options, details.as_ref(), lab.as_ref()).await;
        }

        if let Some(details) = &details {
            self.ipc.emit_serve_ready(details);
        }

        let after_payload = match &details {
            Some(details) => merge_payload(
                payload,
                serde_json::to_value(details).unwrap_or(Value::Null),
            ),
            None => payload,
        };
        let hooks = Arc::clone(&self.hooks);
        let ctx = HookContext::new(HookName::ServeAfter, project_type, after_payload);
        self.deps
            .teardown
            .register(HookName::ServeAfter.as_str(), move || async move {
                hooks.run(&ctx).await.map_err(anyhow::Error::from)
            });

        Ok(details)
    }

    async fn serve_project(&self, options: &ServeOptions) -> ServeResult<ServeDetails> {
        let selector =
            NetworkSelector::new(Arc::clone(&self.interfaces), Arc::clone(&self.deps.prompter));
        let selection = selector
            .select_external_ip(SelectRequest {
                host: &options.host,
                public_host: options.public_host.as_deref(),
                external_address_required: options.external_address_required,
            })
            .await?;

        let port = find_closest_open_port(options.port)?;
        let resolved = ServeOptions {
            port,
            ..options.clone()
        };

        info!("Starting {}...", self.cli.name());
        let supervisor = Supervisor::new(Arc::clone(&self.cli), &self.project, self.deps.clone());
        supervisor.serve(&resolved).await?;

        Ok(ServeDetails {
            custom: supervisor.invocation().is_script(),
            protocol: options.protocol().to_string(),
            local_address: DEFAULT_ADDRESS.to_string(),
            externally_accessible: is_externally_accessible(&selection.address),
            external_address: selection.address,
            external_network_interfaces: selection.interfaces,
            port,
        })
    }

    async fn serve_lab(
        &self,
        options: &ServeOptions,
        details: Option<&ServeDetails>,
    ) -> ServeResult<LabDetails> {
        let url = match (details, options.dev_server_url.as_deref()) {
            (Some(details), _) => details.local_url(),
            (None, Some(url)) => url.to_string(),
            (None, None) => {
                return Err(ServeError::Io(std::io::Error::other(
                    "lab requires a running dev server",
                )));
            }
        };
        let port = find_closest_open_port(options.lab_port)?;
        let lab_options = ServeOptions {
            host: options.lab_host.clone(),
            port,
            separated_args: Vec::new(),
            ..options.clone()
        };
        let cli = (self.lab)(LabTarget {
            url,
            project_type: self.project.project_type.to_string(),
            app_name: self.project.name.clone(),
            app_version: self.project.version.clone(),
        });
        let supervisor = Supervisor::new(cli, &self.project, self.deps.clone());
        supervisor.serve(&lab_options).await?;

        Ok(LabDetails {
            protocol: options.protocol().to_string(),
            address: options.lab_host.clone(),
            port,
        })
    }

    fn print_banner(
        &self,
        options: &ServeOptions,
        details: Option<&ServeDetails>,
        lab: Option<&LabDetails>,
    ) {
        let mut lines = vec!["Development server running!".to_string()];
        if let Some(lab) = lab {
            lines.push(format!("Lab: {}", lab.url()));
        }
        if let Some(details) = details {
            let local_host = options.public_host.as_deref().unwrap_or(DEFAULT_ADDRESS);
            lines.push(format!(
                "Local: {}://{}:{}",
                details.protocol, local_host, details.port
            ));
            if !details.external_network_interfaces.is_empty() {
                let external: Vec<String> = details
                    .external_network_interfaces
                    .iter()
                    .map(|iface| format!("{}://{}:{}", details.protocol, iface.address, details.port))
                    .collect();
                lines.push(format!("External: {}", external.join(", ")));
            }
        } else if let Some(url) = options.dev_server_url.as_deref() {
            lines.push(format!("Local: {}", url));
        }
        lines.push("Use Ctrl+C to quit this process".to_string());
        info!("{}", lines.join("\n"));
    }

    async fn open_browser(
        &self,
        options: &ServeOptions,
        details: Option<&ServeDetails>,
        lab: Option<&LabDetails>,
    ) {
        let base = match (lab, details) {
            (Some(lab), _) => lab.url(),
            (None, Some(details)) => details.local_url(),
            (None, None) => match options.dev_server_url.clone() {
                Some(url) => url,
                None => return,
            },
        };
        let url = self.cli.modify_open_url(&base, options);
        info!("Opening {}", url);
        let browser = Arc::clone(&self.browser);
        let app = options.browser.clone();
        let target = url.clone();
        let opened =
            tokio::task::spawn_blocking(move || browser.open(&target, app.as_deref())).await;
        match opened {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(url = %url, error = %err, "could not open browser"),
            Err(err) => warn!(url = %url, error = %err, "could not open browser"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::config::{Config, CustomConfig, ProjectType};
    use crate::events::ShutdownReason;
    use crate::frameworks::CustomServeCli;
    use crate::hooks::HookError;
    use crate::network::{NetworkInterface, StaticInterfaces};
    use crate::output::LogSink;
    use crate::package::PackageManager;
    use crate::prompt::NonInteractivePrompter;
    use crate::teardown::TeardownRegistry;

    #[derive(Default)]
    struct RecordingHooks {
        seen: Mutex<Vec<HookContext>>,
        fail_before: bool,
    }

    #[async_trait]
    impl HookRunner for RecordingHooks {
        async fn run(&self, ctx: &HookContext) -> Result<(), HookError> {
            self.seen.lock().unwrap().push(ctx.clone());
            if self.fail_before && ctx.name == HookName::ServeBefore {
                return Err(HookError::Failed {
                    hook: ctx.name,
                    message: "lint failed".into(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingIpc {
        sent: Mutex<Vec<ServeDetails>>,
    }

    impl IpcChannel for RecordingIpc {
        fn emit_serve_ready(&self, details: &ServeDetails) {
            self.sent.lock().unwrap().push(details.clone());
        }
    }

    #[derive(Default)]
    struct RecordingBrowser {
        opened: Mutex<Vec<(String, Option<String>)>>,
    }

    impl BrowserOpener for RecordingBrowser {
        fn open(&self, url: &str, browser: Option<&str>) -> std::io::Result<()> {
            self.opened
                .lock()
                .unwrap()
                .push((url.to_string(), browser.map(String::from)));
            Ok(())
        }
    }

    /// Lab stand-in that records what it was asked to frame.
    #[derive(Default)]
    struct ShellLab {
        target: Mutex<Option<LabTarget>>,
        bound: Mutex<Option<(String, u16)>>,
    }

    struct ShellLabCli(Arc<ShellLab>);

    impl ServeCli for ShellLabCli {
        fn name(&self) -> &str {
            "Lab"
        }

        fn pkg(&self) -> &str {
            "@ionic/lab"
        }

        fn program(&self) -> &str {
            "sh"
        }

        fn prefix(&self) -> &str {
            "lab"
        }

        fn build_args(&self, options: &ServeOptions) -> Vec<String> {
            *self.0.bound.lock().unwrap() = Some((options.host.clone(), options.port));
            vec![
                "-c".into(),
                format!("echo running on {}; exec sleep 30", options.port),
            ]
        }
    }

    struct Harness {
        runner: ServeRunner,
        teardown: TeardownRegistry,
        _shutdown_rx: mpsc::Receiver<ShutdownReason>,
    }

    fn harness(interfaces: Vec<NetworkInterface>) -> Harness {
        let custom = CustomConfig {
            cmd: "sh -c 'echo listening on {port}; exec sleep 30'".into(),
            ready_pattern: None,
            prefix: None,
            env: HashMap::new(),
        };
        let cli = CustomServeCli::from_config(&custom).unwrap();
        let project = Project {
            dir: std::env::temp_dir(),
            name: Some("demo".into()),
            version: Some("1.0.0".into()),
            project_type: ProjectType::Custom,
            npm_client: PackageManager::Npm,
            manifest: None,
            config: Config {
                custom: Some(custom),
                ..Config::default()
            },
        };
        let (shutdown_tx, shutdown_rx) = mpsc::channel(4);
        let teardown = TeardownRegistry::new();
        let deps = SupervisorDeps {
            log: LogSink::new(false, false),
            prompter: Arc::new(NonInteractivePrompter),
            shutdown_tx,
            teardown: teardown.clone(),
            kill_grace: Duration::from_millis(200),
        };
        let runner = ServeRunner::new(project, Arc::new(cli), deps)
            .with_interfaces(Arc::new(StaticInterfaces(interfaces)));
        Harness {
            runner,
            teardown,
            _shutdown_rx: shutdown_rx,
        }
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("0.0.0.0:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn iface(device: &str, address: &str) -> NetworkInterface {
        NetworkInterface {
            device: device.into(),
            address: address.into(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn localhost_session_is_not_externally_accessible() {
        let h = harness(Vec::new());
        let ipc = Arc::new(RecordingIpc::default());
        let runner = h.runner.with_ipc(ipc.clone());
        let port = free_port();
        let options = ServeOptions {
            port,
            ..ServeOptions::default()
        };
        let details = runner.run(&options).await.unwrap().unwrap();
        assert_eq!(
            details,
            ServeDetails {
                custom: false,
                protocol: "http".into(),
                local_address: "localhost".into(),
                external_address: "localhost".into(),
                external_network_interfaces: Vec::new(),
                port,
                externally_accessible: false,
            }
        );
        assert_eq!(*ipc.sent.lock().unwrap(), vec![details]);
        assert!(h.teardown.run().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn wildcard_host_with_one_interface_uses_it() {
        let h = harness(vec![iface("eth0", "192.168.1.5")]);
        let options = ServeOptions {
            host: "0.0.0.0".into(),
            port: free_port(),
            external_address_required: true,
            ..ServeOptions::default()
        };
        let details = h.runner.run(&options).await.unwrap().unwrap();
        assert_eq!(details.external_address, "192.168.1.5");
        assert!(details.externally_accessible);
        assert_eq!(details.external_network_interfaces.len(), 1);
        assert!(h.teardown.run().await.is_empty());
    }

    #[tokio::test]
    async fn ambiguous_interfaces_fail_without_a_prompt() {
        let h = harness(vec![iface("eth0", "192.168.1.5"), iface("wlan0", "10.0.0.2")]);
        let options = ServeOptions {
            host: "0.0.0.0".into(),
            external_address_required: true,
            ..ServeOptions::default()
        };
        let err = h.runner.run(&options).await.unwrap_err();
        assert!(matches!(err, ServeError::AmbiguousInterface { .. }));
        assert!(err.to_string().contains("--public-host"));
        assert_eq!(h.teardown.len(), 0);
    }

    #[tokio::test]
    async fn before_hook_failure_stops_the_session() {
        let h = harness(Vec::new());
        let hooks = Arc::new(RecordingHooks {
            fail_before: true,
            ..RecordingHooks::default()
        });
        let runner = h.runner.with_hooks(hooks.clone());
        let err = runner.run(&ServeOptions::default()).await.unwrap_err();
        assert!(err.to_string().contains("lint failed"));
        assert_eq!(hooks.seen.lock().unwrap().len(), 1);
        assert_eq!(h.teardown.len(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn after_hook_runs_last_with_details() {
        let h = harness(Vec::new());
        let hooks = Arc::new(RecordingHooks::default());
        let runner = h.runner.with_hooks(hooks.clone());
        let port = free_port();
        let options = ServeOptions {
            port,
            ..ServeOptions::default()
        };
        runner.run(&options).await.unwrap();
        assert_eq!(h.teardown.len(), 2);
        assert!(h.teardown.run().await.is_empty());

        let seen = hooks.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].name, HookName::ServeBefore);
        assert_eq!(seen[1].name, HookName::ServeAfter);
        assert_eq!(seen[1].payload["host"], "localhost");
        assert_eq!(seen[1].payload["port"], port);
        assert_eq!(seen[1].payload["externallyAccessible"], false);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn open_uses_adapter_url() {
        let h = harness(Vec::new());
        let browser = Arc::new(RecordingBrowser::default());
        let runner = h.runner.with_browser(browser.clone());
        let port = free_port();
        let options = ServeOptions {
            port,
            open: true,
            browser: Some("firefox".into()),
            browser_option: Some("/#/home".into()),
            ..ServeOptions::default()
        };
        runner.run(&options).await.unwrap();
        assert_eq!(
            *browser.opened.lock().unwrap(),
            vec![(
                format!("http://localhost:{}/#/home", port),
                Some("firefox".to_string())
            )]
        );
        assert!(h.teardown.run().await.is_empty());
    }

    #[tokio::test]
    async fn external_dev_server_produces_no_details() {
        let h = harness(Vec::new());
        let ipc = Arc::new(RecordingIpc::default());
        let runner = h.runner.with_ipc(ipc.clone());
        let options = ServeOptions {
            dev_server_url: Some("http://localhost:3000".into()),
            ..ServeOptions::default()
        };
        assert!(runner.run(&options).await.unwrap().is_none());
        assert!(ipc.sent.lock().unwrap().is_empty());
        assert_eq!(h.teardown.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lab_frames_the_primary_and_gets_opened() {
        let h = harness(Vec::new());
        let lab = Arc::new(ShellLab::default());
        let browser = Arc::new(RecordingBrowser::default());
        let recorder = Arc::clone(&lab);
        let runner = h
            .runner
            .with_browser(browser.clone())
            .with_lab(Arc::new(move |target: LabTarget| {
                *recorder.target.lock().unwrap() = Some(target);
                Arc::new(ShellLabCli(Arc::clone(&recorder))) as Arc<dyn ServeCli>
            }));
        let port = free_port();
        let lab_port = free_port();
        let options = ServeOptions {
            port,
            lab: true,
            lab_port,
            open: true,
            ..ServeOptions::default()
        };
        let details = runner.run(&options).await.unwrap().unwrap();
        assert_eq!(details.port, port);

        assert_eq!(
            *lab.target.lock().unwrap(),
            Some(LabTarget {
                url: format!("http://localhost:{}", port),
                project_type: "custom".into(),
                app_name: Some("demo".into()),
                app_version: Some("1.0.0".into()),
            })
        );
        assert_eq!(
            *lab.bound.lock().unwrap(),
            Some(("localhost".to_string(), lab_port))
        );
        assert_eq!(
            *browser.opened.lock().unwrap(),
            vec![(format!("http://localhost:{}", lab_port), None)]
        );
        assert_eq!(h.teardown.len(), 3);
        assert!(h.teardown.run().await.is_empty());
    }
}
