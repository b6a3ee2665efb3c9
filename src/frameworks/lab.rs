use crate::options::ServeOptions;
use crate::process::{FilterContext, ServeCli};

use super::plain;

const READY_MARKER: &str = "running";

/// What the lab preview frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabTarget {
    /// Address of the primary dev server.
    pub url: String,
    pub project_type: String,
    pub app_name: Option<String>,
    pub app_version: Option<String>,
}

/// Device-frame preview UI around the primary server.
///
/// Expects options whose `host`/`port` are the lab's own bind address.
/// Stdout is only read for readiness and never forwarded.
#[derive(Debug, Clone)]
pub struct LabServeCli {
    target: LabTarget,
}

impl LabServeCli {
    pub fn new(target: LabTarget) -> Self {
        Self { target }
    }
}

impl ServeCli for LabServeCli {
    fn name(&self) -> &str {
        "Ionic Lab"
    }

    fn pkg(&self) -> &str {
        "@ionic/lab"
    }

    fn program(&self) -> &str {
        "ionic-lab"
    }

    fn prefix(&self) -> &str {
        "lab"
    }

    fn build_args(&self, options: &ServeOptions) -> Vec<String> {
        let mut args = vec![
            self.target.url.clone(),
            "--host".to_string(),
            options.host.clone(),
            "--port".to_string(),
            options.port.to_string(),
            "--project-type".to_string(),
            self.target.project_type.clone(),
        ];
        if let Some(name) = &self.target.app_name {
            args.push("--app-name".to_string());
            args.push(name.clone());
        }
        if let Some(version) = &self.target.app_version {
            args.push("--app-version".to_string());
            args.push(version.clone());
        }
        args
    }

    fn stdout_filter(&self, line: &str, cx: &FilterContext<'_>) -> bool {
        if plain(line).contains(READY_MARKER) {
            cx.ready.fire();
        }
        false
    }
}
