//! Framework adapters.
//!
//! One `ServeCli` per supported dev-server toolchain, picked by project type.

mod angular;
mod custom;
mod lab;
mod react;
mod vue;

use std::sync::Arc;

use anyhow::Result;

pub use angular::AngularServeCli;
pub use custom::CustomServeCli;
pub use lab::{LabServeCli, LabTarget};
pub use react::ReactServeCli;
pub use vue::VueServeCli;

use crate::config::{ConfigError, Project, ProjectType};
use crate::options::ServeOptions;
use crate::output::sanitize_text;
use crate::process::ServeCli;

/// Returns the adapter that serves `project`.
pub fn adapter_for(project: &Project) -> Result<Arc<dyn ServeCli>> {
    let adapter: Arc<dyn ServeCli> = match project.project_type {
        ProjectType::Angular => Arc::new(AngularServeCli),
        ProjectType::React => Arc::new(ReactServeCli),
        ProjectType::Vue => Arc::new(VueServeCli),
        ProjectType::Custom => {
            let config = project
                .config
                .custom
                .as_ref()
                .ok_or(ConfigError::MissingCustomCommand)?;
            Arc::new(CustomServeCli::from_config(config)?)
        }
    };
    Ok(adapter)
}

/// Open URL for the mobile-framework adapters: the browser option, then the
/// platform styling query when a platform is set.
pub(crate) fn platform_open_url(url: &str, options: &ServeOptions) -> String {
    let mut url = format!("{}{}", url, options.browser_option.as_deref().unwrap_or(""));
    if let Some(platform) = options.platform.as_deref() {
        let mode = if platform == "ios" { "ios" } else { "md" };
        let separator = if url.contains('?') { '&' } else { '?' };
        url.push(separator);
        url.push_str(&format!("ionic:mode={}&ionic:persistConfig=true", mode));
    }
    url
}

/// Line text with color codes removed, for marker matching.
pub(crate) fn plain(line: &str) -> String {
    sanitize_text(line, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, CustomConfig};
    use crate::package::PackageManager;

    fn project(project_type: ProjectType, custom: Option<CustomConfig>) -> Project {
        Project {
            dir: std::env::temp_dir(),
            name: None,
            version: None,
            project_type,
            npm_client: PackageManager::Npm,
            manifest: None,
            config: Config {
                custom,
                ..Config::default()
            },
        }
    }

    #[test]
    fn registry_picks_adapter_by_project_type() {
        assert_eq!(adapter_for(&project(ProjectType::Angular, None)).unwrap().program(), "ng");
        assert_eq!(
            adapter_for(&project(ProjectType::React, None)).unwrap().program(),
            "react-scripts"
        );
        assert_eq!(
            adapter_for(&project(ProjectType::Vue, None)).unwrap().program(),
            "vue-cli-service"
        );
        let custom = CustomConfig {
            cmd: "python3 -m http.server {port}".into(),
            ready_pattern: None,
            prefix: None,
            env: Default::default(),
        };
        let adapter = adapter_for(&project(ProjectType::Custom, Some(custom))).unwrap();
        assert_eq!(adapter.program(), "python3");
        assert!(adapter_for(&project(ProjectType::Custom, None)).is_err());
    }

    #[test]
    fn open_url_carries_browser_option_then_platform_mode() {
        let options = ServeOptions {
            browser_option: Some("/#/tabs".into()),
            platform: Some("ios".into()),
            ..ServeOptions::default()
        };
        assert_eq!(
            platform_open_url("http://localhost:8100", &options),
            "http://localhost:8100/#/tabs?ionic:mode=ios&ionic:persistConfig=true"
        );
        let options = ServeOptions {
            platform: Some("android".into()),
            ..ServeOptions::default()
        };
        assert_eq!(
            platform_open_url("http://localhost:8100", &options),
            "http://localhost:8100?ionic:mode=md&ionic:persistConfig=true"
        );
        assert_eq!(
            platform_open_url("http://localhost:8100", &ServeOptions::default()),
            "http://localhost:8100"
        );
    }
}
