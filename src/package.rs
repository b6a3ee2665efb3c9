//! Package manager plumbing: `package.json` access, run-script and install
//! argument vectors, and the interactive installer.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ServeError, ServeResult};

/// Supported package manager clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[default]
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    pub fn program(&self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Yarn => "yarn",
            Self::Pnpm => "pnpm",
        }
    }

    /// Arguments (without the program) that run `script` with `script_args`.
    pub fn run_args(&self, script: &str, script_args: &[String]) -> Vec<String> {
        let mut args = vec!["run".to_string(), script.to_string()];
        if !script_args.is_empty() {
            if *self == Self::Npm {
                args.push("--".to_string());
            }
            args.extend(script_args.iter().cloned());
        }
        args
    }

    /// Arguments (without the program) that add `pkg` as a dev dependency.
    pub fn install_args(&self, pkg: &str) -> Vec<String> {
        let verb = match self {
            Self::Npm => "i",
            Self::Yarn | Self::Pnpm => "add",
        };
        vec![verb.to_string(), "-D".to_string(), pkg.to_string()]
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// The parts of `package.json` the orchestrator reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub scripts: HashMap<String, String>,
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    pub dev_dependencies: HashMap<String, String>,
}

impl PackageManifest {
    /// Reads `package.json` from `dir`; a missing file yields `None`.
    pub fn load(dir: &Path) -> anyhow::Result<Option<Self>> {
        let path = dir.join("package.json");
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ServeError::Manifest { path, source: err }.into());
            }
        };
        let manifest = serde_json::from_str(&raw)
            .map_err(|err| anyhow::anyhow!("failed to parse {}: {}", path.display(), err))?;
        Ok(Some(manifest))
    }

    pub fn has_script(&self, script: &str) -> bool {
        self.scripts.contains_key(script)
    }

    pub fn depends_on(&self, pkg: &str) -> bool {
        self.dependencies.contains_key(pkg) || self.dev_dependencies.contains_key(pkg)
    }
}

/// Installs `pkg` into the project at `dir` with stdio inherited, so the
/// operator sees the package manager's own progress output.
/// The inherited `PATH` with the project's `node_modules/.bin` in front, so
/// locally installed tools resolve first.
pub fn local_bin_path(dir: &Path) -> Option<OsString> {
    let local = dir.join("node_modules").join(".bin");
    let inherited = std::env::var_os("PATH").unwrap_or_default();
    let entries = std::iter::once(local).chain(std::env::split_paths(&inherited));
    match std::env::join_paths(entries) {
        Ok(path) => Some(path),
        Err(err) => {
            debug!(dir = %dir.display(), error = %err, "cannot put local bin dir on PATH");
            None
        }
    }
}

pub async fn install_package(
    manager: PackageManager,
    dir: &Path,
    pkg: &str,
) -> ServeResult<()> {
    let args = manager.install_args(pkg);
    info!(
        "Installing {}: {}",
        pkg,
        shell_words::join(std::iter::once(manager.program()).chain(args.iter().map(String::as_str)))
    );
    let mut command = Command::new(manager.program());
    if let Some(path) = local_bin_path(dir) {
        command.env("PATH", path);
    }
    let status = command
        .args(&args)
        .current_dir(dir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|err| ServeError::Install {
            pkg: pkg.to_string(),
            message: err.to_string(),
        })?;
    debug!(pkg, ?status, "install finished");
    if !status.success() {
        return Err(ServeError::Install {
            pkg: pkg.to_string(),
            message: format!("{} exited with {}", manager, status.code().unwrap_or(1)),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn npm_separates_script_args() {
        let args = PackageManager::Npm.run_args("serve", &["--port".into(), "8100".into()]);
        assert_eq!(args, vec!["run", "serve", "--", "--port", "8100"]);
        assert_eq!(PackageManager::Npm.run_args("serve", &[]), vec!["run", "serve"]);
    }

    #[test]
    fn yarn_and_pnpm_pass_args_directly() {
        let args = PackageManager::Yarn.run_args("serve", &["--port".into(), "8100".into()]);
        assert_eq!(args, vec!["run", "serve", "--port", "8100"]);
        let args = PackageManager::Pnpm.run_args("serve", &["-x".into()]);
        assert_eq!(args, vec!["run", "serve", "-x"]);
    }

    #[test]
    fn install_args_per_client() {
        assert_eq!(PackageManager::Npm.install_args("@ionic/lab"), vec!["i", "-D", "@ionic/lab"]);
        assert_eq!(PackageManager::Yarn.install_args("@ionic/lab"), vec!["add", "-D", "@ionic/lab"]);
        assert_eq!(PackageManager::Pnpm.install_args("@ionic/lab"), vec!["add", "-D", "@ionic/lab"]);
    }

    #[test]
    fn manifest_loads_scripts_and_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{
  "name": "myapp",
  "version": "1.2.3",
  "scripts": { "devserve:serve": "ng serve" },
  "devDependencies": { "@angular/cli": "^17.0.0" }
}"#,
        )
        .unwrap();
        let manifest = PackageManifest::load(dir.path()).unwrap().unwrap();
        assert_eq!(manifest.name.as_deref(), Some("myapp"));
        assert!(manifest.has_script("devserve:serve"));
        assert!(manifest.depends_on("@angular/cli"));
        assert!(!manifest.depends_on("react-scripts"));
    }

    #[test]
    fn missing_manifest_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PackageManifest::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn local_bin_dir_comes_first_on_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = local_bin_path(dir.path()).unwrap();
        let entries: Vec<_> = std::env::split_paths(&path).collect();
        assert_eq!(entries[0], dir.path().join("node_modules").join(".bin"));
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        assert_eq!(entries.len(), 1 + std::env::split_paths(&inherited).count());
    }
}
