//! Project configuration.
//!
//! This module defines the structure of the `devserve.toml` project file,
//! loads it alongside `package.json`, and works out which framework adapter
//! the project needs.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::package::{PackageManager, PackageManifest};

pub const CONFIG_FILE: &str = "devserve.toml";

/// Top-level structure of `devserve.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Display name of the app; falls back to `package.json`.
    pub name: Option<String>,
    /// Framework of the project; detected from dependencies when absent.
    #[serde(rename = "type")]
    pub project_type: Option<ProjectType>,
    /// Package manager used for scripts and installs.
    pub npm_client: Option<PackageManager>,
    /// Defaults for serve options.
    #[serde(default)]
    pub serve: ServeConfig,
    /// Command for `custom` projects.
    pub custom: Option<CustomConfig>,
    /// Hook name to commands, e.g. `"serve:before" = ["npm run lint"]`.
    #[serde(default)]
    pub hooks: HashMap<String, Vec<String>>,
}

/// `[serve]` table: project-level defaults, overridden by flags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServeConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub lab_host: Option<String>,
    pub lab_port: Option<u16>,
    pub livereload: Option<bool>,
    pub proxy: Option<bool>,
    pub open: Option<bool>,
    pub browser: Option<String>,
    pub public_host: Option<String>,
    /// Prepend elapsed time to child output lines.
    pub timestamp: Option<bool>,
    /// Colorize child output prefixes.
    pub prefix_colors: Option<bool>,
}

/// `[custom]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomConfig {
    /// Command line with `{host}` and `{port}` placeholders.
    pub cmd: String,
    /// Regex that marks the server as ready; the first stdout line otherwise.
    pub ready_pattern: Option<String>,
    /// Log prefix; defaults to the program name.
    pub prefix: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Angular,
    React,
    Vue,
    Custom,
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Angular => "angular",
            Self::React => "react",
            Self::Vue => "vue",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "could not determine the project type in {}.\n\
         Set `type` in {} (angular, react, vue, or custom with a [custom] table).",
        .dir.display(),
        CONFIG_FILE
    )]
    UnknownProjectType { dir: PathBuf },

    #[error("project type is `custom` but {} has no [custom] table", CONFIG_FILE)]
    MissingCustomCommand,
}

/// Everything known about the project being served.
#[derive(Debug, Clone)]
pub struct Project {
    pub dir: PathBuf,
    pub name: Option<String>,
    pub version: Option<String>,
    pub project_type: ProjectType,
    pub npm_client: PackageManager,
    pub manifest: Option<PackageManifest>,
    pub config: Config,
}

impl Project {
    /// Loads the project in `dir`, reading `config_path` instead of
    /// `devserve.toml` when given.
    pub fn load(dir: &Path, config_path: Option<&Path>) -> Result<Self> {
        let default_path = dir.join(CONFIG_FILE);
        let config = match config_path {
            Some(path) => load_config(path)?,
            None if default_path.exists() => load_config(&default_path)?,
            None => Config::default(),
        };
        let manifest = PackageManifest::load(dir)?;
        let project_type = match config.project_type {
            Some(project_type) => project_type,
            None => detect_project_type(manifest.as_ref(), &config).ok_or_else(|| {
                ConfigError::UnknownProjectType {
                    dir: dir.to_path_buf(),
                }
            })?,
        };
        if project_type == ProjectType::Custom && config.custom.is_none() {
            return Err(ConfigError::MissingCustomCommand.into());
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            name: config
                .name
                .clone()
                .or_else(|| manifest.as_ref().and_then(|m| m.name.clone())),
            version: manifest.as_ref().and_then(|m| m.version.clone()),
            project_type,
            npm_client: config.npm_client.unwrap_or_default(),
            manifest,
            config,
        })
    }

    pub fn has_script(&self, script: &str) -> bool {
        self.manifest
            .as_ref()
            .map(|m| m.has_script(script))
            .unwrap_or(false)
    }
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

fn detect_project_type(manifest: Option<&PackageManifest>, config: &Config) -> Option<ProjectType> {
    if let Some(manifest) = manifest {
        let markers = [
            ("@angular/core", ProjectType::Angular),
            ("react-scripts", ProjectType::React),
            ("@vue/cli-service", ProjectType::Vue),
        ];
        for (pkg, project_type) in markers {
            if manifest.depends_on(pkg) {
                return Some(project_type);
            }
        }
    }
    config.custom.as_ref().map(|_| ProjectType::Custom)
}
