use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use regex::Regex;

use crate::config::CustomConfig;
use crate::options::ServeOptions;
use crate::process::{FilterContext, ServeCli};

use super::plain;

/// Any command line from `[custom]`, with `{host}` and `{port}` filled in.
#[derive(Debug, Clone)]
pub struct CustomServeCli {
    program: String,
    args: Vec<String>,
    prefix: String,
    ready_pattern: Option<Regex>,
    env: HashMap<String, String>,
}

impl CustomServeCli {
    pub fn from_config(config: &CustomConfig) -> Result<Self> {
        let mut parts = shell_words::split(&config.cmd)
            .with_context(|| format!("invalid custom command: {}", config.cmd))?;
        if parts.is_empty() {
            return Err(anyhow!("custom command is empty"));
        }
        let program = parts.remove(0);
        let ready_pattern = config
            .ready_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("invalid ready_pattern")?;
        let prefix = config.prefix.clone().unwrap_or_else(|| {
            Path::new(&program)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| program.clone())
        });
        Ok(Self {
            program,
            args: parts,
            prefix,
            ready_pattern,
            env: config.env.clone(),
        })
    }
}

fn substitute(template: &str, options: &ServeOptions) -> String {
    template
        .replace("{host}", &options.host)
        .replace("{port}", &options.port.to_string())
}

impl ServeCli for CustomServeCli {
    fn name(&self) -> &str {
        &self.program
    }

    fn pkg(&self) -> &str {
        &self.program
    }

    fn program(&self) -> &str {
        &self.program
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Nothing to install for an arbitrary command.
    fn global(&self) -> bool {
        true
    }

    fn build_args(&self, options: &ServeOptions) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| substitute(arg, options))
            .chain(options.separated_args.iter().cloned())
            .collect()
    }

    fn build_env_vars(&self, options: &ServeOptions) -> HashMap<String, String> {
        self.env
            .iter()
            .map(|(key, value)| (key.clone(), substitute(value, options)))
            .collect()
    }

    fn stdout_filter(&self, line: &str, cx: &FilterContext<'_>) -> bool {
        match &self.ready_pattern {
            Some(pattern) => {
                if pattern.is_match(&plain(line)) {
                    cx.ready.fire();
                }
            }
            None => cx.ready.fire(),
        }
        true
    }

    fn stderr_filter(&self, line: &str, cx: &FilterContext<'_>) -> bool {
        if let Some(pattern) = &self.ready_pattern {
            if pattern.is_match(&plain(line)) {
                cx.ready.fire();
            }
        }
        true
    }
}
