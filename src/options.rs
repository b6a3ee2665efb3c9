//! Serve options and the details record a successful serve produces.

use std::collections::HashMap;

use serde::Serialize;

use crate::network::{NetworkInterface, BIND_ALL_ADDRESS, DEFAULT_ADDRESS};

pub const DEFAULT_SERVER_PORT: u16 = 8100;
pub const DEFAULT_LAB_PORT: u16 = 8200;

/// Raw, partially specified options as collected from the command line and
/// the project file. Every field is optional; `ServeOptions::resolve` fills
/// the gaps.
#[derive(Debug, Clone, Default)]
pub struct ServeInput {
    pub host: Option<String>,
    pub port: Option<String>,
    pub external: bool,
    pub external_address_required: bool,
    pub public_host: Option<String>,
    pub livereload: Option<bool>,
    pub proxy: Option<bool>,
    pub lab: bool,
    pub lab_host: Option<String>,
    pub lab_port: Option<String>,
    pub open: bool,
    pub browser: Option<String>,
    pub browser_option: Option<String>,
    pub platform: Option<String>,
    pub project: Option<String>,
    pub configuration: Option<String>,
    pub https: bool,
    pub dev_server_url: Option<String>,
    pub verbose: bool,
    pub env: HashMap<String, String>,
    pub separated_args: Vec<String>,
}

/// Fully resolved configuration for one serve invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    pub livereload: bool,
    pub proxy: bool,
    pub external_address_required: bool,
    pub public_host: Option<String>,
    pub open: bool,
    pub browser: Option<String>,
    pub browser_option: Option<String>,
    pub lab: bool,
    pub lab_host: String,
    pub lab_port: u16,
    pub platform: Option<String>,
    pub project: Option<String>,
    pub configuration: Option<String>,
    pub https: bool,
    /// Externally supplied address of an already running primary server.
    pub dev_server_url: Option<String>,
    pub verbose: bool,
    /// Extra environment variables for the downstream tool.
    pub env: HashMap<String, String>,
    /// Arguments after `--`, forwarded verbatim.
    #[serde(rename = "--")]
    pub separated_args: Vec<String>,
}

impl ServeOptions {
    pub fn resolve(input: ServeInput) -> Self {
        let mut host = input
            .host
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
        if input.external && host == DEFAULT_ADDRESS {
            host = BIND_ALL_ADDRESS.to_string();
        }
        Self {
            host,
            port: parse_port(input.port.as_deref(), DEFAULT_SERVER_PORT),
            livereload: input.livereload.unwrap_or(true),
            proxy: input.proxy.unwrap_or(true),
            external_address_required: input.external_address_required,
            public_host: input.public_host,
            open: input.open,
            browser: input.browser,
            browser_option: input.browser_option,
            lab: input.lab,
            lab_host: input
                .lab_host
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            lab_port: parse_port(input.lab_port.as_deref(), DEFAULT_LAB_PORT),
            platform: input.platform,
            project: input.project,
            configuration: input.configuration,
            https: input.https,
            dev_server_url: input.dev_server_url,
            verbose: input.verbose,
            env: input.env,
            separated_args: input.separated_args,
        }
    }

    pub fn protocol(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self::resolve(ServeInput::default())
    }
}

fn parse_port(value: Option<&str>, default: u16) -> u16 {
    value
        .and_then(|v| v.trim().parse::<u16>().ok())
        .filter(|port| *port > 0)
        .unwrap_or(default)
}

/// Result of a successful serve. Produced once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServeDetails {
    /// Launched through a package.json script rather than the raw program.
    pub custom: bool,
    pub protocol: String,
    pub local_address: String,
    pub external_address: String,
    pub external_network_interfaces: Vec<NetworkInterface>,
    pub port: u16,
    pub externally_accessible: bool,
}

impl ServeDetails {
    pub fn local_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.local_address, self.port)
    }
}

/// Where the lab preview ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabDetails {
    pub protocol: String,
    pub address: String,
    pub port: u16,
}

impl LabDetails {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.address, self.port)
    }
}
