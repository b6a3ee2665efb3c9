//! External address selection.
//!
//! When the dev server binds to every interface, clients still need one
//! concrete address to connect to. This module enumerates candidate
//! interfaces and picks one, asking the operator when it cannot decide.

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ServeError, ServeResult};
use crate::prompt::{Choice, Prompter};

/// Address that binds every interface.
pub const BIND_ALL_ADDRESS: &str = "0.0.0.0";
/// Host used when none is given.
pub const DEFAULT_ADDRESS: &str = "localhost";
/// Loopback spellings that other devices can never reach.
pub const LOCAL_ADDRESSES: [&str; 2] = ["localhost", "127.0.0.1"];

/// A host adapter with an IPv4 address other devices might reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInterface {
    pub device: String,
    pub address: String,
}

/// Source of network interfaces.
pub trait InterfaceSource: Send + Sync {
    fn interfaces(&self) -> Vec<NetworkInterface>;
}

/// Reads interfaces from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> Vec<NetworkInterface> {
        let interfaces = match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces,
            Err(err) => {
                warn!(error = %err, "could not enumerate network interfaces");
                return Vec::new();
            }
        };
        interfaces
            .into_iter()
            .filter_map(|iface| match iface.addr {
                if_addrs::IfAddr::V4(addr) if is_suitable(addr.ip) => Some(NetworkInterface {
                    device: iface.name,
                    address: addr.ip.to_string(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// A fixed list.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct StaticInterfaces(pub Vec<NetworkInterface>);

#[cfg(test)]
impl InterfaceSource for StaticInterfaces {
    fn interfaces(&self) -> Vec<NetworkInterface> {
        self.0.clone()
    }
}

fn is_suitable(ip: Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_link_local()
}

/// What the selector needs to know about the request.
#[derive(Debug, Clone, Copy)]
pub struct SelectRequest<'a> {
    pub host: &'a str,
    pub public_host: Option<&'a str>,
    pub external_address_required: bool,
}

/// Chosen address plus every interface considered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub address: String,
    pub interfaces: Vec<NetworkInterface>,
}

pub struct NetworkSelector {
    source: Arc<dyn InterfaceSource>,
    prompter: Arc<dyn Prompter>,
}

impl NetworkSelector {
    pub fn new(source: Arc<dyn InterfaceSource>, prompter: Arc<dyn Prompter>) -> Self {
        Self { source, prompter }
    }

    /// Picks the address clients should use for a server bound to `request.host`.
    ///
    /// Non-wildcard hosts are returned verbatim. For the wildcard, a single
    /// interface is chosen automatically; several interfaces need either
    /// `public_host` or an interactive choice, but only when an external
    /// address is actually required.
    pub async fn select_external_ip(&self, request: SelectRequest<'_>) -> ServeResult<Selection> {
        if request.host != BIND_ALL_ADDRESS {
            if request.external_address_required && LOCAL_ADDRESSES.contains(&request.host) {
                warn!(
                    "Your device or emulator may not be able to access {}.\n\
                     Specify --host={} to make the dev server reachable from other devices.",
                    request.host,
                    BIND_ALL_ADDRESS
                );
            }
            return Ok(Selection {
                address: request.host.to_string(),
                interfaces: Vec::new(),
            });
        }

        let interfaces = self.source.interfaces();
        debug!(count = interfaces.len(), "discovered network interfaces");
        let address = match interfaces.as_slice() {
            [] if request.external_address_required => {
                return Err(ServeError::NoExternalInterface);
            }
            [] => request.host.to_string(),
            [only] => only.address.clone(),
            _ => match request.public_host {
                Some(public_host) => public_host.to_string(),
                None if request.external_address_required => self.ask(&interfaces).await?,
                None => request.host.to_string(),
            },
        };

        Ok(Selection {
            address,
            interfaces,
        })
    }

    async fn ask(&self, interfaces: &[NetworkInterface]) -> ServeResult<String> {
        if !self.prompter.is_interactive() {
            return Err(ServeError::AmbiguousInterface {
                addresses: interfaces.iter().map(|i| i.address.clone()).collect(),
            });
        }
        warn!(
            "Multiple network interfaces detected!\n\
             You will be prompted to select an external-facing IP for the dev server that your device or emulator can access.\n\
             Make sure your device is on the same Wi-Fi network as your computer."
        );
        let choices: Vec<Choice> = interfaces
            .iter()
            .map(|iface| Choice {
                label: format!("{} ({})", iface.address, iface.device),
                value: iface.address.clone(),
            })
            .collect();
        let prompter = Arc::clone(&self.prompter);
        let answer = tokio::task::spawn_blocking(move || {
            prompter.select("Please select which IP to use:", &choices)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(answer)
    }
}

/// Whether other devices could reach `address`.
pub fn is_externally_accessible(address: &str) -> bool {
    address != BIND_ALL_ADDRESS && !LOCAL_ADDRESSES.contains(&address)
}
