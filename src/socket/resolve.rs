//! Host name resolution

use crate::{Error, Result};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

/// Resolves a host and port to candidate addresses, in preference order
pub trait Resolve: Send + Sync + std::fmt::Debug {
    /// Resolve `host:port`; an empty answer is an error
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>>;
}

/// The operating system resolver
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|source| Error::Resolve {
                host: host.to_string(),
                source,
            })?
            .collect();

        if addrs.is_empty() {
            return Err(Error::NoAddress(host.to_string()));
        }
        Ok(addrs)
    }
}

/// Fixed host → address table, for pinned deployments and tests.
///
/// Host lookups are ASCII case-insensitive. Unknown hosts do not fall back to
/// the system resolver.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an address for `host`; repeated calls append
    pub fn with_host(mut self, host: impl Into<String>, addr: IpAddr) -> Self {
        self.hosts
            .entry(host.into().to_ascii_lowercase())
            .or_default()
            .push(addr);
        self
    }
}

impl Resolve for StaticResolver {
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        self.hosts
            .get(&host.to_ascii_lowercase())
            .filter(|addrs| !addrs.is_empty())
            .map(|addrs| addrs.iter().map(|ip| SocketAddr::new(*ip, port)).collect())
            .ok_or_else(|| Error::NoAddress(host.to_string()))
    }
}
