//! Static DNS overrides.
//!
//! Overrides are supplied as `host:port:ip` entries, validated up front,
//! and applied to the HTTP client builder before any connection is made.
//! The map is read-only after startup and shared by every chunk task
//! through the client's connection pool.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
};

use reqwest::ClientBuilder;
use tracing::debug;

use crate::errors::FetchError;

/// A validated set of hostname-to-address overrides.
#[derive(Debug, Clone, Default)]
pub struct DnsOverrides {
    /// `(host, port)` to address, keyed for duplicate detection.
    entries: HashMap<(String, u16), IpAddr>,
}

impl DnsOverrides {
    /// Parses `host:port:ip` entries.
    ///
    /// Each entry must have exactly three fields; `host` must be a
    /// hostname (not itself an address), `port` a valid port number, and
    /// `ip` a valid IPv4 or IPv6 address. A repeated `host:port` pair is
    /// rejected.
    pub fn parse(specs: &[String]) -> Result<Self, FetchError> {
        let mut entries = HashMap::new();
        for spec in specs {
            let invalid = |detail: &str| {
                FetchError::Config(format!("invalid resolve entry {spec:?}: {detail}"))
            };
            let mut fields = spec.splitn(3, ':');
            let (Some(host), Some(port), Some(ip)) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(invalid("expected host:port:ip"));
            };
            if host.is_empty() {
                return Err(invalid("host must not be empty"));
            }
            if host.parse::<IpAddr>().is_ok() {
                return Err(invalid("host must be a hostname, not an address"));
            }
            let port: u16 = port
                .parse()
                .map_err(|_| invalid("port must be a number between 0 and 65535"))?;
            let ip: IpAddr = ip
                .parse()
                .map_err(|_| invalid("address must be a valid IPv4 or IPv6 address"))?;
            if entries.insert((host.to_string(), port), ip).is_some() {
                return Err(FetchError::Config(format!(
                    "duplicate resolve entry for {host}:{port}"
                )));
            }
        }
        Ok(Self { entries })
    }

    /// True when no overrides are configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of configured overrides.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Installs every override on the client builder.
    pub(crate) fn apply(&self, mut builder: ClientBuilder) -> ClientBuilder {
        for ((host, port), ip) in &self.entries {
            debug!(host = %host, port = *port, ip = %ip, "applying DNS override");
            builder = builder.resolve(host, SocketAddr::new(*ip, *port));
        }
        builder
    }
}
