//! Structured listen addresses.
//!
//! The gateway is configured with multiaddr strings (`/ip4/0.0.0.0/tcp/8080`,
//! `/ip6/::1/tcp/0`, `/dns4/localhost/tcp/8080`). Plain `host:port` and `:port`
//! are accepted as shorthands when they map unambiguously onto a TCP multiaddr.
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
};

use multiaddr::{Multiaddr, Protocol};
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ListenAddrError {
    #[error("invalid multiaddr '{addr}': {source}")]
    Multiaddr {
        addr: String,
        #[source]
        source: multiaddr::Error,
    },

    #[error("unsupported listen address '{addr}': {reason}")]
    Unsupported { addr: String, reason: String },
}

/// Host part of a listen address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenHost {
    Ip(IpAddr),
    Dns(String),
}

/// A TCP listen address parsed from a multiaddr (or shorthand) string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    host: ListenHost,
    port: u16,
}

impl ListenAddr {
    pub fn new(host: ListenHost, port: u16) -> Self {
        Self { host, port }
    }

    pub fn host(&self) -> &ListenHost {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Host string suitable for `TcpListener::bind((host, port))`.
    pub fn bind_host(&self) -> String {
        match &self.host {
            ListenHost::Ip(ip) => ip.to_string(),
            ListenHost::Dns(name) => name.clone(),
        }
    }

    fn from_multiaddr(raw: &str, addr: &Multiaddr) -> Result<Self, ListenAddrError> {
        let unsupported = |reason: &str| ListenAddrError::Unsupported {
            addr: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = addr.iter();
        let host = match parts.next() {
            Some(Protocol::Ip4(ip)) => ListenHost::Ip(IpAddr::V4(ip)),
            Some(Protocol::Ip6(ip)) => ListenHost::Ip(IpAddr::V6(ip)),
            Some(Protocol::Dns(name)) | Some(Protocol::Dns4(name)) | Some(Protocol::Dns6(name)) => {
                ListenHost::Dns(name.into_owned())
            }
            Some(_) => return Err(unsupported("expected /ip4, /ip6 or /dns as first component")),
            None => return Err(unsupported("empty address")),
        };
        let port = match parts.next() {
            Some(Protocol::Tcp(port)) => port,
            Some(_) => return Err(unsupported("only /tcp transports can be served")),
            None => return Err(unsupported("missing /tcp component")),
        };
        if parts.next().is_some() {
            return Err(unsupported("trailing components after /tcp"));
        }

        Ok(Self { host, port })
    }
}

impl FromStr for ListenAddr {
    type Err = ListenAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.starts_with('/') {
            let addr: Multiaddr = trimmed.parse().map_err(|e| ListenAddrError::Multiaddr {
                addr: trimmed.to_string(),
                source: e,
            })?;
            return Self::from_multiaddr(trimmed, &addr);
        }

        // ":8080" listens on every interface
        if let Some(port) = trimmed.strip_prefix(':') {
            let port = port.parse().map_err(|_| ListenAddrError::Unsupported {
                addr: trimmed.to_string(),
                reason: "invalid port".to_string(),
            })?;
            return Ok(Self::new(ListenHost::Ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED)), port));
        }

        trimmed
            .parse::<SocketAddr>()
            .map(SocketAddr::into)
            .map_err(|_| ListenAddrError::Unsupported {
                addr: trimmed.to_string(),
                reason: "expected a multiaddr such as /ip4/127.0.0.1/tcp/8080 or IP:PORT"
                    .to_string(),
            })
    }
}

impl From<SocketAddr> for ListenAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::new(ListenHost::Ip(addr.ip()), addr.port())
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            ListenHost::Ip(IpAddr::V4(ip)) => write!(f, "/ip4/{ip}/tcp/{}", self.port),
            ListenHost::Ip(IpAddr::V6(ip)) => write!(f, "/ip6/{ip}/tcp/{}", self.port),
            ListenHost::Dns(name) => write!(f, "/dns/{name}/tcp/{}", self.port),
        }
    }
}

/// Multiaddr form of an actually-bound socket address.
pub fn socket_to_multiaddr(addr: SocketAddr) -> Multiaddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) => Protocol::Ip4(ip),
        IpAddr::V6(ip) => Protocol::Ip6(ip),
    };
    Multiaddr::empty()
        .with(ip)
        .with(Protocol::Tcp(addr.port()))
}
