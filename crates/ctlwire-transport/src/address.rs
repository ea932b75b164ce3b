//! Parsing of connect/listen addresses.
//!
//! Three forms are understood:
//! - an absolute filesystem path (a local socket or a nonce file),
//! - `file://<path>` (same),
//! - `<scheme>://<host>:<port>` or `<scheme>://[<ipv6>]:<port>` (TCP).

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TransportError;

/// A parsed channel address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// A filesystem path: a Unix socket, or a nonce file naming a loopback port.
    Local(PathBuf),
    /// A TCP endpoint.
    Tcp(SocketAddr),
}

impl Address {
    pub fn parse(input: &str) -> Result<Self, TransportError> {
        let bad = |reason| TransportError::BadAddress {
            address: input.to_string(),
            reason,
        };

        if let Some(path) = input.strip_prefix("file://") {
            if path.is_empty() {
                return Err(bad("empty path"));
            }
            return Ok(Self::Local(PathBuf::from(path)));
        }

        if let Some((scheme, rest)) = input.split_once("://") {
            if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(bad("invalid scheme"));
            }
            return parse_host_port(rest).map(Self::Tcp).map_err(bad);
        }

        if input.starts_with('/') {
            return Ok(Self::Local(PathBuf::from(input)));
        }

        Err(bad("expected an absolute path or scheme://host:port"))
    }
}

impl FromStr for Address {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

fn parse_host_port(rest: &str) -> Result<SocketAddr, &'static str> {
    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        let (host, tail) = bracketed.split_once(']').ok_or("unterminated IPv6 literal")?;
        let port = tail.strip_prefix(':').ok_or("missing port")?;
        (host, port)
    } else {
        rest.rsplit_once(':').ok_or("missing port")?
    };

    let port = parse_port(port)?;
    let ip = if host == "localhost" {
        IpAddr::from([127, 0, 0, 1])
    } else {
        host.parse::<IpAddr>().map_err(|_| "invalid host")?
    };
    Ok(SocketAddr::new(ip, port))
}

/// Decimal port in `1..=65535`, digits only.
pub fn parse_port(s: &str) -> Result<u16, &'static str> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err("invalid port");
    }
    match s.parse::<u32>() {
        Ok(port) if (1..=65535).contains(&port) => Ok(port as u16),
        _ => Err("port out of range"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_path() {
        assert_eq!(
            Address::parse("/run/agent/S.ctl").unwrap(),
            Address::Local(PathBuf::from("/run/agent/S.ctl"))
        );
    }

    #[test]
    fn test_file_url() {
        assert_eq!(
            Address::parse("file:///tmp/S.ctl").unwrap(),
            Address::Local(PathBuf::from("/tmp/S.ctl"))
        );
        assert!(Address::parse("file://").is_err());
    }

    #[test]
    fn test_tcp_forms() {
        assert_eq!(
            Address::parse("ctlwire://127.0.0.1:2000").unwrap(),
            Address::Tcp("127.0.0.1:2000".parse().unwrap())
        );
        assert_eq!(
            Address::parse("ctlwire://[::1]:2000").unwrap(),
            Address::Tcp("[::1]:2000".parse().unwrap())
        );
        assert_eq!(
            Address::parse("tcp://localhost:7").unwrap(),
            Address::Tcp("127.0.0.1:7".parse().unwrap())
        );
    }

    #[test]
    fn test_port_bounds() {
        assert!(Address::parse("ctlwire://127.0.0.1:0").is_err());
        assert!(Address::parse("ctlwire://127.0.0.1:65536").is_err());
        assert!(Address::parse("ctlwire://127.0.0.1:65535").is_ok());
        assert!(Address::parse("ctlwire://127.0.0.1:+80").is_err());
        assert!(Address::parse("ctlwire://127.0.0.1").is_err());
        assert!(Address::parse("ctlwire://[::1]2000").is_err());
    }

    #[test]
    fn test_relative_path_rejected() {
        let err = Address::parse("relative/S.ctl").unwrap_err();
        assert!(matches!(err, TransportError::BadAddress { .. }));
    }
}
