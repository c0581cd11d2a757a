//! Address string parsing.
//!
//! Stream addresses are written the way they appear on a command line:
//!
//! - `127.0.0.1:8080` or `tcp://127.0.0.1:8080`
//! - `[::1]:8080` or `localhost:8080` (resolved, first result wins)
//! - `unix:///tmp/kiln.sock` (unix only)

use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
#[cfg(unix)]
use std::path::PathBuf;

use socket2::{Domain, SockAddr};

use crate::error::{NetError, NetResult};

/// A resolved socket endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP over IPv4 or IPv6.
    Tcp(SocketAddr),
    /// Unix domain stream socket at a filesystem path.
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Endpoint {
    /// Parses and resolves an address string.
    pub fn parse(address: &str) -> NetResult<Self> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(invalid(address, "address is empty"));
        }

        if let Some(path) = trimmed.strip_prefix("unix://") {
            #[cfg(unix)]
            {
                if path.is_empty() {
                    return Err(invalid(address, "unix socket path is empty"));
                }
                return Ok(Self::Unix(PathBuf::from(path)));
            }
            #[cfg(not(unix))]
            {
                let _ = path;
                return Err(invalid(address, "unix sockets are not supported here"));
            }
        }

        let host_port = match trimmed.split_once("://") {
            Some(("tcp", rest)) => rest,
            Some((scheme, _)) => {
                return Err(invalid(address, &format!("unsupported scheme '{scheme}'")));
            }
            None => trimmed,
        };

        if let Ok(addr) = host_port.parse::<SocketAddr>() {
            return Ok(Self::Tcp(addr));
        }

        let mut resolved = host_port
            .to_socket_addrs()
            .map_err(|e| invalid(address, &e.to_string()))?;
        resolved
            .next()
            .map(Self::Tcp)
            .ok_or_else(|| invalid(address, "name resolved to no addresses"))
    }

    /// Socket domain matching this endpoint.
    pub fn domain(&self) -> Domain {
        match self {
            Self::Tcp(addr) => Domain::for_address(*addr),
            #[cfg(unix)]
            Self::Unix(_) => Domain::UNIX,
        }
    }

    /// Converts to the socket2 address representation.
    pub fn to_sock_addr(&self) -> NetResult<SockAddr> {
        match self {
            Self::Tcp(addr) => Ok(SockAddr::from(*addr)),
            #[cfg(unix)]
            Self::Unix(path) => Ok(SockAddr::unix(path)?),
        }
    }

    /// Returns true for TCP endpoints.
    pub fn is_tcp(&self) -> bool {
        matches!(self, Self::Tcp(_))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Joins a bare host and a port into a stream address.
///
/// IPv6 literals are bracketed so the result parses back as a socket address.
pub fn join_host_port(host: &str, port: u16) -> String {
    let host = host.trim();
    let unbracketed = host.trim_start_matches('[').trim_end_matches(']');
    match unbracketed.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{v6}]:{port}"),
        _ => format!("{host}:{port}"),
    }
}

/// Renders a socket address the way name lookups report it.
///
/// Unnamed unix sockets (for example one end of a pair) render as an empty
/// string.
pub fn display_sock_addr(addr: &SockAddr) -> String {
    if let Some(sock) = addr.as_socket() {
        return sock.to_string();
    }
    #[cfg(unix)]
    if let Some(path) = addr.as_pathname() {
        return path.display().to_string();
    }
    String::new()
}

fn invalid(address: &str, reason: &str) -> NetError {
    NetError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("127.0.0.1", 80, "127.0.0.1:80" ; "ipv4")]
    #[test_case("::1", 9000, "[::1]:9000" ; "ipv6 bare")]
    #[test_case("[::1]", 9000, "[::1]:9000" ; "ipv6 bracketed")]
    #[test_case("localhost", 5000, "localhost:5000" ; "hostname")]
    fn test_join_host_port(host: &str, port: u16, expected: &str) {
        assert_eq!(join_host_port(host, port), expected);
    }

    #[test]
    fn test_parse_tcp_forms() {
        let plain = Endpoint::parse("127.0.0.1:4000").unwrap();
        let scheme = Endpoint::parse("tcp://127.0.0.1:4000").unwrap();
        assert_eq!(plain, scheme);
        assert!(plain.is_tcp());
        assert_eq!(plain.to_string(), "127.0.0.1:4000");
    }

    #[test]
    fn test_parse_ipv6() {
        let endpoint = Endpoint::parse("[::1]:4000").unwrap();
        assert_eq!(endpoint.domain(), Domain::IPV6);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            Endpoint::parse(""),
            Err(NetError::InvalidAddress { .. })
        ));
        assert!(matches!(
            Endpoint::parse("udp://127.0.0.1:53"),
            Err(NetError::InvalidAddress { .. })
        ));
        assert!(matches!(
            Endpoint::parse("127.0.0.1"),
            Err(NetError::InvalidAddress { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_parse_unix() {
        let endpoint = Endpoint::parse("unix:///tmp/kiln.sock").unwrap();
        assert_eq!(endpoint, Endpoint::Unix(PathBuf::from("/tmp/kiln.sock")));
        assert_eq!(endpoint.domain(), Domain::UNIX);
        assert!(Endpoint::parse("unix://").is_err());
    }
}
