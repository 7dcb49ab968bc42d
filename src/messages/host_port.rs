use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Host names that all refer to the local machine. Two addresses that differ only by one of these
///  aliases are treated as the same peer.
const LOOPBACK_ALIASES: [&str; 4] = ["localhost", "127.0.0.1", "::1", "0.0.0.0"];

/// A peer's address as it appears on the wire: a host (name or literal IP address) and a port.
///
/// NB: Matching addresses is 'fuzzy' rather than exact, see [HostPort::fuzzy_eq]. This is a
///      known limitation: host names are never resolved, only the loopback aliases are
///      recognized, so e.g. a peer registered as `127.0.0.1:8111` can be found as
///      `localhost:8111`, but a peer registered under its LAN address can not be found by its
///      host name (and vice versa).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> HostPort {
        HostPort {
            host: host.into(),
            port,
        }
    }

    /// `host:port`
    pub fn as_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// the address with the host replaced by its canonical loopback alias, if there is one
    pub fn as_aliased_address(&self) -> String {
        format!("{}:{}", Self::aliased_host(&self.host), self.port)
    }

    fn is_loopback(host: &str) -> bool {
        LOOPBACK_ALIASES.contains(&host)
    }

    fn aliased_host(host: &str) -> &str {
        if Self::is_loopback(host) && host != "127.0.0.1" {
            "127.0.0.1"
        }
        else if host == "127.0.0.1" {
            "localhost"
        }
        else {
            host
        }
    }

    pub fn fuzzy_eq(&self, other: &HostPort) -> bool {
        if self.port != other.port {
            return false;
        }
        self.host == other.host
            || (Self::is_loopback(&self.host) && Self::is_loopback(&other.host))
    }
}

impl Display for HostPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for HostPort {
    fn from(addr: SocketAddr) -> Self {
        HostPort {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl FromStr for HostPort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':')
            .ok_or_else(|| anyhow!("address without port: {:?}", s))?;
        if host.is_empty() {
            return Err(anyhow!("address without host: {:?}", s));
        }
        let port = port.parse::<u16>()
            .map_err(|e| anyhow!("invalid port in {:?}: {}", s, e))?;

        Ok(HostPort::new(host.trim_start_matches('[').trim_end_matches(']'), port))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::identical("example.org:8111", "example.org:8111", true)]
    #[case::different_port("example.org:8111", "example.org:8112", false)]
    #[case::different_host("example.org:8111", "example.com:8111", false)]
    #[case::localhost_ipv4("localhost:8111", "127.0.0.1:8111", true)]
    #[case::ipv4_localhost("127.0.0.1:8111", "localhost:8111", true)]
    #[case::ipv6_loopback("[::1]:8111", "localhost:8111", true)]
    #[case::loopback_port_mismatch("localhost:8111", "127.0.0.1:8112", false)]
    #[case::lan_vs_loopback("10.0.0.5:8111", "localhost:8111", false)]
    #[case::hostname_not_resolved("my-laptop:8111", "10.0.0.5:8111", false)]
    fn test_fuzzy_eq(#[case] a: &str, #[case] b: &str, #[case] expected: bool) {
        let a = HostPort::from_str(a).unwrap();
        let b = HostPort::from_str(b).unwrap();
        assert_eq!(a.fuzzy_eq(&b), expected);
        assert_eq!(b.fuzzy_eq(&a), expected);
    }

    #[rstest]
    #[case::hostname("example.org:1", Some(HostPort::new("example.org", 1)))]
    #[case::ipv6("[::1]:8111", Some(HostPort::new("::1", 8111)))]
    #[case::no_port("example.org", None)]
    #[case::bad_port("example.org:99999", None)]
    #[case::no_host(":8111", None)]
    fn test_from_str(#[case] s: &str, #[case] expected: Option<HostPort>) {
        assert_eq!(HostPort::from_str(s).ok(), expected);
    }

    #[rstest]
    #[case::localhost("localhost", "127.0.0.1:5")]
    #[case::ipv4_loopback("127.0.0.1", "localhost:5")]
    #[case::other("example.org", "example.org:5")]
    fn test_aliased_address(#[case] host: &str, #[case] expected: &str) {
        assert_eq!(HostPort::new(host, 5).as_aliased_address(), expected);
    }

    #[test]
    fn test_json_form() {
        let json = serde_json::to_string(&HostPort::new("localhost", 8111)).unwrap();
        assert_eq!(json, r#"{"host":"localhost","port":8111}"#);
    }
}
