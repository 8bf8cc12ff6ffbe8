//! Listener address parsing.
//!
//! A listener is configured as a single `http://<host>:<port>` string. The
//! host may be empty (all interfaces), a hostname, or an IPv6 literal with or
//! without brackets.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ConfigError;

/// The host part is greedy, so the rightmost `:<digits>` suffix is always the
/// port separator. That one rule handles bare IPv6 literals (`::1:8080`)
/// without special-casing them ahead of time.
static LISTENER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^http://(\[?[0-9a-zA-Z\-%._:]*\]?):([0-9]+)$").unwrap());

/// A validated listener address.
///
/// Constructed only by [`ListenerAddress::parse`]; an empty host means "all
/// interfaces".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerAddress {
    /// Host to bind: empty, a hostname, or an IPv6 literal (brackets stripped).
    pub host: String,

    /// Port to bind; 0 lets the kernel pick an ephemeral port.
    pub port: u16,
}

impl ListenerAddress {
    /// Parse a `http://<host>:<port>` listener string.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let caps = LISTENER_PATTERN.captures(raw).ok_or_else(|| {
            ConfigError::Validation(format!(
                "listener '{}' is not valid, expected http://<host>:<port>",
                raw
            ))
        })?;

        let mut host = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        if host.starts_with('[') && host.ends_with(']') && host.len() >= 2 {
            host = &host[1..host.len() - 1];
        }

        let port = caps[2].parse::<u16>().map_err(|_| {
            ConfigError::Validation(format!("listener '{}' has an invalid port", raw))
        })?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Bind target accepted by `ToSocketAddrs`: wildcard for an empty host,
    /// brackets restored for IPv6 literals.
    pub fn socket_addr_string(&self) -> String {
        if self.host.is_empty() {
            format!("0.0.0.0:{}", self.port)
        } else if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for ListenerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "http://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "http://{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(host: &str, port: u16) -> ListenerAddress {
        ListenerAddress {
            host: host.to_string(),
            port,
        }
    }

    #[test]
    fn test_parse_accepted_forms() {
        assert_eq!(ListenerAddress::parse("http://:8080").unwrap(), addr("", 8080));
        assert_eq!(
            ListenerAddress::parse("http://123:8080").unwrap(),
            addr("123", 8080)
        );
        assert_eq!(
            ListenerAddress::parse("http://::1:8080").unwrap(),
            addr("::1", 8080)
        );
        assert_eq!(
            ListenerAddress::parse("http://[::1]:8080").unwrap(),
            addr("::1", 8080)
        );
        assert_eq!(
            ListenerAddress::parse("http://random:8080").unwrap(),
            addr("random", 8080)
        );
    }

    #[test]
    fn test_parse_ephemeral_port() {
        assert_eq!(ListenerAddress::parse("http://:0").unwrap(), addr("", 0));
    }

    #[test]
    fn test_parse_rejected_forms() {
        for raw in [
            "http",
            "http://",
            "http://random",
            "http://random:",
            "http://:-8080",
            "http://random:-8080",
            "http://:8080random",
            "randomhttp://:8080random",
            "randomhttp://:8080",
        ] {
            assert!(
                ListenerAddress::parse(raw).is_err(),
                "'{}' should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_parse_port_overflow() {
        assert!(ListenerAddress::parse("http://:99999").is_err());
    }

    #[test]
    fn test_socket_addr_string() {
        assert_eq!(addr("", 8080).socket_addr_string(), "0.0.0.0:8080");
        assert_eq!(addr("::1", 8080).socket_addr_string(), "[::1]:8080");
        assert_eq!(
            addr("localhost", 8080).socket_addr_string(),
            "localhost:8080"
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(addr("", 8080).to_string(), "http://:8080");
        assert_eq!(addr("::1", 8080).to_string(), "http://[::1]:8080");
        assert_eq!(addr("random", 0).to_string(), "http://random:0");
    }
}
