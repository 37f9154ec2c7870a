// ABOUTME: host:port address value used for the SSH server and the tunnel target.
// ABOUTME: Parses "host", "host:port", "[v6]" and "[v6]:port", filling in a default port.

use std::fmt;

/// A host with an explicit TCP port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    host: String,
    port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host[:port]`, using `default_port` when no port is given.
    pub fn parse(s: &str, default_port: u16) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("address cannot be empty".to_string());
        }

        // Bracketed IPv6: [::1] or [::1]:2222
        if let Some(rest) = s.strip_prefix('[') {
            let close = rest
                .find(']')
                .ok_or_else(|| format!("missing closing bracket in {s}"))?;
            let host = &rest[..close];
            let tail = &rest[close + 1..];
            let port = match tail.strip_prefix(':') {
                Some(port_str) => parse_port(port_str)?,
                None if tail.is_empty() => default_port,
                None => return Err(format!("unexpected characters after ']' in {s}")),
            };
            if host.is_empty() {
                return Err("hostname cannot be empty".to_string());
            }
            return Ok(Self::new(host, port));
        }

        // A bare IPv6 literal has more than one colon and cannot carry a port.
        if s.matches(':').count() > 1 {
            return Ok(Self::new(s, default_port));
        }

        let (host, port) = match s.rfind(':') {
            Some(colon) => (&s[..colon], parse_port(&s[colon + 1..])?),
            None => (s, default_port),
        };

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }

        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Same host, different port.
    pub fn with_port(&self, port: u16) -> Self {
        Self::new(self.host.clone(), port)
    }
}

fn parse_port(s: &str) -> Result<u16, String> {
    match s.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("invalid port: {s}")),
        Ok(port) => Ok(port),
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
