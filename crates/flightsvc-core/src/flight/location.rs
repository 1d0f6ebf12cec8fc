//! Broker network locations (`grpc+tcp://host:port`, `grpc+tls://host:port`).

use crate::error::{FlightError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transport scheme of a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Tcp,
    Tls,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Tcp => "grpc+tcp",
            Scheme::Tls => "grpc+tls",
        }
    }
}

/// Network address where a dataset can be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Location {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Location {
    pub fn for_tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Tcp,
            host: host.into(),
            port,
        }
    }

    pub fn for_tls(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Tls,
            host: host.into(),
            port,
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Tls
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn uri(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.authority())
    }

    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |message: &str| FlightError::InvalidLocation {
            uri: uri.to_string(),
            message: message.to_string(),
        };

        let (scheme, rest) = uri
            .trim()
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "grpc" | "grpc+tcp" | "tcp" => Scheme::Tcp,
            "grpc+tls" | "tls" => Scheme::Tls,
            _ => return Err(invalid("unsupported scheme")),
        };

        let authority = rest.trim_end_matches('/');
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, port) = bracketed
                .split_once("]:")
                .ok_or_else(|| invalid("malformed IPv6 authority"))?;
            (host, port)
        } else {
            authority
                .rsplit_once(':')
                .ok_or_else(|| invalid("missing port"))?
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

impl FromStr for Location {
    type Err = FlightError;

    fn from_str(s: &str) -> Result<Self> {
        Location::parse(s)
    }
}

impl TryFrom<String> for Location {
    type Error = FlightError;

    fn try_from(value: String) -> Result<Self> {
        Location::parse(&value)
    }
}

impl From<Location> for String {
    fn from(location: Location) -> Self {
        location.uri()
    }
}
