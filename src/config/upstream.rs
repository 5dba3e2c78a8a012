//! Upstream connection string parsing.
//!
//! Only host and port matter for routing; credentials, database path and
//! options are accepted and ignored.

use std::fmt;

use url::Url;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 27017;

/// Where the proxy dials for each session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamAddr {
    pub host: String,
    pub port: u16,
}

impl UpstreamAddr {
    /// Parse `scheme://[user:pass@]host[:port][/db][?options]`.
    pub fn parse(connection_string: &str) -> Result<Self, UpstreamAddrError> {
        let url = Url::parse(connection_string).map_err(|source| UpstreamAddrError::Invalid {
            uri: connection_string.to_string(),
            source,
        })?;

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .map(|host| host.trim_start_matches('[').trim_end_matches(']'))
            .unwrap_or(DEFAULT_HOST)
            .to_string();

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
        })
    }

    /// True when the host names this machine.
    pub fn is_loopback(&self) -> bool {
        matches!(self.host.as_str(), "localhost" | "127.0.0.1" | "::1")
    }
}

impl fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamAddrError {
    #[error("invalid upstream connection string {uri:?}: {source}")]
    Invalid {
        uri: String,
        #[source]
        source: url::ParseError,
    },
}
