//! Connection configuration.
//!
//! [`ConnectionConfig`] is plain data that hosts can build in code or
//! deserialize from whatever format they keep settings in. It is checked once,
//! when the [`crate::Connection`] is constructed, so a bad uri or timeout
//! never reaches the network.

use std::{fmt, path::PathBuf, time::Duration};

use eppwire_proto::{DEFAULT_MAX_FRAME_LEN, FrameHeader};
use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server uri, e.g. `tls://epp.example.test:700`
    pub uri: String,
    /// Bounds the connect phase and every single frame read
    pub timeout_seconds: u64,
    /// Options handed to the transport verbatim
    #[serde(default)]
    pub transport: TransportOptions,
    /// Largest declared frame length accepted from the server
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: u32,
}

/// Largest accepted `timeout_seconds` (one week).
pub const MAX_TIMEOUT_SECONDS: u64 = 7 * 24 * 60 * 60;

fn default_max_frame_len() -> u32 {
    DEFAULT_MAX_FRAME_LEN
}

impl ConnectionConfig {
    /// Configuration with default transport options and frame limit.
    pub fn new(uri: impl Into<String>, timeout_seconds: u64) -> Self {
        Self {
            uri: uri.into(),
            timeout_seconds,
            transport: TransportOptions::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Replace the transport options.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    /// Timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Check every field and parse the uri.
    ///
    /// # Errors
    ///
    /// `Configuration` naming the first offending field.
    pub fn validate(&self) -> Result<Endpoint, ConnectionError> {
        if self.timeout_seconds == 0 {
            return Err(ConnectionError::Configuration(
                "timeout_seconds must be greater than zero".to_string(),
            ));
        }

        if self.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(ConnectionError::Configuration(format!(
                "timeout_seconds must be at most {MAX_TIMEOUT_SECONDS}"
            )));
        }

        if self.max_frame_len < FrameHeader::SIZE as u32 {
            return Err(ConnectionError::Configuration(format!(
                "max_frame_len must be at least {} bytes",
                FrameHeader::SIZE
            )));
        }

        let tls = &self.transport.tls;
        if tls.client_cert.is_some() != tls.client_key.is_some() {
            return Err(ConnectionError::Configuration(
                "client_cert and client_key must be given together".to_string(),
            ));
        }

        self.uri.parse()
    }
}

/// Transport options, passed through untouched by the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// TLS settings, used by `tls://` endpoints only
    pub tls: TlsOptions,
}

/// TLS client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    /// PEM bundle of trusted roots; the public web roots when absent
    pub ca_file: Option<PathBuf>,
    /// PEM client certificate chain for mutual TLS
    pub client_cert: Option<PathBuf>,
    /// PEM private key matching `client_cert`
    pub client_key: Option<PathBuf>,
    /// Name to verify the server certificate against; the uri host when absent
    pub server_name: Option<String>,
    /// Verify the server certificate chain
    pub verify_peer: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            ca_file: None,
            client_cert: None,
            client_key: None,
            server_name: None,
            verify_peer: true,
        }
    }
}

/// Stream flavor selected by the uri scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain TCP
    Tcp,
    /// TCP wrapped in TLS
    Tls,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Tls => f.write_str("tls"),
        }
    }
}

/// Parsed server uri.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Stream flavor
    pub scheme: Scheme,
    /// Host name or IP address, without IPv6 brackets
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// `host:port` in the form accepted by `ToSocketAddrs`.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}

impl std::str::FromStr for Endpoint {
    type Err = ConnectionError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let invalid =
            |reason: &str| ConnectionError::Configuration(format!("uri '{uri}': {reason}"));

        if uri.trim().is_empty() {
            return Err(ConnectionError::Configuration("uri must not be empty".to_string()));
        }

        let (scheme, rest) = uri.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "tcp" => Scheme::Tcp,
            "tls" | "ssl" => Scheme::Tls,
            other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
        };

        let authority = rest.trim_end_matches('/');
        let (host, port) = authority.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;

        let host = match host.strip_prefix('[') {
            Some(inner) => inner.strip_suffix(']').ok_or_else(|| invalid("unclosed '['"))?,
            None if host.contains(':') => return Err(invalid("IPv6 hosts need brackets")),
            None => host,
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let port: u16 = port.parse().map_err(|_| invalid("port is not a number in 1..=65535"))?;
        if port == 0 {
            return Err(invalid("port is not a number in 1..=65535"));
        }

        Ok(Self { scheme, host: host.to_string(), port })
    }
}
