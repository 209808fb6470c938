use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default connect timeout used by the Sync Service's own clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of idle pooled connections kept per endpoint
pub const DEFAULT_POOL_MAX_IDLE: usize = 10;

/// Default idle timeout for pooled connections
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Protocol used to reach the Sync Service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    Http,
    Https,
    /// Plain HTTP over a Unix domain socket (ESS only)
    Unix,
    /// HTTP over a Unix domain socket whose traffic is trusted or protected
    /// by the application. No transport encryption is added.
    SecureUnix,
}

impl Protocol {
    /// URL scheme used for requests built with this protocol
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Unix => "unix",
            Protocol::SecureUnix => "secure-unix",
        }
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, Protocol::Unix | Protocol::SecureUnix)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "unix" => Ok(Protocol::Unix),
            "secure-unix" => Ok(Protocol::SecureUnix),
            other => Err(Error::Configuration(format!(
                "unsupported protocol '{}', expected http, https, unix or secure-unix",
                other
            ))),
        }
    }
}

/// Connection settings for a [`SyncServiceClient`](crate::SyncServiceClient).
///
/// For `http`/`https` the `address` is a host name and `port` its listening
/// port. For `unix`/`secure-unix` the `address` is the socket file path of the
/// ESS and `port` is ignored.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub protocol: Protocol,
    pub address: String,
    pub port: u16,
    /// Organization used in request paths, needed only against a CSS
    pub org_id: Option<String>,
    pub app_key: Option<String>,
    #[serde(deserialize_with = "secret_opt")]
    pub app_secret: Option<SecretString>,
    /// PEM encoded CA certificate(s) trusted for `https`
    pub ca_certificate: Option<String>,
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    #[serde(with = "secs_opt")]
    pub request_timeout: Option<Duration>,
    pub pool_max_idle_per_host: usize,
    #[serde(with = "secs")]
    pub pool_idle_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Http,
            address: "localhost".to_string(),
            port: 8080,
            org_id: None,
            app_key: None,
            app_secret: None,
            ca_certificate: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            user_agent: concat!("sync-service-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("protocol", &self.protocol)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("org_id", &self.org_id)
            .field("app_key", &self.app_key)
            .field("app_secret", &self.app_secret.as_ref().map(|_| "[REDACTED]"))
            .field("ca_certificate", &self.ca_certificate.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("pool_idle_timeout", &self.pool_idle_timeout)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(protocol: Protocol, address: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            address: address.into(),
            port,
            ..Default::default()
        }
    }

    /// Root URL requests are built on. Unix sockets are addressed with the
    /// protocol's scheme and the hex-encoded socket path as authority.
    pub fn base_url(&self) -> String {
        if self.protocol.is_unix() {
            format!("{}://{}", self.protocol.scheme(), socket_authority(&self.address))
        } else {
            format!("{}://{}:{}", self.protocol.scheme(), self.address, self.port)
        }
    }

    /// `host:port` for network protocols, the socket path for Unix ones
    pub fn endpoint(&self) -> String {
        if self.protocol.is_unix() {
            self.address.clone()
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::Configuration("service address is required".to_string()));
        }
        if self.app_key.is_some() != self.app_secret.is_some() {
            return Err(Error::Configuration(
                "app key and app secret must be set together".to_string(),
            ));
        }
        if self.protocol.is_unix() && !cfg!(unix) {
            return Err(Error::Configuration(format!(
                "protocol {} requires a Unix platform",
                self.protocol
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::Configuration("connect timeout must be positive".to_string()));
        }
        Ok(())
    }
}

/// URL authority for a Unix socket path: the path's bytes, hex encoded
pub fn socket_authority(path: &str) -> String {
    path.bytes().map(|b| format!("{:02x}", b)).collect()
}

fn secret_opt<'de, D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod secs_opt {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}
