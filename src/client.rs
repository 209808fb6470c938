use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::AUTHORIZATION;
use http::{HeaderValue, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error};

use crate::config::{ClientConfig, Protocol};
use crate::error::{Error, Result};
use crate::transport::{parse_ca_bundle, HttpTransport, RawResponse, RequestOptions, TcpTransport};
#[cfg(unix)]
use crate::unix_transport::UnixTransport;

pub(crate) const OBJECTS_PATH: &str = "api/v1/objects";
pub(crate) const DESTINATIONS_PATH: &str = "api/v1/destinations";
pub(crate) const RESEND_PATH: &str = "api/v1/resend";
pub(crate) const SECURITY_PATH: &str = "api/v1/security";

/// Client for the Sync Service REST API.
///
/// Cloning is cheap; clones share the connection pool, the credentials as they
/// were at clone time, and the registry of running pollers.
#[derive(Clone)]
pub struct SyncServiceClient {
    config: ClientConfig,
    base_url: String,
    auth_header: Option<HeaderValue>,
    transport: Arc<dyn HttpTransport>,
    custom_transport: bool,
    pub(crate) pollers: Arc<Mutex<HashSet<String>>>,
}

impl fmt::Debug for SyncServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncServiceClient")
            .field("base_url", &self.base_url)
            .field("transport", &self.transport.describe())
            .field("org_id", &self.config.org_id)
            .field("authenticated", &self.auth_header.is_some())
            .finish()
    }
}

impl SyncServiceClient {
    /// Create a client for `protocol` at `address`.
    ///
    /// For `unix`/`secure-unix`, `address` is the socket path and `port` is
    /// ignored.
    pub fn new(protocol: Protocol, address: impl Into<String>, port: u16) -> Result<Self> {
        ClientBuilder::new(protocol, address, port).build()
    }

    pub fn from_config(config: ClientConfig) -> Result<Self> {
        ClientBuilder::from_config(config).build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::from_config(ClientConfig::default())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn org_id(&self) -> Option<&str> {
        self.config.org_id.as_deref()
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    /// Organization used in request paths. Needed only against a CSS.
    pub fn set_org_id(&mut self, org_id: impl Into<String>) {
        let org_id = org_id.into();
        self.config.org_id = (!org_id.is_empty()).then_some(org_id);
    }

    /// Credentials sent as HTTP Basic authentication on every request.
    /// Passing an empty key clears them.
    pub fn set_app_key_and_secret(&mut self, app_key: impl Into<String>, app_secret: SecretString) -> Result<()> {
        let app_key = app_key.into();
        if app_key.is_empty() {
            self.config.app_key = None;
            self.config.app_secret = None;
        } else {
            self.config.app_key = Some(app_key);
            self.config.app_secret = Some(app_secret);
        }
        self.auth_header = basic_auth_header(&self.config)?;
        Ok(())
    }

    /// Trust the CA certificate(s) in `pem` for `https` connections.
    /// The default transport is rebuilt with the new roots.
    pub fn set_ca_certificate(&mut self, pem: impl Into<String>) -> Result<()> {
        let pem = pem.into();
        parse_ca_bundle(&pem)?;
        self.config.ca_certificate = Some(pem);
        if !self.custom_transport {
            self.transport = default_transport(&self.config)?;
        }
        Ok(())
    }

    /// Issue one request through the transport.
    ///
    /// Basic authentication is added when credentials are configured; the
    /// response is returned as is, status codes are left to the caller.
    pub async fn execute(&self, mut request: RequestOptions) -> Result<RawResponse> {
        if let Some(auth) = &self.auth_header {
            request.headers.insert(AUTHORIZATION, auth.clone());
        }
        debug!(
            method = %request.method,
            url = %request.url,
            streaming = request.streaming,
            "sync service request"
        );
        self.transport.send(request).await
    }

    /// `objects/[org/]type[/id[/command]]`
    pub(crate) fn objects_url(&self, object_type: &str, object_id: Option<&str>, command: Option<&str>) -> String {
        let mut url = format!("{}/{}", self.base_url, OBJECTS_PATH);
        if let Some(org) = self.org_id() {
            push_segment(&mut url, org);
        }
        push_segment(&mut url, object_type);
        if let Some(id) = object_id {
            push_segment(&mut url, id);
            if let Some(command) = command {
                url.push('/');
                url.push_str(command);
            }
        }
        url
    }

    /// `destinations[/org][/segments...]`
    pub(crate) fn destinations_url(&self, segments: &[&str]) -> String {
        let mut url = format!("{}/{}", self.base_url, DESTINATIONS_PATH);
        if let Some(org) = self.org_id() {
            push_segment(&mut url, org);
        }
        for segment in segments {
            push_segment(&mut url, segment);
        }
        url
    }

    pub(crate) fn resend_url(&self) -> String {
        format!("{}/{}", self.base_url, RESEND_PATH)
    }

    /// `security/aclType[/org][/key]`
    pub(crate) fn security_url(&self, acl_type: &str, key: Option<&str>) -> String {
        let mut url = format!("{}/{}/{}", self.base_url, SECURITY_PATH, acl_type);
        if let Some(org) = self.org_id() {
            push_segment(&mut url, org);
        }
        if let Some(key) = key {
            push_segment(&mut url, key);
        }
        url
    }

    /// GET a single JSON document; 404 and bodiless successes are `None`
    pub(crate) async fn get_json_optional<T: DeserializeOwned>(&self, url: String) -> Result<Option<T>> {
        let response = self.execute(RequestOptions::get(url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response.bytes().await?;
                if body.is_empty() {
                    return Ok(None);
                }
                Ok(Some(serde_json::from_slice(&body)?))
            }
            _ => Err(status_error(response).await),
        }
    }

    /// GET a JSON array; 404 and bodiless successes are an empty list
    pub(crate) async fn get_json_list<T: DeserializeOwned>(&self, request: RequestOptions) -> Result<Vec<T>> {
        let url = request.url.clone();
        let response = self.execute(request).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => {
                let body = response.bytes().await?;
                if body.is_empty() {
                    return Ok(Vec::new());
                }
                serde_json::from_slice::<Option<Vec<T>>>(&body)
                    .map(Option::unwrap_or_default)
                    .map_err(|e| {
                        error!(url = %url, error = %e, "failed to decode listing");
                        Error::from(e)
                    })
            }
            _ => Err(status_error(response).await),
        }
    }

    /// Send a state-changing request: any 2xx is success, 404 means the
    /// target does not exist
    pub(crate) async fn send_command(&self, request: RequestOptions, target: impl FnOnce() -> String) -> Result<()> {
        let response = self.execute(request).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::NotFound(target())),
            _ => Err(status_error(response).await),
        }
    }
}

/// Turn an unexpected response into `Error::Status`, keeping the body text
pub(crate) async fn status_error(response: RawResponse) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Error::Status { status, body }
}

fn push_segment(url: &mut String, segment: &str) {
    url.push('/');
    url.push_str(&urlencoding::encode(segment));
}

fn basic_auth_header(config: &ClientConfig) -> Result<Option<HeaderValue>> {
    let (Some(key), Some(secret)) = (&config.app_key, &config.app_secret) else {
        return Ok(None);
    };
    let credentials = STANDARD.encode(format!("{}:{}", key, secret.expose_secret()));
    let mut value = HeaderValue::from_str(&format!("Basic {}", credentials))
        .map_err(|e| Error::Configuration(format!("invalid credentials: {}", e)))?;
    value.set_sensitive(true);
    Ok(Some(value))
}

fn default_transport(config: &ClientConfig) -> Result<Arc<dyn HttpTransport>> {
    match config.protocol {
        Protocol::Http | Protocol::Https => Ok(Arc::new(TcpTransport::new(config)?)),
        #[cfg(unix)]
        Protocol::Unix | Protocol::SecureUnix => Ok(Arc::new(UnixTransport::new(config)?)),
        #[cfg(not(unix))]
        Protocol::Unix | Protocol::SecureUnix => Err(Error::Configuration(format!(
            "protocol {} requires a Unix platform",
            config.protocol
        ))),
    }
}

/// Builder for [`SyncServiceClient`]
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl ClientBuilder {
    pub fn new(protocol: Protocol, address: impl Into<String>, port: u16) -> Self {
        Self::from_config(ClientConfig::new(protocol, address, port))
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self { config, transport: None }
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.config.protocol = protocol;
        self
    }

    /// Host name, or socket path for Unix protocols
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn org_id(mut self, org_id: impl Into<String>) -> Self {
        self.config.org_id = Some(org_id.into());
        self
    }

    pub fn app_key_and_secret(mut self, app_key: impl Into<String>, app_secret: SecretString) -> Self {
        self.config.app_key = Some(app_key.into());
        self.config.app_secret = Some(app_secret);
        self
    }

    /// PEM text of the CA certificate(s) to trust
    pub fn ca_certificate(mut self, pem: impl Into<String>) -> Self {
        self.config.ca_certificate = Some(pem.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Send requests through `transport` instead of the protocol's default
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<SyncServiceClient> {
        let ClientBuilder { config, transport } = self;
        config.validate()?;
        if let Some(pem) = &config.ca_certificate {
            parse_ca_bundle(pem)?;
        }

        let custom_transport = transport.is_some();
        let transport = match transport {
            Some(transport) => transport,
            None => default_transport(&config)?,
        };
        debug!(transport = %transport.describe(), "sync service client created");

        Ok(SyncServiceClient {
            base_url: config.base_url(),
            auth_header: basic_auth_header(&config)?,
            config,
            transport,
            custom_transport,
            pollers: Arc::new(Mutex::new(HashSet::new())),
        })
    }
}
