//! # Sync Service Rust SDK
//!
//! An async client for the edge Sync Service, the service that moves objects
//! (metadata plus optional data) between a central hub (CSS) and edge nodes
//! (ESS).
//!
//! ## Features
//!
//! - **Transports**: HTTP, HTTPS with custom CA roots, and Unix domain sockets
//!   (`unix`/`secure-unix`) for talking to a local ESS
//! - **Async/await**: Built on Tokio, one client can be shared across tasks
//! - **Typed operations**: object metadata and data, state transitions,
//!   destinations, webhooks and ACLs
//! - **Update polling**: a background poller with explicit cancellation and
//!   at-least-once delivery
//!
//! ## Quick Start
//!
//! ```no_run
//! use sync_service_client::{ObjectMetadata, Protocol, SyncServiceClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SyncServiceClient::new(Protocol::Http, "localhost", 8080)?;
//!
//!     // Create an object and upload its data
//!     let meta = ObjectMetadata::new("model", "v1").with_destination("edge", "node1");
//!     client.update_object(&meta).await?;
//!     client.update_object_data(&meta, tokio::fs::File::open("model.bin").await?).await?;
//!
//!     // Receive updates of the same type, consuming each before the next
//!     let worker = client.clone();
//!     let poller = client.start_polling_for_updates("model", Duration::from_secs(5), move |meta| {
//!         let worker = worker.clone();
//!         async move {
//!             if let Ok(Some(data)) = worker.fetch_object_data_bytes(&meta).await {
//!                 println!("{}: {} bytes", meta.key(), data.len());
//!             }
//!             if let Err(e) = worker.mark_object_consumed(&meta).await {
//!                 eprintln!("consume {} failed: {e}", meta.key());
//!             }
//!         }
//!     })?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     poller.stop();
//!     poller.join().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Unix Domain Sockets
//!
//! ```no_run
//! use sync_service_client::{Protocol, SyncServiceClient};
//!
//! // The address is the socket path; the port is ignored
//! let client = SyncServiceClient::new(Protocol::SecureUnix, "/var/run/ess.sock", 0)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Custom Configuration
//!
//! ```no_run
//! use secrecy::SecretString;
//! use sync_service_client::{Protocol, SyncServiceClient};
//! use std::time::Duration;
//!
//! let client = SyncServiceClient::builder()
//!     .protocol(Protocol::Https)
//!     .address("css.example.com")
//!     .port(8443)
//!     .org_id("myorg")
//!     .app_key_and_secret("user@myorg", SecretString::from("password".to_string()))
//!     .ca_certificate(std::fs::read_to_string("ca.pem")?)
//!     .request_timeout(Duration::from_secs(30))
//!     .build()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod acl;
pub mod client;
pub mod config;
pub mod destinations;
pub mod error;
pub mod objects;
pub mod poller;
pub mod transport;
pub mod types;
#[cfg(unix)]
pub mod unix_transport;

// Re-export main types for convenience
pub use client::{ClientBuilder, SyncServiceClient};
pub use config::{ClientConfig, Protocol};
pub use error::{Error, Result};
pub use poller::UpdatePoller;
pub use transport::{HttpTransport, RawResponse, RequestBody, RequestOptions, TcpTransport};
pub use types::*;
#[cfg(unix)]
pub use unix_transport::UnixTransport;

pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let _: Result<()> = Ok(());
        let _ = ClientConfig::default();
        assert_eq!(Protocol::SecureUnix.to_string(), "secure-unix");
    }
}
