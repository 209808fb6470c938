//! Destination queries and resend.

use http::Method;

use crate::client::SyncServiceClient;
use crate::error::Result;
use crate::transport::RequestOptions;
use crate::types::{Destination, DestinationObject};

impl SyncServiceClient {
    /// Destinations registered with the service
    pub async fn get_destinations(&self) -> Result<Vec<Destination>> {
        let url = self.destinations_url(&[]);
        self.get_json_list(RequestOptions::get(url)).await
    }

    /// Objects targeted at one destination, with their delivery status
    pub async fn get_destination_objects(&self, dest_type: &str, dest_id: &str) -> Result<Vec<DestinationObject>> {
        let url = self.destinations_url(&[dest_type, dest_id, "objects"]);
        self.get_json_list(RequestOptions::get(url)).await
    }

    /// Ask the CSS to send every object to this ESS again.
    ///
    /// Only meaningful from an ESS, after the application lost data it had
    /// already obtained.
    pub async fn resend(&self) -> Result<()> {
        let url = self.resend_url();
        self.send_command(RequestOptions::new(Method::POST, url), || "resend".to_string())
            .await
    }
}
