//! Object operations: metadata, data transfer, state transitions and webhooks.

use bytes::Bytes;
use http::{HeaderValue, Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::client::{status_error, SyncServiceClient};
use crate::error::{Error, Result};
use crate::transport::{RequestBody, RequestOptions};
use crate::types::{
    DestinationStatus, ObjectMetadata, ObjectStatus, ObjectUpdatePayload, WebhookAction, WebhookPayload,
};

impl SyncServiceClient {
    /// Metadata of one object, `None` if the service does not know it
    pub async fn get_object_metadata(&self, object_type: &str, object_id: &str) -> Result<Option<ObjectMetadata>> {
        let url = self.objects_url(object_type, Some(object_id), None);
        self.get_json_optional(url).await
    }

    /// Status of an object from this node's point of view; `None` when the
    /// object is unknown to the service
    pub async fn get_object_status(&self, object_type: &str, object_id: &str) -> Result<Option<ObjectStatus>> {
        let url = self.objects_url(object_type, Some(object_id), Some("status"));
        let response = self.execute(RequestOptions::get(url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let text = response.text().await?;
                let text = text.trim().trim_matches('"');
                if text.is_empty() {
                    return Ok(None);
                }
                text.parse::<ObjectStatus>()
                    .map(Some)
                    .map_err(|_| Error::InvalidResponse(format!("unknown object status '{}'", text)))
            }
            _ => Err(status_error(response).await),
        }
    }

    /// Delivery status of an object for each of its destinations
    pub async fn get_object_destinations(&self, object_type: &str, object_id: &str) -> Result<Vec<DestinationStatus>> {
        let url = self.objects_url(object_type, Some(object_id), Some("destinations"));
        self.get_json_list(RequestOptions::get(url)).await
    }

    /// One poll for updated objects of `object_type`.
    ///
    /// With `received` set, objects already marked received by this node are
    /// reported again as well.
    pub async fn get_updated_objects(&self, object_type: &str, received: bool) -> Result<Vec<ObjectMetadata>> {
        let mut url = self.objects_url(object_type, None, None);
        if received {
            url.push_str("?received=true");
        }
        self.get_json_list(RequestOptions::get(url)).await
    }

    /// Stream an object's data into `writer`.
    ///
    /// Returns the number of bytes written, or `None` if the object or its
    /// data does not exist. The body is copied chunk by chunk and never held
    /// in memory as a whole.
    pub async fn fetch_object_data<W>(&self, meta: &ObjectMetadata, writer: &mut W) -> Result<Option<u64>>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let url = self.objects_url(&meta.object_type, Some(&meta.object_id), Some("data"));
        let response = self.execute(RequestOptions::get(url).streaming(true)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let written = response.copy_to(writer).await?;
                debug!(object = %meta.key(), bytes = written, "fetched object data");
                Ok(Some(written))
            }
            _ => Err(status_error(response).await),
        }
    }

    /// Buffered variant of [`fetch_object_data`](Self::fetch_object_data)
    pub async fn fetch_object_data_bytes(&self, meta: &ObjectMetadata) -> Result<Option<Bytes>> {
        let url = self.objects_url(&meta.object_type, Some(&meta.object_id), Some("data"));
        let response = self.execute(RequestOptions::get(url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.bytes().await?)),
            _ => Err(status_error(response).await),
        }
    }

    /// Create or update an object.
    ///
    /// `object_id` and `object_type` are required. When talking to a CSS the
    /// metadata should also name its destinations, either through
    /// `dest_type`/`dest_id` or through `destinations_list`.
    pub async fn update_object(&self, meta: &ObjectMetadata) -> Result<()> {
        meta.validate()?;
        let meta = meta.without_service_fields();
        let url = self.objects_url(&meta.object_type, Some(&meta.object_id), None);
        let request = RequestOptions::put(url).json(&ObjectUpdatePayload { meta: &meta })?;
        self.send_command(request, || meta.key()).await
    }

    /// Replace an object's data with the contents of `reader`, streamed.
    ///
    /// The data can be updated any number of times without touching the
    /// metadata.
    pub async fn update_object_data<R>(&self, meta: &ObjectMetadata, reader: R) -> Result<()>
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        let url = self.objects_url(&meta.object_type, Some(&meta.object_id), Some("data"));
        let request = RequestOptions::put(url)
            .body(RequestBody::from_reader(reader))
            .header(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
        self.send_command(request, || meta.key()).await
    }

    pub async fn delete_object(&self, object_type: &str, object_id: &str) -> Result<()> {
        let url = self.objects_url(object_type, Some(object_id), None);
        self.send_command(RequestOptions::new(Method::DELETE, url), || {
            format!("{}:{}", object_type, object_id)
        })
        .await
    }

    /// Activate an object that was created inactive
    pub async fn activate_object(&self, meta: &ObjectMetadata) -> Result<()> {
        self.object_command(meta, "activate").await
    }

    /// Mark an object consumed; it is not delivered to the application again,
    /// even across restarts
    pub async fn mark_object_consumed(&self, meta: &ObjectMetadata) -> Result<()> {
        self.object_command(meta, "consumed").await
    }

    /// Acknowledge on an ESS that an object deleted on the CSS was deleted
    pub async fn mark_object_deleted(&self, meta: &ObjectMetadata) -> Result<()> {
        self.object_command(meta, "deleted").await
    }

    /// Mark an object received; it is not delivered again unless polling is
    /// restarted
    pub async fn mark_object_received(&self, meta: &ObjectMetadata) -> Result<()> {
        self.object_command(meta, "received").await
    }

    async fn object_command(&self, meta: &ObjectMetadata, command: &str) -> Result<()> {
        let url = self.objects_url(&meta.object_type, Some(&meta.object_id), Some(command));
        self.send_command(RequestOptions::put(url), || meta.key()).await
    }

    /// Ask the service to call `url` when objects of `object_type` change
    pub async fn register_webhook(&self, object_type: &str, url: &str) -> Result<()> {
        self.webhook(WebhookAction::Register, object_type, url).await
    }

    pub async fn delete_webhook(&self, object_type: &str, url: &str) -> Result<()> {
        self.webhook(WebhookAction::Delete, object_type, url).await
    }

    async fn webhook(&self, action: WebhookAction, object_type: &str, webhook: &str) -> Result<()> {
        url::Url::parse(webhook)?;
        let request = RequestOptions::put(self.objects_url(object_type, None, None)).json(&WebhookPayload {
            action,
            url: webhook,
        })?;
        self.send_command(request, || object_type.to_string()).await
    }
}
