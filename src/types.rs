use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::{Error, Result};

fn default_expected_consumers() -> u32 {
    1
}

/// Metadata that identifies and describes one Sync Service object.
///
/// `object_id` and `object_type` together form the object's identity and must
/// be provided by the application. An object is routed either to a single
/// destination (`dest_type`/`dest_id`), to every destination of a type
/// (`dest_type` only), to an explicit `destinations_list` of `type:id` pairs,
/// or broadcast when all routing fields are empty.
///
/// The fields `deleted`, `origin_id`, `origin_type` and `instance_id` are owned
/// by the service and are cleared before the metadata is sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObjectMetadata {
    #[serde(rename = "objectID")]
    pub object_id: String,

    #[serde(rename = "objectType")]
    pub object_type: String,

    #[serde(rename = "destinationID", skip_serializing_if = "String::is_empty")]
    pub dest_id: String,

    #[serde(rename = "destinationType", skip_serializing_if = "String::is_empty")]
    pub dest_type: String,

    #[serde(rename = "destinationOrgID", skip_serializing_if = "String::is_empty")]
    pub dest_org_id: String,

    #[serde(
        rename = "destinationsList",
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub destinations_list: Vec<String>,

    /// When the object expires and is deleted by the service
    #[serde(with = "rfc3339_opt", skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Where the object's data can be fetched from instead of the service
    #[serde(skip_serializing_if = "String::is_empty")]
    pub link: String,

    /// Inactive objects are withheld from delivery until activated
    pub inactive: bool,

    #[serde(
        rename = "activationTime",
        with = "rfc3339_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub activation_time: Option<DateTime<Utc>>,

    #[serde(rename = "doNotSend")]
    pub do_not_send: bool,

    #[serde(rename = "noData")]
    pub no_data: bool,

    /// The update touches the metadata only, existing data is kept
    #[serde(rename = "metaOnly")]
    pub meta_only: bool,

    #[serde(rename = "consumers", default = "default_expected_consumers")]
    pub expected_consumers: u32,

    #[serde(rename = "destinationDataUri", skip_serializing_if = "String::is_empty")]
    pub destination_data_uri: String,

    #[serde(rename = "sourceDataUri", skip_serializing_if = "String::is_empty")]
    pub source_data_uri: String,

    #[serde(rename = "autodelete")]
    pub auto_delete: bool,

    // Service-owned fields
    pub deleted: bool,

    #[serde(rename = "originID", skip_serializing_if = "String::is_empty")]
    pub origin_id: String,

    #[serde(rename = "originType", skip_serializing_if = "String::is_empty")]
    pub origin_type: String,

    #[serde(rename = "instanceID", skip_serializing_if = "is_zero")]
    pub instance_id: i64,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

impl Default for ObjectMetadata {
    fn default() -> Self {
        Self {
            object_id: String::new(),
            object_type: String::new(),
            dest_id: String::new(),
            dest_type: String::new(),
            dest_org_id: String::new(),
            destinations_list: Vec::new(),
            expiration: None,
            version: String::new(),
            description: String::new(),
            link: String::new(),
            inactive: false,
            activation_time: None,
            do_not_send: false,
            no_data: false,
            meta_only: false,
            expected_consumers: default_expected_consumers(),
            destination_data_uri: String::new(),
            source_data_uri: String::new(),
            auto_delete: false,
            deleted: false,
            origin_id: String::new(),
            origin_type: String::new(),
            instance_id: 0,
        }
    }
}

impl ObjectMetadata {
    /// Create metadata for the object identified by `object_type` and `object_id`
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
            ..Default::default()
        }
    }

    /// Route the object to one destination, or to every destination of
    /// `dest_type` when `dest_id` is empty
    pub fn with_destination(mut self, dest_type: impl Into<String>, dest_id: impl Into<String>) -> Self {
        self.dest_type = dest_type.into();
        self.dest_id = dest_id.into();
        self
    }

    /// Route the object to an explicit list of `type:id` destinations
    pub fn with_destinations_list<I, S>(mut self, destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.destinations_list = destinations.into_iter().map(Into::into).collect();
        self
    }

    /// `type:id` key used in logs and errors
    pub fn key(&self) -> String {
        format!("{}:{}", self.object_type, self.object_id)
    }

    /// Check the invariants the service relies on before the metadata is sent
    pub fn validate(&self) -> Result<()> {
        if self.object_type.is_empty() {
            return Err(Error::InvalidMetadata("object type is required".to_string()));
        }
        if self.object_id.is_empty() {
            return Err(Error::InvalidMetadata("object ID is required".to_string()));
        }
        if !self.destinations_list.is_empty() && (!self.dest_type.is_empty() || !self.dest_id.is_empty()) {
            return Err(Error::InvalidMetadata(format!(
                "{}: destination type/ID and destinations list are mutually exclusive",
                self.key()
            )));
        }
        if let Some(bad) = self.destinations_list.iter().find(|d| !d.contains(':')) {
            return Err(Error::InvalidMetadata(format!(
                "{}: destinations list entry '{}' is not a type:id pair",
                self.key(),
                bad
            )));
        }
        Ok(())
    }

    /// Copy of this metadata with the service-owned fields cleared
    pub fn without_service_fields(&self) -> Self {
        Self {
            deleted: false,
            origin_id: String::new(),
            origin_type: String::new(),
            instance_id: 0,
            ..self.clone()
        }
    }
}

/// A registered edge node, as reported by the service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Destination {
    #[serde(rename = "destinationOrgID")]
    pub dest_org_id: String,

    #[serde(rename = "destinationType")]
    pub dest_type: String,

    #[serde(rename = "destinationID")]
    pub dest_id: String,

    /// Channel the node uses to talk to the hub (e.g. `mqtt` or `http`)
    pub communication: String,

    #[serde(rename = "codeVersion")]
    pub code_version: String,
}

/// Delivery state of an object for one destination
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum DeliveryStatus {
    Pending,
    Delivering,
    Delivered,
    Consumed,
    Deleted,
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Delivery status of an object for a certain destination
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DestinationStatus {
    #[serde(rename = "destinationType")]
    pub dest_type: String,

    #[serde(rename = "destinationID")]
    pub dest_id: String,

    pub status: DeliveryStatus,

    /// Feedback message sent back by the destination, if any
    pub message: String,
}

/// An object targeted at a particular destination
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DestinationObject {
    #[serde(rename = "orgID")]
    pub org_id: String,

    #[serde(rename = "objectType")]
    pub object_type: String,

    #[serde(rename = "objectID")]
    pub object_id: String,

    pub status: DeliveryStatus,
}

/// Status of an object as seen from a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ObjectStatus {
    /// Not ready to be sent to destinations
    NotReady,
    /// Ready to be sent but not yet received
    Ready,
    /// Metadata received, data still pending
    Received,
    /// Metadata and data received
    CompletelyReceived,
    /// Consumed by the application on the destination
    Consumed,
    /// Deleted by the destination
    Deleted,
}

/// Protected resource class of an access control list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum AclType {
    Destinations,
    Objects,
}

/// ACL mutation sent to the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AclAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub(crate) enum WebhookAction {
    Register,
    Delete,
}

#[derive(Debug, Serialize)]
pub(crate) struct ObjectUpdatePayload<'a> {
    pub meta: &'a ObjectMetadata,
}

#[derive(Debug, Serialize)]
pub(crate) struct WebhookPayload<'a> {
    pub action: WebhookAction,
    pub url: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct AclPayload<'a> {
    pub action: AclAction,
    pub usernames: &'a [String],
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// RFC3339 timestamps where the service uses an empty string for "unset"
mod rfc3339_opt {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
        }
    }
}
