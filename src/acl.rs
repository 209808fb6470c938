//! Access control lists protecting destination types and object types.
//!
//! These calls are served by a CSS only. Adding the first user creates an
//! ACL and removing the last one deletes it; both are idempotent.

use crate::client::SyncServiceClient;
use crate::error::Result;
use crate::transport::RequestOptions;
use crate::types::{AclAction, AclPayload, AclType};

impl SyncServiceClient {
    pub async fn add_users_to_destination_acl(&self, dest_type: &str, usernames: &[String]) -> Result<()> {
        self.modify_acl(AclType::Destinations, AclAction::Add, dest_type, usernames)
            .await
    }

    pub async fn remove_users_from_destination_acl(&self, dest_type: &str, usernames: &[String]) -> Result<()> {
        self.modify_acl(AclType::Destinations, AclAction::Remove, dest_type, usernames)
            .await
    }

    /// Users in the ACL of `dest_type`; empty if there is none
    pub async fn retrieve_destination_acl(&self, dest_type: &str) -> Result<Vec<String>> {
        self.retrieve_acl(AclType::Destinations, Some(dest_type)).await
    }

    /// Destination types that have an ACL
    pub async fn retrieve_all_destination_acls(&self) -> Result<Vec<String>> {
        self.retrieve_acl(AclType::Destinations, None).await
    }

    pub async fn add_users_to_object_acl(&self, object_type: &str, usernames: &[String]) -> Result<()> {
        self.modify_acl(AclType::Objects, AclAction::Add, object_type, usernames)
            .await
    }

    pub async fn remove_users_from_object_acl(&self, object_type: &str, usernames: &[String]) -> Result<()> {
        self.modify_acl(AclType::Objects, AclAction::Remove, object_type, usernames)
            .await
    }

    /// Users in the ACL of `object_type`; empty if there is none
    pub async fn retrieve_object_acl(&self, object_type: &str) -> Result<Vec<String>> {
        self.retrieve_acl(AclType::Objects, Some(object_type)).await
    }

    /// Object types that have an ACL
    pub async fn retrieve_all_object_acls(&self) -> Result<Vec<String>> {
        self.retrieve_acl(AclType::Objects, None).await
    }

    /// Add or remove `usernames` in the ACL of `key`
    pub async fn modify_acl(&self, acl_type: AclType, action: AclAction, key: &str, usernames: &[String]) -> Result<()> {
        let url = self.security_url(acl_type.as_ref(), Some(key));
        let request = RequestOptions::put(url).json(&AclPayload { action, usernames })?;
        self.send_command(request, || format!("{} ACL {}", acl_type, key)).await
    }

    /// Members of the ACL of `key`, or every key with an ACL when `key` is
    /// `None`. A missing ACL is an empty list.
    pub async fn retrieve_acl(&self, acl_type: AclType, key: Option<&str>) -> Result<Vec<String>> {
        let url = self.security_url(acl_type.as_ref(), key);
        self.get_json_list(RequestOptions::get(url)).await
    }
}
