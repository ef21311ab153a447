//! Gateway-backed recipient directory

use async_trait::async_trait;
use classline_common::types::TenantId;
use classline_storage::models::TargetSelector;
use serde::Deserialize;
use tracing::debug;

use super::gateway::GatewayAdapter;
use crate::broadcast::{Directory, RecipientRef};

/// Recipient directory served by the chat gateway.
///
/// The gateway knows which group chats and individual contacts exist for a
/// tenant's channel session; campaign target selection resolves against it.
#[derive(Clone)]
pub struct GatewayDirectory {
    gateway: GatewayAdapter,
}

#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    chat_id: String,
    #[serde(default)]
    name: Option<String>,
}

impl GatewayDirectory {
    /// Create a directory sharing the gateway's HTTP client
    pub fn new(gateway: GatewayAdapter) -> Self {
        Self { gateway }
    }

    async fn fetch(
        &self,
        tenant_id: TenantId,
        resource: &str,
    ) -> anyhow::Result<Vec<DirectoryEntry>> {
        let url = format!("{}/{}", self.gateway.base_url(), resource);

        let entries: Vec<DirectoryEntry> = self
            .gateway
            .client()
            .get(&url)
            .bearer_auth(self.gateway.api_token())
            .query(&[("tenant_id", tenant_id.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(%tenant_id, resource, count = entries.len(), "Fetched directory entries");

        Ok(entries)
    }
}

#[async_trait]
impl Directory for GatewayDirectory {
    async fn list_recipients(
        &self,
        tenant_id: TenantId,
        selector: &TargetSelector,
    ) -> anyhow::Result<Vec<RecipientRef>> {
        let entries = match selector {
            TargetSelector::AllGroups => self.fetch(tenant_id, "groups").await?,
            TargetSelector::SelectedGroups { group_ids } => {
                let all = self.fetch(tenant_id, "groups").await?;
                all.into_iter()
                    .filter(|g| group_ids.contains(&g.chat_id))
                    .collect()
            }
            TargetSelector::AllContacts => self.fetch(tenant_id, "contacts").await?,
        };

        Ok(entries
            .into_iter()
            .map(|e| RecipientRef {
                chat_id: e.chat_id,
                display_name: e.name,
            })
            .collect())
    }
}
