//! HTTP adapter for the metadata collection service.

use async_trait::async_trait;
use viewsync_catalog_core::collaborators::GatewayResult;
use viewsync_catalog_core::{CollectionDescriptor, MetadataSource, TableInfo, TaskStatus};

use crate::client::ServiceClient;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::types::{CollectResponse, TableBatchResponse, TaskStatusResponse};

/// [`MetadataSource`] backed by the collection service REST API.
pub struct HttpMetadataSource {
    client: ServiceClient,
}

impl HttpMetadataSource {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            client: ServiceClient::new(config)?,
        })
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn start_collection(&self, external_id: &str) -> GatewayResult<CollectionDescriptor> {
        let path = format!(
            "/api/v1/datasources/{}/collect",
            urlencoding::encode(external_id)
        );
        let resp: CollectResponse = self.client.post(&path, &serde_json::json!({})).await?;
        Ok(CollectionDescriptor {
            task_id: resp.task_id.filter(|id| !id.is_empty()),
            message: resp.message,
        })
    }

    async fn get_task_status(&self, task_id: &str) -> GatewayResult<TaskStatus> {
        let path = format!("/api/v1/tasks/{}", urlencoding::encode(task_id));
        let resp: TaskStatusResponse = self.client.get(&path).await?;
        Ok(resp.status)
    }

    async fn list_table_batch(
        &self,
        external_id: &str,
        limit: usize,
        offset: usize,
    ) -> GatewayResult<Vec<TableInfo>> {
        let path = format!(
            "/api/v1/datasources/{}/tables?limit={}&offset={}",
            urlencoding::encode(external_id),
            limit,
            offset
        );
        let resp: TableBatchResponse = self.client.get(&path).await?;
        Ok(resp.tables)
    }
}
