//! HTTP adapter for the uniform catalog code service.

use async_trait::async_trait;
use viewsync_catalog_core::collaborators::GatewayResult;
use viewsync_catalog_core::CodeAllocator;

use crate::client::ServiceClient;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::types::{GenerateCodesRequest, GenerateCodesResponse};

/// [`CodeAllocator`] backed by the code service REST API.
pub struct HttpCodeAllocator {
    client: ServiceClient,
}

impl HttpCodeAllocator {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            client: ServiceClient::new(config)?,
        })
    }
}

#[async_trait]
impl CodeAllocator for HttpCodeAllocator {
    async fn generate(&self, rule_id: &str, count: usize) -> GatewayResult<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let path = format!("/api/v1/rules/{}/codes", urlencoding::encode(rule_id));
        let resp: GenerateCodesResponse = self
            .client
            .post(&path, &GenerateCodesRequest { count })
            .await?;
        Ok(resp.codes)
    }
}
