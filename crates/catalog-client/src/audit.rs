//! HTTP adapter for the approval workflow service.

use async_trait::async_trait;
use reqwest::Method;
use viewsync_catalog_core::collaborators::GatewayResult;
use viewsync_catalog_core::{AuditRevoker, AuditType};

use crate::client::ServiceClient;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::types::RevokeAuditRequest;

/// [`AuditRevoker`] backed by the workflow service REST API.
pub struct HttpAuditRevoker {
    client: ServiceClient,
}

impl HttpAuditRevoker {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            client: ServiceClient::new(config)?,
        })
    }
}

#[async_trait]
impl AuditRevoker for HttpAuditRevoker {
    async fn revoke(&self, form_view_id: &str, audit_type: AuditType) -> GatewayResult<()> {
        let req = RevokeAuditRequest {
            form_view_id: form_view_id.to_string(),
            audit_type,
        };
        self.client
            .execute(Method::PUT, "/api/v1/audits/revoke", Some(&req))
            .await?;
        Ok(())
    }
}
