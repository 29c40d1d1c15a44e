//! HTTP adapter for the view federation engine.

use async_trait::async_trait;
use reqwest::Method;
use viewsync_catalog_core::collaborators::GatewayResult;
use viewsync_catalog_core::ViewFederationGateway;

use crate::client::ServiceClient;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::types::{CreateCatalogRequest, CreateCatalogResponse, ViewRequest};

/// [`ViewFederationGateway`] backed by the federation engine REST API.
pub struct HttpFederationGateway {
    client: ServiceClient,
}

impl HttpFederationGateway {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            client: ServiceClient::new(config)?,
        })
    }

    fn view_request(catalog: &str, view_name: &str, sql: &str) -> ViewRequest {
        ViewRequest {
            catalog: catalog.to_string(),
            view_name: view_name.to_string(),
            sql: sql.to_string(),
        }
    }
}

#[async_trait]
impl ViewFederationGateway for HttpFederationGateway {
    async fn create_view(&self, catalog: &str, view_name: &str, sql: &str) -> GatewayResult<()> {
        self.client
            .execute(
                Method::POST,
                "/api/v1/views",
                Some(&Self::view_request(catalog, view_name, sql)),
            )
            .await?;
        Ok(())
    }

    async fn modify_view(&self, catalog: &str, view_name: &str, sql: &str) -> GatewayResult<()> {
        self.client
            .execute(
                Method::PUT,
                "/api/v1/views",
                Some(&Self::view_request(catalog, view_name, sql)),
            )
            .await?;
        Ok(())
    }

    async fn delete_view(&self, catalog: &str, view_name: &str) -> GatewayResult<()> {
        let path = format!(
            "/api/v1/views/{}/{}",
            urlencoding::encode(catalog),
            urlencoding::encode(view_name)
        );
        self.client
            .execute(Method::DELETE, &path, Option::<&()>::None)
            .await?;
        Ok(())
    }

    async fn create_catalog(&self, name: &str, connector: &str) -> GatewayResult<Vec<String>> {
        let req = CreateCatalogRequest {
            name: name.to_string(),
            connector: connector.to_string(),
        };
        let resp: CreateCatalogResponse = self.client.post("/api/v1/catalogs", &req).await?;
        Ok(resp.catalogs)
    }

    async fn delete_catalog(&self, name: &str) -> GatewayResult<()> {
        let path = format!("/api/v1/catalogs/{}", urlencoding::encode(name));
        self.client
            .execute(Method::DELETE, &path, Option::<&()>::None)
            .await?;
        Ok(())
    }
}
