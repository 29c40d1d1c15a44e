//! ViewSync Collaborator Clients
//!
//! HTTP adapters for the external services the scan engine depends on.
//!
//! # Features
//!
//! - **Service Adapters**: [`HttpMetadataSource`], [`HttpFederationGateway`],
//!   [`HttpCodeAllocator`] and [`HttpAuditRevoker`] implement the collaborator
//!   traits from `viewsync-catalog-core`
//! - **Automatic Retries**: Exponential backoff for transient failures of
//!   idempotent requests
//! - **Structured Errors**: Service error bodies `{code, description, cause}`
//!   are preserved and surface as `GatewayError`
//! - **Sample Cache**: [`SampleDataCache`], an LRU/TTL cache of preview rows
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use viewsync_catalog_client::{ClientConfig, HttpCollaborators, ServiceEndpoints};
//!
//! let endpoints = ServiceEndpoints::from_env()?;
//! let template = ClientConfig::builder("http://localhost:8080").build()?;
//! let collaborators = HttpCollaborators::connect(&endpoints, &template)?;
//! ```

use std::sync::Arc;

pub mod audit;
pub mod cache;
pub mod client;
pub mod code;
pub mod config;
pub mod error;
pub mod federation;
pub mod metadata;
pub mod types;

pub use audit::HttpAuditRevoker;
pub use cache::{CacheStats, SampleData, SampleDataCache};
pub use client::{ServiceClient, SharedClient};
pub use code::HttpCodeAllocator;
pub use config::{ClientConfig, ClientConfigBuilder, ServiceConfigs, ServiceEndpoints};
pub use error::{ClientError, Result};
pub use federation::HttpFederationGateway;
pub use metadata::HttpMetadataSource;

use viewsync_catalog_core::{AuditRevoker, CodeAllocator, MetadataSource, ViewFederationGateway};

/// Every HTTP collaborator, built from one set of endpoints.
#[derive(Clone)]
pub struct HttpCollaborators {
    pub metadata: Arc<dyn MetadataSource>,
    pub federation: Arc<dyn ViewFederationGateway>,
    pub codes: Arc<dyn CodeAllocator>,
    pub audits: Arc<dyn AuditRevoker>,
    pub samples: SampleDataCache,
}

impl HttpCollaborators {
    /// Build all adapters; `template` supplies timeouts, retries and the API key.
    pub fn connect(endpoints: &ServiceEndpoints, template: &ClientConfig) -> Result<Self> {
        let configs = endpoints.client_configs(template)?;
        Ok(Self {
            metadata: Arc::new(HttpMetadataSource::new(configs.metadata)?),
            federation: Arc::new(HttpFederationGateway::new(configs.federation)?),
            codes: Arc::new(HttpCodeAllocator::new(configs.code)?),
            audits: Arc::new(HttpAuditRevoker::new(configs.audit)?),
            samples: SampleDataCache::default(),
        })
    }
}
