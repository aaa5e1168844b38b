pub mod ecr;
pub mod models;

pub use ecr::EcrRegistry;
pub use models::{
    Finding, ImageId, RegistryCredentials, RegistryRepository, ScanFindings, ScanReport,
    ScanStatus,
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a container registry
///
/// The named variants are the registry conditions callers react to;
/// everything else is passed through as `Service`.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("No scan found for image in repository {0}")]
    ScanNotFound(String),

    #[error("Registry limit exceeded: {0}")]
    LimitExceeded(String),

    #[error(transparent)]
    Service(#[from] anyhow::Error),
}

/// Trait for container registries that store and scan images
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Look up a repository by name
    ///
    /// Returns `RegistryError::RepositoryNotFound` if it does not exist.
    async fn describe_repository(&self, name: &str) -> Result<RegistryRepository, RegistryError>;

    /// Create a repository
    async fn create_repository(&self, name: &str) -> Result<RegistryRepository, RegistryError>;

    /// Get a short-lived authorization token (base64 of "username:password")
    async fn authorization_token(&self, registry_id: &str) -> Result<String, RegistryError>;

    /// List the IDs of all images carrying `tag`
    async fn image_ids_by_tag(
        &self,
        repository: &RegistryRepository,
        tag: &str,
    ) -> Result<Vec<ImageId>, RegistryError>;

    /// Request a vulnerability scan for an image
    async fn start_image_scan(
        &self,
        repository: &RegistryRepository,
        image_id: &ImageId,
    ) -> Result<(), RegistryError>;

    /// Fetch the current scan status and findings of an image
    ///
    /// Returns `RegistryError::ScanNotFound` if no scan was ever started.
    async fn describe_scan_findings(
        &self,
        repository: &RegistryRepository,
        image_id: &ImageId,
    ) -> Result<ScanReport, RegistryError>;
}
