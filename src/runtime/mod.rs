// Local container runtime (image store, tag, pull/push)

pub mod docker;

pub use docker::DockerCli;

use thiserror::Error;

/// A handle on an image in the local runtime's image store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Reference the image was resolved by (e.g., "silver-spork:abc123")
    pub reference: String,
    /// Local image ID (e.g., "sha256:...")
    pub id: String,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("{command} failed with status {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to execute container CLI: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Trait for local container runtimes
pub trait ContainerRuntime: Send + Sync {
    /// Check that the runtime is reachable
    fn ping(&self) -> Result<(), RuntimeError>;

    /// Authenticate against a registry
    fn login(&self, registry: &str, username: &str, password: &str) -> Result<(), RuntimeError>;

    /// Pull an image from a registry
    ///
    /// Returns `RuntimeError::NotFound` if the registry has no such image.
    fn pull(&self, reference: &str) -> Result<ImageRef, RuntimeError>;

    /// Resolve an image already present in the local store
    ///
    /// Returns `RuntimeError::NotFound` if no local image matches.
    fn get(&self, reference: &str) -> Result<ImageRef, RuntimeError>;

    /// Apply an additional tag to a local image
    fn tag(&self, image: &ImageRef, target: &str) -> Result<(), RuntimeError>;

    /// Push a tagged image to its registry
    fn push(&self, reference: &str) -> Result<(), RuntimeError>;
}
