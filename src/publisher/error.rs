use std::time::Duration;
use thiserror::Error;

use crate::registry::RegistryError;
use crate::runtime::RuntimeError;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Could not find the image for tag '{tag}' within {timeout:?}")]
    ImageIdTimeout { tag: String, timeout: Duration },

    #[error("Image scanning results for tag '{tag}' are taking too long (waited {timeout:?})")]
    ImageScanTimeout { tag: String, timeout: Duration },

    #[error("There are {count} images with the tag '{tag}'")]
    MultipleImagesWithTag { tag: String, count: usize },

    #[error("Image scan for tag '{tag}' found {count} vulnerabilities")]
    VulnerabilitiesFound { tag: String, count: usize },

    #[error("Commit {commit} is not a merge commit (has {parents} parents, must have exactly 2)")]
    NotAMergeCommit { commit: String, parents: usize },

    #[error("Merge commit {merge} differs from merged branch commit {branch}")]
    BranchDiffers { merge: String, branch: String },

    #[error("Merged branch commit {branch} is not based on last base branch commit {base}")]
    BaseNotAncestor { base: String, branch: String },

    #[error("No ancestor of {head} to search for an image")]
    NoAncestorImage { head: String },

    #[error("Invalid registry authorization token: {0}")]
    InvalidAuthToken(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Version control error: {0:#}")]
    Vcs(#[source] anyhow::Error),
}

pub type PublishResult<T> = Result<T, PublishError>;
