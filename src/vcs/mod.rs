//! Version control system access
//!
//! The publisher only needs a handful of commit-graph queries, expressed by
//! the [`Vcs`] trait. [`GitCli`] implements them on top of the `git` binary.

pub mod git;

pub use git::GitCli;

/// Version control system abstraction
pub trait Vcs: Send + Sync {
    /// Hash of the commit `HEAD` points to
    fn head_commit(&self) -> anyhow::Result<String>;

    /// Hash of the commit a local branch points to
    fn branch_commit(&self, branch: &str) -> anyhow::Result<String>;

    /// Ancestors of `commit`, nearest first, excluding `commit` itself
    ///
    /// At most `limit` hashes are returned.
    fn ancestors(&self, commit: &str, limit: usize) -> anyhow::Result<Vec<String>>;

    /// Parent hashes of `commit`, in order (first parent first)
    fn parents(&self, commit: &str) -> anyhow::Result<Vec<String>>;

    /// Whether the trees of two commits differ
    fn has_diff(&self, from: &str, to: &str) -> anyhow::Result<bool>;

    /// Whether `ancestor` is reachable by following parent links from `descendant`
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> anyhow::Result<bool>;
}
