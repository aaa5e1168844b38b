use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::debug;

use super::Vcs;

/// Git repository accessed through the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_path: PathBuf,
}

impl GitCli {
    /// Open the repository at `repo_path` (or the current directory)
    pub fn open(repo_path: Option<&Path>) -> Result<Self> {
        let repo_path = match repo_path {
            Some(path) => path.to_path_buf(),
            None => std::env::current_dir().context("Failed to get current directory")?,
        };

        let git = Self { repo_path };
        git.run_stdout(&["rev-parse", "--git-dir"])
            .with_context(|| format!("{} is not a git repository", git.repo_path.display()))?;
        Ok(git)
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn output(&self, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.repo_path).args(args);

        debug!("Executing command: {:?}", cmd);

        cmd.output()
            .with_context(|| format!("Failed to execute git {}", args.join(" ")))
    }

    fn run_stdout(&self, args: &[&str]) -> Result<String> {
        let output = self.output(args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }

        let stdout = String::from_utf8(output.stdout).context("Git output is not valid UTF-8")?;
        Ok(stdout.trim().to_string())
    }

    /// Run a git query that answers with exit status 0 (yes) or 1 (no)
    fn run_predicate(&self, args: &[&str]) -> Result<bool> {
        let output = self.output(args)?;

        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                bail!("git {} failed: {}", args.join(" "), stderr.trim());
            }
        }
    }
}

impl Vcs for GitCli {
    fn head_commit(&self) -> Result<String> {
        self.run_stdout(&["rev-parse", "HEAD"])
    }

    fn branch_commit(&self, branch: &str) -> Result<String> {
        let refname = format!("refs/heads/{}^{{commit}}", branch);
        self.run_stdout(&["rev-parse", "--verify", &refname])
            .with_context(|| format!("Branch '{}' not found", branch))
    }

    fn ancestors(&self, commit: &str, limit: usize) -> Result<Vec<String>> {
        let max_count = format!("--max-count={}", limit);
        let stdout = self.run_stdout(&["rev-list", "--skip=1", &max_count, commit])?;
        Ok(stdout.lines().map(String::from).collect())
    }

    fn parents(&self, commit: &str) -> Result<Vec<String>> {
        // Output is "<commit> <parent1> <parent2> ..."
        let stdout = self.run_stdout(&["rev-list", "--parents", "-n", "1", commit])?;
        Ok(stdout
            .split_whitespace()
            .skip(1)
            .map(String::from)
            .collect())
    }

    fn has_diff(&self, from: &str, to: &str) -> Result<bool> {
        // --quiet exits 1 when there are differences
        self.run_predicate(&["diff", "--quiet", from, to]).map(|same| !same)
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        self.run_predicate(&["merge-base", "--is-ancestor", ancestor, descendant])
    }
}
