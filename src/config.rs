// Publisher configuration (ecr-publish.toml / .ecr-publish.toml)

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_IMAGE: &str = "silver-spork";
pub const DEFAULT_MAIN_BRANCH: &str = "main";
pub const DEFAULT_CONTAINER_CLI: &str = "docker";
pub const DEFAULT_ANCESTOR_SEARCH_LIMIT: usize = 30;

/// CI variable holding the commit being built
pub const GITHUB_SHA_VAR: &str = "GITHUB_SHA";

const CONFIG_FILE: &str = "ecr-publish.toml";
const DOT_CONFIG_FILE: &str = ".ecr-publish.toml";

/// Read an environment variable, treating empty strings as if the variable is not set.
pub(crate) fn env_var_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Parse a duration string like "500ms", "5s", "15m" or "1h"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("Duration string is empty");
    }

    let (num_str, unit) = if let Some(num_str) = s.strip_suffix("ms") {
        (num_str, "ms")
    } else {
        let split = s.len() - 1;
        if !s.is_char_boundary(split) {
            bail!("Invalid duration '{}'", s);
        }
        (&s[..split], &s[split..])
    };

    let num: u64 = num_str
        .parse()
        .with_context(|| format!("Invalid duration number in '{}'", s))?;

    let secs_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(num)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => bail!("Invalid duration unit '{}'. Use ms, s, m, or h", unit),
    };

    let secs = num
        .checked_mul(secs_per_unit)
        .with_context(|| format!("Duration '{}' is too large", s))?;
    Ok(Duration::from_secs(secs))
}

/// AWS regions the publisher may target
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
pub enum Region {
    #[value(name = "us-east-1")]
    #[serde(rename = "us-east-1")]
    UsEast1,
    #[default]
    #[value(name = "us-east-2")]
    #[serde(rename = "us-east-2")]
    UsEast2,
    #[value(name = "us-west-1")]
    #[serde(rename = "us-west-1")]
    UsWest1,
    #[value(name = "us-west-2")]
    #[serde(rename = "us-west-2")]
    UsWest2,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::UsEast1 => "us-east-1",
            Region::UsEast2 => "us-east-2",
            Region::UsWest1 => "us-west-1",
            Region::UsWest2 => "us-west-2",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interval and wall-clock budget of a polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Settings of a [`crate::publisher::Publisher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherSettings {
    /// Polling for the registry image ID of a freshly pushed tag
    pub image_id_poll: PollSettings,
    /// Polling for scan completion (scans are slow, so the budget is larger)
    pub scan_poll: PollSettings,
    /// How many ancestors of HEAD `pull` tries before giving up
    pub ancestor_search_limit: usize,
    /// Branch whose tip is promoted by `tag`
    pub main_branch: String,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            image_id_poll: PollSettings::new(Duration::from_secs(5), Duration::from_secs(900)),
            scan_poll: PollSettings::new(Duration::from_secs(5), Duration::from_secs(1200)),
            ancestor_search_limit: DEFAULT_ANCESTOR_SEARCH_LIMIT,
            main_branch: DEFAULT_MAIN_BRANCH.to_string(),
        }
    }
}

/// Root structure for ecr-publish.toml / .ecr-publish.toml
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ProjectPublishConfig {
    /// Optional version (must be 1 if present)
    pub version: Option<u32>,

    #[serde(default)]
    pub publish: Option<PublishConfig>,
}

/// Publishing options; every field is optional and falls back to defaults
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct PublishConfig {
    /// Registry repository / local image name
    pub image: Option<String>,

    pub region: Option<Region>,

    /// Container CLI to use (docker or podman)
    pub container_cli: Option<String>,

    pub main_branch: Option<String>,

    pub ancestor_search_limit: Option<usize>,

    /// Sleep between polling attempts (e.g., "5s")
    pub poll_interval: Option<String>,

    /// Budget for the image ID to become visible (e.g., "15m")
    pub image_id_timeout: Option<String>,

    /// Budget for scan results to complete (e.g., "20m")
    pub scan_timeout: Option<String>,
}

impl PublishConfig {
    /// Apply the configured values on top of `settings`
    pub fn apply_to(&self, settings: &mut PublisherSettings) -> Result<()> {
        if let Some(interval) = &self.poll_interval {
            let interval = parse_duration(interval).context("Invalid poll_interval")?;
            settings.image_id_poll.interval = interval;
            settings.scan_poll.interval = interval;
        }
        if let Some(timeout) = &self.image_id_timeout {
            settings.image_id_poll.timeout =
                parse_duration(timeout).context("Invalid image_id_timeout")?;
        }
        if let Some(timeout) = &self.scan_timeout {
            settings.scan_poll.timeout = parse_duration(timeout).context("Invalid scan_timeout")?;
        }
        if let Some(limit) = self.ancestor_search_limit {
            if limit == 0 {
                bail!("ancestor_search_limit must be at least 1");
            }
            settings.ancestor_search_limit = limit;
        }
        if let Some(branch) = &self.main_branch {
            settings.main_branch = branch.clone();
        }
        Ok(())
    }
}

/// Values given on the command line; each one beats the config file
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub region: Option<Region>,
    pub image: Option<String>,
    pub container_cli: Option<String>,
    pub main_branch: Option<String>,
}

/// Effective configuration after merging CLI flags, config file and defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub region: Region,
    pub image: String,
    pub container_cli: String,
    pub settings: PublisherSettings,
}

impl ResolvedConfig {
    /// Merge with precedence CLI flag > config file > built-in default
    pub fn resolve(file: &PublishConfig, cli: &CliOverrides) -> Result<Self> {
        let mut settings = PublisherSettings::default();
        file.apply_to(&mut settings)?;
        if let Some(branch) = &cli.main_branch {
            settings.main_branch = branch.clone();
        }

        Ok(Self {
            region: cli.region.or(file.region).unwrap_or_default(),
            image: cli
                .image
                .clone()
                .or_else(|| file.image.clone())
                .unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            container_cli: cli
                .container_cli
                .clone()
                .or_else(|| file.container_cli.clone())
                .unwrap_or_else(|| DEFAULT_CONTAINER_CLI.to_string()),
            settings,
        })
    }
}

/// Commit hash for `push`: the argument, then a non-empty `$GITHUB_SHA`
///
/// `None` means the publisher falls back to HEAD.
pub fn push_commit_hash(arg: Option<String>) -> Option<String> {
    arg.filter(|hash| !hash.is_empty())
        .or_else(|| env_var_non_empty(GITHUB_SHA_VAR))
}

/// Find the project config file in `dir`
///
/// Prefers ecr-publish.toml over .ecr-publish.toml.
pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
    let config = dir.join(CONFIG_FILE);
    let dot_config = dir.join(DOT_CONFIG_FILE);

    if config.exists() && dot_config.exists() {
        warn!(
            "Both {} and {} found. Using {}.",
            CONFIG_FILE, DOT_CONFIG_FILE, CONFIG_FILE
        );
    }

    if config.exists() {
        Some(config)
    } else if dot_config.exists() {
        Some(dot_config)
    } else {
        None
    }
}

/// Load and validate a config file, warning about unknown fields
pub fn load_config_file(path: &Path) -> Result<ProjectPublishConfig> {
    info!("Loading publish config from {}", path.display());
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut unused_fields = Vec::new();
    let deserializer = toml::Deserializer::new(&content);
    let config: ProjectPublishConfig = serde_ignored::deserialize(deserializer, |field| {
        unused_fields.push(field.to_string());
    })
    .with_context(|| format!("Failed to parse {}", path.display()))?;

    for field in &unused_fields {
        warn!(
            "Unknown configuration field in {}: {}",
            path.display(),
            field
        );
    }

    match config.version {
        Some(1) => {}
        Some(version) => bail!(
            "Unsupported {} version: {}. This CLI supports version 1.",
            path.display(),
            version
        ),
        None => debug!("No version specified in {}, using latest", path.display()),
    }

    Ok(config)
}

/// Load the `[publish]` section from an explicit file or from `dir`
///
/// Returns the default (empty) config if no file is found.
pub fn load_publish_config(explicit: Option<&Path>, dir: &Path) -> Result<PublishConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(dir),
    };

    match path {
        Some(path) => Ok(load_config_file(&path)?.publish.unwrap_or_default()),
        None => Ok(PublishConfig::default()),
    }
}
