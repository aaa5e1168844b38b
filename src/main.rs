use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod publisher;
mod registry;
mod runtime;
mod vcs;

use config::{load_publish_config, push_commit_hash, CliOverrides, Region, ResolvedConfig};
use publisher::Publisher;
use registry::EcrRegistry;
use runtime::DockerCli;
use vcs::GitCli;

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish commit-tagged container images to AWS ECR", long_about = None)]
pub struct Cli {
    /// AWS region of the registry [default: us-east-2]
    #[arg(long, value_enum, global = true)]
    region: Option<Region>,

    /// Path to the git repository (defaults to the current directory)
    #[arg(long, global = true)]
    repo_path: Option<PathBuf>,

    /// Registry repository / local image name [default: silver-spork]
    #[arg(long, global = true)]
    image: Option<String>,

    /// Container CLI to use (docker or podman) [default: docker]
    #[arg(long, global = true)]
    container_cli: Option<String>,

    /// Branch whose tip `tag` promotes [default: main]
    #[arg(long, global = true)]
    main_branch: Option<String>,

    /// Config file (defaults to ecr-publish.toml / .ecr-publish.toml in the repository)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pull the image for a tag, or for the nearest ancestor of HEAD that has one
    Pull {
        /// Image tag (usually a commit hash)
        tag: Option<String>,
    },
    /// Push the local image tagged with a commit hash and request a scan
    Push {
        /// Commit hash to tag the image with (defaults to $GITHUB_SHA, then HEAD)
        commit_hash: Option<String>,
    },
    /// Promote the merged branch's image to the merge commit on the main branch
    Tag,
    /// Wait for and print the vulnerability scan of an image
    Scan {
        /// Image tag (defaults to HEAD)
        tag: Option<String>,
        /// Exit with an error if vulnerabilities were found
        #[arg(long)]
        exit_code: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout only carries command output
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ecr_publish=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let git = GitCli::open(cli.repo_path.as_deref())?;
    let file_config = load_publish_config(cli.config.as_deref(), git.repo_path())?;

    let ResolvedConfig {
        region,
        image,
        container_cli,
        settings,
    } = ResolvedConfig::resolve(
        &file_config,
        &CliOverrides {
            region: cli.region,
            image: cli.image,
            container_cli: cli.container_cli,
            main_branch: cli.main_branch,
        },
    )?;

    let registry = EcrRegistry::new(region.as_str()).await;
    debug!(
        "Publishing {} to {} with {} ({:?})",
        image,
        registry.region(),
        container_cli,
        settings
    );

    let publisher = Publisher::connect(
        image.as_str(),
        registry,
        DockerCli::new(container_cli),
        git,
        settings,
    )
    .await
    .with_context(|| format!("Failed to connect to registry repository '{}'", image))?;
    debug!("Connected to {}", publisher.repository().uri);

    match cli.command {
        Commands::Pull { tag } => {
            let (pulled_tag, _) = publisher.pull(tag.as_deref())?;
            println!("{}", pulled_tag);
        }
        Commands::Push { commit_hash } => {
            let commit_hash = push_commit_hash(commit_hash);
            publisher.push(commit_hash.as_deref(), None).await?;
        }
        Commands::Tag => {
            publisher.tag_merge().await?;
        }
        Commands::Scan { tag, exit_code } => {
            publisher.check_scan(tag.as_deref(), exit_code).await?;
        }
    }

    Ok(())
}
