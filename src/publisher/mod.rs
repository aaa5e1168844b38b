// Registry publisher - pull, push, scan and promote images keyed by commit hash
//
// Images in the registry are tagged with the commit hash they were built
// from. A merge commit on the main branch reuses the image of the merged
// branch tip instead of being rebuilt, provided the merge introduced no
// changes of its own.
//
//  merge_commit
//    |      \
//    |    branch_commit
//    |       |
//    |    branch_commit'
//    |      /
//  base_commit

mod error;
mod poll;
#[cfg(test)]
mod testing;

pub use error::{PublishError, PublishResult};

use base64::Engine;
use std::io::Write;
use tracing::{debug, info, warn};

use crate::config::PublisherSettings;
use crate::registry::{
    ImageId, ImageRegistry, RegistryCredentials, RegistryError, RegistryRepository, ScanFindings,
    ScanStatus,
};
use crate::runtime::{ContainerRuntime, ImageRef};
use crate::vcs::Vcs;
use poll::Poller;

/// Decode a registry authorization token (base64 of "username:password")
pub fn decode_authorization_token(token: &str) -> PublishResult<RegistryCredentials> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token.trim())
        .map_err(|e| PublishError::InvalidAuthToken(format!("not valid base64: {}", e)))?;

    let decoded = String::from_utf8(decoded)
        .map_err(|_| PublishError::InvalidAuthToken("not valid UTF-8".to_string()))?;

    let (username, password) = decoded.split_once(':').ok_or_else(|| {
        PublishError::InvalidAuthToken("expected 'username:password'".to_string())
    })?;

    Ok(RegistryCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

fn render_findings(findings: &ScanFindings) -> String {
    serde_json::to_string_pretty(findings).unwrap_or_else(|_| format!("{:#?}", findings))
}

/// Publishes container images to a registry repository
///
/// Owns the authenticated registry and runtime clients for its lifetime.
pub struct Publisher<R, C, V> {
    image_name: String,
    repository: RegistryRepository,
    registry: R,
    runtime: C,
    vcs: V,
    settings: PublisherSettings,
}

impl<R, C, V> Publisher<R, C, V>
where
    R: ImageRegistry,
    C: ContainerRuntime,
    V: Vcs,
{
    /// Look up (or create) the repository and log the runtime in to it
    pub async fn connect(
        image_name: impl Into<String>,
        registry: R,
        runtime: C,
        vcs: V,
        settings: PublisherSettings,
    ) -> PublishResult<Self> {
        let image_name = image_name.into();

        let repository = match registry.describe_repository(&image_name).await {
            Ok(repository) => repository,
            Err(RegistryError::RepositoryNotFound(_)) => {
                info!("Repository {} not found, creating it", image_name);
                registry.create_repository(&image_name).await?
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Using repository {}", repository.uri);

        let token = registry.authorization_token(&repository.registry_id).await?;
        let credentials = decode_authorization_token(&token)?;

        runtime.ping()?;
        runtime.login(
            &repository.uri,
            &credentials.username,
            &credentials.password,
        )?;

        Ok(Self {
            image_name,
            repository,
            registry,
            runtime,
            vcs,
            settings,
        })
    }

    pub fn repository(&self) -> &RegistryRepository {
        &self.repository
    }

    fn head_commit(&self) -> PublishResult<String> {
        self.vcs.head_commit().map_err(PublishError::Vcs)
    }

    fn resolve_tag(&self, tag: Option<&str>) -> PublishResult<String> {
        match tag {
            Some(tag) => Ok(tag.to_string()),
            None => self.head_commit(),
        }
    }

    /// Pull the image for `tag`, or for the nearest ancestor of HEAD that has one
    ///
    /// The pulled image is additionally tagged `<image>:<tag>` and
    /// `<image>:latest` locally. Returns the resolved tag and the image.
    pub fn pull(&self, tag: Option<&str>) -> PublishResult<(String, ImageRef)> {
        let (tag, image) = match tag {
            Some(tag) => {
                let reference = self.repository.image_reference(tag);
                info!("Pulling {}", reference);
                (tag.to_string(), self.runtime.pull(&reference)?)
            }
            None => self.pull_nearest_ancestor()?,
        };

        self.runtime
            .tag(&image, &format!("{}:{}", self.image_name, tag))?;
        self.runtime
            .tag(&image, &format!("{}:latest", self.image_name))?;

        Ok((tag, image))
    }

    fn pull_nearest_ancestor(&self) -> PublishResult<(String, ImageRef)> {
        let head = self.head_commit()?;
        let ancestors = self
            .vcs
            .ancestors(&head, self.settings.ancestor_search_limit)
            .map_err(PublishError::Vcs)?;

        let mut last_not_found = None;
        for commit in ancestors {
            let reference = self.repository.image_reference(&commit);
            info!("Trying to pull {}", reference);

            match self.runtime.pull(&reference) {
                Ok(image) => return Ok((commit, image)),
                Err(e) if e.is_not_found() => {
                    debug!("No image for {}", commit);
                    last_not_found = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        match last_not_found {
            Some(e) => Err(e.into()),
            None => Err(PublishError::NoAncestorImage { head }),
        }
    }

    /// Resolve a local image to push when none was given
    ///
    /// Tries, in order, the registry-qualified name at `tag`, the short name
    /// at `tag` and the bare short name. The first hit wins.
    fn resolve_local_image(&self, tag: &str) -> PublishResult<ImageRef> {
        let candidates = [
            self.repository.image_reference(tag),
            format!("{}:{}", self.image_name, tag),
        ];

        for candidate in &candidates {
            match self.runtime.get(candidate) {
                Ok(image) => {
                    debug!("Resolved local image {} ({})", image.reference, image.id);
                    return Ok(image);
                }
                Err(e) if e.is_not_found() => debug!("No local image {}", candidate),
                Err(e) => return Err(e.into()),
            }
        }

        Ok(self.runtime.get(&self.image_name)?)
    }

    /// Push an image under `tag` (default: HEAD) and request a scan of it
    pub async fn push(&self, tag: Option<&str>, image: Option<&ImageRef>) -> PublishResult<()> {
        let tag = self.resolve_tag(tag)?;
        let image = match image {
            Some(image) => image.clone(),
            None => self.resolve_local_image(&tag)?,
        };

        let reference = self.repository.image_reference(&tag);
        info!("Pushing {} as {}", image.reference, reference);
        self.runtime.tag(&image, &reference)?;
        self.runtime.push(&reference)?;

        self.start_image_scan(&tag).await
    }

    /// Registry image ID for `tag`, if the registry already knows it
    async fn lookup_image_id(&self, tag: &str) -> PublishResult<Option<ImageId>> {
        let mut ids = self
            .registry
            .image_ids_by_tag(&self.repository, tag)
            .await?;

        if ids.len() > 1 {
            return Err(PublishError::MultipleImagesWithTag {
                tag: tag.to_string(),
                count: ids.len(),
            });
        }
        Ok(ids.pop())
    }

    /// Wait for the registry to report an image ID for `tag`
    async fn wait_image_id(&self, tag: &str) -> PublishResult<ImageId> {
        let poller = Poller::start(self.settings.image_id_poll);

        while !poller.expired() {
            if let Some(image_id) = self.lookup_image_id(tag).await? {
                return Ok(image_id);
            }
            debug!("Image for tag {} not visible yet", tag);
            poller.sleep().await;
        }

        Err(PublishError::ImageIdTimeout {
            tag: tag.to_string(),
            timeout: poller.timeout(),
        })
    }

    async fn start_image_scan(&self, tag: &str) -> PublishResult<()> {
        let image_id = self.wait_image_id(tag).await?;

        match self
            .registry
            .start_image_scan(&self.repository, &image_id)
            .await
        {
            Ok(()) => info!("Requested image scan for tag {}", tag),
            Err(RegistryError::LimitExceeded(message)) => {
                warn!("Image scan for tag {} already requested: {}", tag, message);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// One look at the scan; `None` means "not complete yet"
    async fn scan_attempt(&self, tag: &str) -> PublishResult<Option<ScanFindings>> {
        let image_id = self.wait_image_id(tag).await?;

        match self
            .registry
            .describe_scan_findings(&self.repository, &image_id)
            .await
        {
            Ok(report) if report.status == ScanStatus::Complete => {
                Ok(Some(report.findings.unwrap_or_default()))
            }
            Ok(report) => {
                debug!("Scan for tag {} is {}", tag, report.status);
                Ok(None)
            }
            Err(RegistryError::ScanNotFound(_)) => {
                info!("No scan found for tag {}, starting one", tag);
                self.start_image_scan(tag).await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for the scan of `tag` to complete and return its findings
    pub async fn scan_findings(&self, tag: &str) -> PublishResult<ScanFindings> {
        let poller = Poller::start(self.settings.scan_poll);

        while !poller.expired() {
            if let Some(findings) = self.scan_attempt(tag).await? {
                return Ok(findings);
            }
            print!(".");
            let _ = std::io::stdout().flush();
            poller.sleep().await;
        }

        Err(PublishError::ImageScanTimeout {
            tag: tag.to_string(),
            timeout: poller.timeout(),
        })
    }

    /// Print the scan results of `tag` (default: HEAD)
    ///
    /// Findings only fail the call when `exit_code` is set.
    pub async fn check_scan(
        &self,
        tag: Option<&str>,
        exit_code: bool,
    ) -> PublishResult<ScanFindings> {
        let tag = self.resolve_tag(tag)?;
        let findings = self.scan_findings(&tag).await?;

        println!("ECR Scan results:");
        println!("{}", render_findings(&findings));

        if !findings.is_clean() {
            if exit_code {
                return Err(PublishError::VulnerabilitiesFound {
                    tag,
                    count: findings.findings.len(),
                });
            }
            warn!(
                "Image scan for tag {} found {} vulnerabilities",
                tag,
                findings.findings.len()
            );
        }

        Ok(findings)
    }

    /// Promote the merged branch's image to the merge commit on the main branch
    ///
    /// Requires the main branch tip to be a two-parent merge that adds
    /// nothing over the branch tip, with the branch based on the latest base.
    pub async fn tag_merge(&self) -> PublishResult<()> {
        let merge_commit = self
            .vcs
            .branch_commit(&self.settings.main_branch)
            .map_err(PublishError::Vcs)?;

        let parents = self.vcs.parents(&merge_commit).map_err(PublishError::Vcs)?;
        let (base_commit, branch_commit) = match parents.as_slice() {
            [base, branch] => (base.clone(), branch.clone()),
            _ => {
                return Err(PublishError::NotAMergeCommit {
                    commit: merge_commit,
                    parents: parents.len(),
                })
            }
        };

        if self
            .vcs
            .has_diff(&merge_commit, &branch_commit)
            .map_err(PublishError::Vcs)?
        {
            return Err(PublishError::BranchDiffers {
                merge: merge_commit,
                branch: branch_commit,
            });
        }

        if !self
            .vcs
            .is_ancestor(&base_commit, &branch_commit)
            .map_err(PublishError::Vcs)?
        {
            return Err(PublishError::BaseNotAncestor {
                base: base_commit,
                branch: branch_commit,
            });
        }

        info!(
            "Promoting image of {} to merge commit {}",
            branch_commit, merge_commit
        );

        let (_, image) = self.pull(Some(&branch_commit))?;
        self.push(Some(&merge_commit), Some(&image)).await?;
        self.push(Some("latest"), Some(&image)).await?;

        Ok(())
    }
}
