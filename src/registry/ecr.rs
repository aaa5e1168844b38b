use anyhow::{anyhow, Context};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ecr::types::ImageIdentifier;
use aws_sdk_ecr::Client as EcrClient;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::models::{
    Finding, ImageId, RegistryRepository, ScanFindings, ScanReport, ScanStatus,
};
use super::{ImageRegistry, RegistryError};

/// Extract a clean error message from an AWS SDK error's Debug output
///
/// The AWS SDK errors have verbose Debug output, but we can extract just the
/// meaningful message by parsing for the `message: Some("...")` pattern.
fn format_sdk_error<E: std::fmt::Debug>(err: &E) -> String {
    let debug_str = format!("{:?}", err);

    // Pattern: message: Some("actual error message")
    if let Some(start) = debug_str.find("message: Some(\"") {
        let start = start + 15; // length of 'message: Some("'
        if let Some(end) = debug_str[start..].find("\")") {
            return debug_str[start..start + end].to_string();
        }
    }

    // Fallback: a Message field as in the JSON response
    if let Some(start) = debug_str.find("\"Message\":\"") {
        let start = start + 11; // length of '"Message":"'
        if let Some(end) = debug_str[start..].find('"') {
            return debug_str[start..start + end].to_string();
        }
    }

    if debug_str.len() > 200 {
        let mut end = 200;
        while !debug_str.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &debug_str[..end])
    } else {
        debug_str
    }
}

fn to_chrono(dt: &aws_sdk_ecr::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn to_identifier(image_id: &ImageId) -> ImageIdentifier {
    ImageIdentifier::builder()
        .set_image_digest(image_id.digest.clone())
        .set_image_tag(image_id.tag.clone())
        .build()
}

fn to_repository(
    repo: &aws_sdk_ecr::types::Repository,
    name: &str,
) -> Result<RegistryRepository, RegistryError> {
    let registry_id = repo
        .registry_id()
        .context("ECR repository has no registry ID")?;
    let uri = repo
        .repository_uri()
        .context("ECR repository has no repository URI")?;

    Ok(RegistryRepository {
        name: repo.repository_name().unwrap_or(name).to_string(),
        registry_id: registry_id.to_string(),
        uri: uri.to_string(),
    })
}

/// AWS ECR registry
pub struct EcrRegistry {
    client: EcrClient,
    region: String,
}

impl EcrRegistry {
    /// Create a new ECR registry client for a region
    ///
    /// Credentials come from the default chain (env vars, profile, IAM role).
    pub async fn new(region: &str) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        Self {
            client: EcrClient::new(&aws_config),
            region: region.to_string(),
        }
    }

    /// The AWS region this client talks to
    pub fn region(&self) -> &str {
        &self.region
    }
}

#[async_trait]
impl ImageRegistry for EcrRegistry {
    async fn describe_repository(&self, name: &str) -> Result<RegistryRepository, RegistryError> {
        let response = self
            .client
            .describe_repositories()
            .repository_names(name)
            .send()
            .await
            .map_err(|err| {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.is_repository_not_found_exception() {
                        return RegistryError::RepositoryNotFound(name.to_string());
                    }
                }
                RegistryError::Service(anyhow!(
                    "Failed to describe ECR repository '{}': {}",
                    name,
                    format_sdk_error(&err)
                ))
            })?;

        let repo = response
            .repositories()
            .first()
            .ok_or_else(|| RegistryError::RepositoryNotFound(name.to_string()))?;

        to_repository(repo, name)
    }

    async fn create_repository(&self, name: &str) -> Result<RegistryRepository, RegistryError> {
        info!("Creating ECR repository: {}", name);

        let response = self
            .client
            .create_repository()
            .repository_name(name)
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "Failed to create ECR repository '{}': {}",
                    name,
                    format_sdk_error(&e)
                )
            })?;

        let repo = response
            .repository()
            .context("No repository returned from ECR")?;

        info!("Created ECR repository: {}", name);
        to_repository(repo, name)
    }

    async fn authorization_token(&self, registry_id: &str) -> Result<String, RegistryError> {
        debug!("Getting ECR authorization token for registry {}", registry_id);

        #[allow(deprecated)]
        let response = self
            .client
            .get_authorization_token()
            .registry_ids(registry_id)
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "Failed to get ECR authorization token: {}",
                    format_sdk_error(&e)
                )
            })?;

        let token = response
            .authorization_data()
            .first()
            .and_then(|data| data.authorization_token())
            .context("No authorization token returned from ECR")?;

        Ok(token.to_string())
    }

    async fn image_ids_by_tag(
        &self,
        repository: &RegistryRepository,
        tag: &str,
    ) -> Result<Vec<ImageId>, RegistryError> {
        let response = self
            .client
            .batch_get_image()
            .registry_id(&repository.registry_id)
            .repository_name(&repository.name)
            .image_ids(ImageIdentifier::builder().image_tag(tag).build())
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "Failed to get image '{}:{}': {}",
                    repository.name,
                    tag,
                    format_sdk_error(&e)
                )
            })?;

        Ok(response
            .images()
            .iter()
            .filter_map(|image| image.image_id())
            .map(|id| ImageId {
                digest: id.image_digest().map(String::from),
                tag: id.image_tag().map(String::from),
            })
            .collect())
    }

    async fn start_image_scan(
        &self,
        repository: &RegistryRepository,
        image_id: &ImageId,
    ) -> Result<(), RegistryError> {
        self.client
            .start_image_scan()
            .registry_id(&repository.registry_id)
            .repository_name(&repository.name)
            .image_id(to_identifier(image_id))
            .send()
            .await
            .map_err(|err| {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.is_limit_exceeded_exception() {
                        return RegistryError::LimitExceeded(format_sdk_error(&err));
                    }
                }
                RegistryError::Service(anyhow!(
                    "Failed to start image scan in '{}': {}",
                    repository.name,
                    format_sdk_error(&err)
                ))
            })?;

        Ok(())
    }

    async fn describe_scan_findings(
        &self,
        repository: &RegistryRepository,
        image_id: &ImageId,
    ) -> Result<ScanReport, RegistryError> {
        let mut status = ScanStatus::Pending;
        let mut collected: Option<ScanFindings> = None;
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .client
                .describe_image_scan_findings()
                .registry_id(&repository.registry_id)
                .repository_name(&repository.name)
                .image_id(to_identifier(image_id))
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|err| {
                    if let Some(service_err) = err.as_service_error() {
                        if service_err.is_scan_not_found_exception() {
                            return RegistryError::ScanNotFound(repository.name.clone());
                        }
                    }
                    RegistryError::Service(anyhow!(
                        "Failed to describe image scan findings in '{}': {}",
                        repository.name,
                        format_sdk_error(&err)
                    ))
                })?;

            if let Some(s) = response.image_scan_status().and_then(|s| s.status()) {
                status = ScanStatus::from_registry(s.as_str());
            }

            if let Some(page) = response.image_scan_findings() {
                let findings = collected.get_or_insert_with(|| ScanFindings {
                    completed_at: page.image_scan_completed_at().and_then(to_chrono),
                    vulnerability_source_updated_at: page
                        .vulnerability_source_updated_at()
                        .and_then(to_chrono),
                    severity_counts: page
                        .finding_severity_counts()
                        .map(|counts| {
                            counts
                                .iter()
                                .map(|(severity, count)| (severity.as_str().to_string(), *count))
                                .collect()
                        })
                        .unwrap_or_default(),
                    findings: Vec::new(),
                });

                findings
                    .findings
                    .extend(page.findings().iter().map(|finding| Finding {
                        name: finding.name().map(String::from),
                        severity: finding.severity().map(|s| s.as_str().to_string()),
                        uri: finding.uri().map(String::from),
                        description: finding.description().map(String::from),
                        attributes: finding
                            .attributes()
                            .iter()
                            .map(|attr| {
                                (
                                    attr.key().to_string(),
                                    attr.value().unwrap_or_default().to_string(),
                                )
                            })
                            .collect(),
                    }));
            }

            next_token = response.next_token().map(String::from);
            if next_token.is_none() {
                break;
            }
        }

        Ok(ScanReport {
            status,
            findings: collected,
        })
    }
}
