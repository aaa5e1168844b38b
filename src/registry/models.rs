use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A repository in the container registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRepository {
    /// Repository name (e.g., "silver-spork")
    pub name: String,
    /// Registry-assigned account/registry ID
    pub registry_id: String,
    /// Fully qualified repository URI
    /// (e.g., "123456789012.dkr.ecr.us-east-2.amazonaws.com/silver-spork")
    pub uri: String,
}

impl RegistryRepository {
    /// Registry-qualified image reference for a tag
    pub fn image_reference(&self, tag: &str) -> String {
        format!("{}:{}", self.uri, tag)
    }
}

/// Registry-assigned identifier of an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageId {
    pub digest: Option<String>,
    pub tag: Option<String>,
}

/// Status of a vulnerability scan as reported by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
    Other(String),
}

impl ScanStatus {
    /// Parse the registry's status string (e.g., "COMPLETE")
    pub fn from_registry(status: &str) -> Self {
        match status {
            "PENDING" => ScanStatus::Pending,
            "IN_PROGRESS" => ScanStatus::InProgress,
            "COMPLETE" => ScanStatus::Complete,
            "FAILED" => ScanStatus::Failed,
            other => ScanStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::Pending => write!(f, "PENDING"),
            ScanStatus::InProgress => write!(f, "IN_PROGRESS"),
            ScanStatus::Complete => write!(f, "COMPLETE"),
            ScanStatus::Failed => write!(f, "FAILED"),
            ScanStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// A single vulnerability record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub name: Option<String>,
    pub severity: Option<String>,
    pub uri: Option<String>,
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Findings of a completed scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFindings {
    pub completed_at: Option<DateTime<Utc>>,
    pub vulnerability_source_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub severity_counts: BTreeMap<String, i32>,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

impl ScanFindings {
    /// Whether the scan reported no vulnerabilities
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Result of a scan findings lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub status: ScanStatus,
    pub findings: Option<ScanFindings>,
}

/// Decoded registry login credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}
