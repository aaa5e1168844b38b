//! In-memory fakes of the registry, runtime and VCS traits
//!
//! All fakes append to a shared [`CallLog`] so tests can assert on the exact
//! sequence of external calls.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::registry::{
    ImageId, ImageRegistry, RegistryError, RegistryRepository, ScanFindings, ScanReport,
    ScanStatus,
};
use crate::runtime::{ContainerRuntime, ImageRef, RuntimeError};
use crate::vcs::Vcs;

pub const REGISTRY_HOST: &str = "123456789012.dkr.ecr.us-east-2.amazonaws.com";

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    /// Calls whose name (first word) is `name`
    pub fn named(&self, name: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.split_whitespace().next() == Some(name))
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.named(name).len()
    }
}

pub fn image_ref(reference: &str) -> String {
    format!("{}/silver-spork:{}", REGISTRY_HOST, reference)
}

/// One scripted response of `describe_scan_findings`
#[derive(Debug, Clone)]
pub enum ScanStep {
    NotFound,
    Status(ScanStatus),
    Complete(ScanFindings),
}

#[derive(Debug, Default)]
struct RegistryState {
    repository_exists: bool,
    token: String,
    /// Tag -> image IDs
    images: HashMap<String, Vec<ImageId>>,
    /// Tag -> number of lookups that still return nothing
    hidden_lookups: HashMap<String, usize>,
    scan_steps: VecDeque<ScanStep>,
    last_scan_step: Option<ScanStep>,
    scan_limit_exceeded: bool,
}

#[derive(Debug, Clone)]
pub struct FakeRegistry {
    log: CallLog,
    state: Arc<Mutex<RegistryState>>,
}

impl FakeRegistry {
    pub fn new(log: CallLog) -> Self {
        use base64::Engine;

        Self {
            log,
            state: Arc::new(Mutex::new(RegistryState {
                repository_exists: true,
                token: base64::engine::general_purpose::STANDARD.encode("AWS:secret"),
                ..Default::default()
            })),
        }
    }

    pub fn without_repository(self) -> Self {
        self.state.lock().unwrap().repository_exists = false;
        self
    }

    pub fn with_token(self, token: &str) -> Self {
        self.state.lock().unwrap().token = token.to_string();
        self
    }

    /// Make an image visible under `tag`
    pub fn with_image(self, tag: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .images
            .entry(tag.to_string())
            .or_default()
            .push(ImageId {
                digest: Some(format!("sha256:{}", tag)),
                tag: Some(tag.to_string()),
            });
        self
    }

    /// Make an image visible under `tag` only after `lookups` empty answers
    pub fn with_delayed_image(self, tag: &str, lookups: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .hidden_lookups
            .insert(tag.to_string(), lookups);
        self.with_image(tag)
    }

    pub fn with_scan_steps(self, steps: Vec<ScanStep>) -> Self {
        self.state.lock().unwrap().scan_steps = steps.into();
        self
    }

    pub fn with_scan_limit_exceeded(self) -> Self {
        self.state.lock().unwrap().scan_limit_exceeded = true;
        self
    }

    fn repository(name: &str) -> RegistryRepository {
        RegistryRepository {
            name: name.to_string(),
            registry_id: "123456789012".to_string(),
            uri: format!("{}/{}", REGISTRY_HOST, name),
        }
    }
}

#[async_trait]
impl ImageRegistry for FakeRegistry {
    async fn describe_repository(&self, name: &str) -> Result<RegistryRepository, RegistryError> {
        self.log.record(format!("describe_repository {}", name));
        if self.state.lock().unwrap().repository_exists {
            Ok(Self::repository(name))
        } else {
            Err(RegistryError::RepositoryNotFound(name.to_string()))
        }
    }

    async fn create_repository(&self, name: &str) -> Result<RegistryRepository, RegistryError> {
        self.log.record(format!("create_repository {}", name));
        self.state.lock().unwrap().repository_exists = true;
        Ok(Self::repository(name))
    }

    async fn authorization_token(&self, registry_id: &str) -> Result<String, RegistryError> {
        self.log.record(format!("authorization_token {}", registry_id));
        Ok(self.state.lock().unwrap().token.clone())
    }

    async fn image_ids_by_tag(
        &self,
        _repository: &RegistryRepository,
        tag: &str,
    ) -> Result<Vec<ImageId>, RegistryError> {
        self.log.record(format!("image_ids_by_tag {}", tag));
        let mut state = self.state.lock().unwrap();
        if let Some(hidden) = state.hidden_lookups.get_mut(tag) {
            if *hidden > 0 {
                *hidden -= 1;
                return Ok(Vec::new());
            }
        }
        Ok(state.images.get(tag).cloned().unwrap_or_default())
    }

    async fn start_image_scan(
        &self,
        _repository: &RegistryRepository,
        image_id: &ImageId,
    ) -> Result<(), RegistryError> {
        self.log.record(format!(
            "start_image_scan {}",
            image_id.tag.as_deref().unwrap_or_default()
        ));
        if self.state.lock().unwrap().scan_limit_exceeded {
            return Err(RegistryError::LimitExceeded(
                "scan already requested".to_string(),
            ));
        }
        Ok(())
    }

    async fn describe_scan_findings(
        &self,
        repository: &RegistryRepository,
        image_id: &ImageId,
    ) -> Result<ScanReport, RegistryError> {
        self.log.record(format!(
            "describe_scan_findings {}",
            image_id.tag.as_deref().unwrap_or_default()
        ));

        let mut state = self.state.lock().unwrap();
        let step = match state.scan_steps.pop_front() {
            Some(step) => {
                state.last_scan_step = Some(step.clone());
                step
            }
            None => state
                .last_scan_step
                .clone()
                .unwrap_or(ScanStep::Status(ScanStatus::Pending)),
        };

        match step {
            ScanStep::NotFound => Err(RegistryError::ScanNotFound(repository.name.clone())),
            ScanStep::Status(status) => Ok(ScanReport {
                status,
                findings: None,
            }),
            ScanStep::Complete(findings) => Ok(ScanReport {
                status: ScanStatus::Complete,
                findings: Some(findings),
            }),
        }
    }
}

#[derive(Debug, Default)]
struct RuntimeState {
    /// References `pull` can fetch
    remote: HashSet<String>,
    /// References `get` can resolve
    local: HashSet<String>,
    /// References whose pull fails with a non-not-found error
    broken: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct FakeRuntime {
    log: CallLog,
    state: Arc<Mutex<RuntimeState>>,
}

impl FakeRuntime {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            state: Arc::default(),
        }
    }

    pub fn with_remote(self, reference: &str) -> Self {
        self.state.lock().unwrap().remote.insert(reference.to_string());
        self
    }

    pub fn with_local(self, reference: &str) -> Self {
        self.state.lock().unwrap().local.insert(reference.to_string());
        self
    }

    pub fn with_broken(self, reference: &str) -> Self {
        self.state.lock().unwrap().broken.insert(reference.to_string());
        self
    }

    fn image(reference: &str) -> ImageRef {
        ImageRef {
            reference: reference.to_string(),
            id: format!("id-{}", reference.rsplit(':').next().unwrap_or(reference)),
        }
    }
}

impl ContainerRuntime for FakeRuntime {
    fn ping(&self) -> Result<(), RuntimeError> {
        self.log.record("ping");
        Ok(())
    }

    fn login(&self, registry: &str, username: &str, password: &str) -> Result<(), RuntimeError> {
        self.log
            .record(format!("login {} {} {}", registry, username, password));
        Ok(())
    }

    fn pull(&self, reference: &str) -> Result<ImageRef, RuntimeError> {
        self.log.record(format!("pull {}", reference));
        let state = self.state.lock().unwrap();
        if state.broken.contains(reference) {
            return Err(RuntimeError::Command {
                command: "docker pull".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "i/o timeout".to_string(),
            });
        }
        if state.remote.contains(reference) {
            Ok(Self::image(reference))
        } else {
            Err(RuntimeError::NotFound(reference.to_string()))
        }
    }

    fn get(&self, reference: &str) -> Result<ImageRef, RuntimeError> {
        self.log.record(format!("get {}", reference));
        if self.state.lock().unwrap().local.contains(reference) {
            Ok(Self::image(reference))
        } else {
            Err(RuntimeError::NotFound(reference.to_string()))
        }
    }

    fn tag(&self, image: &ImageRef, target: &str) -> Result<(), RuntimeError> {
        self.log.record(format!("tag {} {}", image.id, target));
        Ok(())
    }

    fn push(&self, reference: &str) -> Result<(), RuntimeError> {
        self.log.record(format!("push {}", reference));
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeVcs {
    log: CallLog,
    head: String,
    branches: HashMap<String, String>,
    /// Ancestors of HEAD, nearest first
    history: Vec<String>,
    parents: HashMap<String, Vec<String>>,
    /// (from, to) pairs whose trees differ
    diffs: HashSet<(String, String)>,
    /// (ancestor, descendant) pairs
    ancestry: HashSet<(String, String)>,
}

impl FakeVcs {
    pub fn new(log: CallLog, head: &str) -> Self {
        Self {
            log,
            head: head.to_string(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: &[&str]) -> Self {
        self.history = history.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_branch(mut self, branch: &str, commit: &str) -> Self {
        self.branches.insert(branch.to_string(), commit.to_string());
        self
    }

    pub fn with_parents(mut self, commit: &str, parents: &[&str]) -> Self {
        self.parents.insert(
            commit.to_string(),
            parents.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    pub fn with_diff(mut self, from: &str, to: &str) -> Self {
        self.diffs.insert((from.to_string(), to.to_string()));
        self
    }

    pub fn with_ancestor(mut self, ancestor: &str, descendant: &str) -> Self {
        self.ancestry
            .insert((ancestor.to_string(), descendant.to_string()));
        self
    }
}

impl Vcs for FakeVcs {
    fn head_commit(&self) -> anyhow::Result<String> {
        self.log.record("head_commit");
        Ok(self.head.clone())
    }

    fn branch_commit(&self, branch: &str) -> anyhow::Result<String> {
        self.log.record(format!("branch_commit {}", branch));
        self.branches
            .get(branch)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Branch '{}' not found", branch))
    }

    fn ancestors(&self, commit: &str, limit: usize) -> anyhow::Result<Vec<String>> {
        self.log.record(format!("ancestors {} {}", commit, limit));
        Ok(self.history.iter().take(limit).cloned().collect())
    }

    fn parents(&self, commit: &str) -> anyhow::Result<Vec<String>> {
        self.log.record(format!("parents {}", commit));
        Ok(self.parents.get(commit).cloned().unwrap_or_default())
    }

    fn has_diff(&self, from: &str, to: &str) -> anyhow::Result<bool> {
        self.log.record(format!("has_diff {} {}", from, to));
        Ok(self.diffs.contains(&(from.to_string(), to.to_string())))
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> anyhow::Result<bool> {
        self.log
            .record(format!("is_ancestor {} {}", ancestor, descendant));
        Ok(self
            .ancestry
            .contains(&(ancestor.to_string(), descendant.to_string())))
    }
}
