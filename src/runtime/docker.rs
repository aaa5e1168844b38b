// Docker/Podman CLI runtime

use std::io::Write;
use std::process::{Command, Output, Stdio};
use tracing::{debug, info};

use super::{ContainerRuntime, ImageRef, RuntimeError};

/// Messages the docker and podman CLIs print when an image does not exist
///
/// Markers are lowercase and matched case-insensitively.
const NOT_FOUND_MARKERS: &[&str] = &[
    "not found",
    "no such image",
    "image not known",
    "manifest unknown",
    "does not exist",
];

fn is_not_found_message(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    NOT_FOUND_MARKERS.iter().any(|marker| stderr.contains(marker))
}

/// Container runtime driven through the `docker` (or `podman`) CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    container_cli: String,
}

impl DockerCli {
    pub fn new(container_cli: impl Into<String>) -> Self {
        Self {
            container_cli: container_cli.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.container_cli)
    }

    /// Run a command, mapping failure to `RuntimeError`
    ///
    /// When `reference` is given, a failure whose stderr looks like a missing
    /// image is reported as `RuntimeError::NotFound(reference)`.
    fn run(
        &self,
        mut cmd: Command,
        what: &str,
        reference: Option<&str>,
    ) -> Result<Output, RuntimeError> {
        debug!("Executing command: {:?}", cmd);

        let output = cmd.output()?;
        if output.status.success() {
            return Ok(output);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if let Some(reference) = reference {
            if is_not_found_message(&stderr) {
                return Err(RuntimeError::NotFound(reference.to_string()));
            }
        }

        Err(RuntimeError::Command {
            command: format!("{} {}", self.container_cli, what),
            status: output.status.to_string(),
            stderr,
        })
    }

    fn inspect_id(&self, reference: &str) -> Result<String, RuntimeError> {
        let mut cmd = self.command();
        cmd.args(["image", "inspect", "--format", "{{.Id}}", reference]);

        let output = self.run(cmd, "image inspect", Some(reference))?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl ContainerRuntime for DockerCli {
    fn ping(&self) -> Result<(), RuntimeError> {
        let mut cmd = self.command();
        cmd.args(["version", "--format", "{{.Server.Version}}"]);
        self.run(cmd, "version", None)?;
        Ok(())
    }

    fn login(&self, registry: &str, username: &str, password: &str) -> Result<(), RuntimeError> {
        debug!(
            "Executing: {} login {} --username {} --password-stdin",
            self.container_cli, registry, username
        );

        let mut child = self
            .command()
            .arg("login")
            .arg(registry)
            .arg("--username")
            .arg(username)
            .arg("--password-stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(password.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(RuntimeError::Command {
                command: format!("{} login", self.container_cli),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!("Logged in to {}", registry);
        Ok(())
    }

    fn pull(&self, reference: &str) -> Result<ImageRef, RuntimeError> {
        let mut cmd = self.command();
        cmd.arg("pull").arg(reference);
        self.run(cmd, "pull", Some(reference))?;

        Ok(ImageRef {
            reference: reference.to_string(),
            id: self.inspect_id(reference)?,
        })
    }

    fn get(&self, reference: &str) -> Result<ImageRef, RuntimeError> {
        Ok(ImageRef {
            reference: reference.to_string(),
            id: self.inspect_id(reference)?,
        })
    }

    fn tag(&self, image: &ImageRef, target: &str) -> Result<(), RuntimeError> {
        let mut cmd = self.command();
        cmd.arg("tag").arg(&image.id).arg(target);
        self.run(cmd, "tag", None)?;
        Ok(())
    }

    fn push(&self, reference: &str) -> Result<(), RuntimeError> {
        info!("Pushing image to registry: {}", reference);

        let mut cmd = self.command();
        cmd.arg("push").arg(reference);
        self.run(cmd, "push", None)?;
        Ok(())
    }
}
