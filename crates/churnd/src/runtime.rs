//! Side-effecting container actions.

use async_trait::async_trait;
use churn_core::{ContainerAction, ContainerId, DockerSection};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("runtime command returned non-zero exit ({command}) status={status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}

/// Applies one action to one running container.
#[async_trait]
pub trait RuntimeAction: Send + Sync {
    async fn apply(
        &self,
        container_id: &ContainerId,
        action: &ContainerAction,
    ) -> Result<(), RuntimeError>;
}

/// Drives containers through the `docker` command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerCli {
    pub binary: PathBuf,
    pub stop_timeout_secs: u64,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("docker"),
            stop_timeout_secs: 10,
        }
    }
}

impl DockerCli {
    pub fn from_config(config: &DockerSection) -> Self {
        Self {
            binary: PathBuf::from(&config.binary),
            stop_timeout_secs: config.stop_timeout_secs,
        }
    }

    /// Arguments after the binary for `action` on `container_id`.
    pub fn action_args(&self, container_id: &ContainerId, action: &ContainerAction) -> Vec<String> {
        match action {
            ContainerAction::Stop => vec![
                "stop".to_string(),
                "-t".to_string(),
                self.stop_timeout_secs.to_string(),
                container_id.to_string(),
            ],
            ContainerAction::Signal { signal } => vec![
                "kill".to_string(),
                "--signal".to_string(),
                signal.clone(),
                container_id.to_string(),
            ],
            ContainerAction::Fault(details) => {
                let mut args = vec![
                    "exec".to_string(),
                    "-d".to_string(),
                    container_id.to_string(),
                ];
                args.extend(details.command());
                args
            }
        }
    }

    pub async fn run(&self, args: &[String]) -> Result<String, RuntimeError> {
        let owned_args: Vec<OsString> = args.iter().map(OsString::from).collect();
        let rendered = render_command(&self.binary, &owned_args);
        debug!(command = %rendered, "running runtime command");

        let output = Command::new(&self.binary)
            .args(&owned_args)
            .output()
            .await
            .map_err(|source| RuntimeError::Io {
                command: rendered.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: rendered,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl RuntimeAction for DockerCli {
    async fn apply(
        &self,
        container_id: &ContainerId,
        action: &ContainerAction,
    ) -> Result<(), RuntimeError> {
        let args = self.action_args(container_id, action);
        self.run(&args).await?;
        Ok(())
    }
}

pub(crate) fn render_command(binary: &Path, args: &[OsString]) -> String {
    let mut rendered = binary.to_string_lossy().into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::{DockerCli, RuntimeAction, RuntimeError};
    use churn_core::{ContainerAction, ContainerId, DockerSection, FaultDetails};
    use std::path::PathBuf;

    #[test]
    fn stop_uses_configured_timeout() {
        let cli = DockerCli::from_config(&DockerSection {
            binary: "docker".to_string(),
            stop_timeout_secs: 4,
        });
        assert_eq!(
            cli.action_args(&ContainerId::new("abc"), &ContainerAction::Stop),
            vec!["stop", "-t", "4", "abc"]
        );
    }

    #[test]
    fn signal_passes_name_through() {
        let args = DockerCli::default().action_args(
            &ContainerId::new("abc"),
            &ContainerAction::Signal {
                signal: "SIGUSR1".to_string(),
            },
        );
        assert_eq!(args, vec!["kill", "--signal", "SIGUSR1", "abc"]);
    }

    #[test]
    fn fault_runs_detached_exec_with_script_command() {
        let mut details = FaultDetails::with_defaults("waste_cpu");
        details.script_args = vec!["30".to_string()];
        let args = DockerCli::default()
            .action_args(&ContainerId::new("abc"), &ContainerAction::Fault(details));
        assert_eq!(
            args,
            vec![
                "exec",
                "-d",
                "abc",
                "/bin/sh",
                "/usr/lib/faultsee/waste_cpu",
                "30"
            ]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_an_io_error_with_rendered_command() {
        let cli = DockerCli {
            binary: PathBuf::from("/definitely/not/a/docker/binary"),
            stop_timeout_secs: 1,
        };
        let err = cli
            .apply(&ContainerId::new("abc"), &ContainerAction::Stop)
            .await
            .expect_err("binary does not exist");
        let RuntimeError::Io { command, .. } = err else {
            panic!("expected io error, got {err:?}");
        };
        assert_eq!(command, "/definitely/not/a/docker/binary stop -t 1 abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_command_failed() {
        let cli = DockerCli {
            binary: PathBuf::from("false"),
            stop_timeout_secs: 1,
        };
        let err = cli
            .run(&["anything".to_string()])
            .await
            .expect_err("false exits 1");
        assert!(matches!(
            err,
            RuntimeError::CommandFailed {
                status: Some(1),
                ..
            }
        ));
    }
}
