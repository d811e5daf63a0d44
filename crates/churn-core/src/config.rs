//! Agent configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Orchestrator names with a concrete adapter.
pub const SUPPORTED_ORCHESTRATORS: &[&str] = &["docker-swarm"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub docker: DockerSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Cluster runtime whose naming the adapter translates.
    pub orchestrator: String,
    /// Seconds to wait after the last dispatch before a run counts as done.
    pub drain_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            orchestrator: "docker-swarm".to_string(),
            drain_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSection {
    pub binary: String,
    pub stop_timeout_secs: u64,
}

impl Default for DockerSection {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            stop_timeout_secs: 10,
        }
    }
}

pub fn parse_agent_config(contents: &str) -> Result<AgentConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_agent_config(path: impl AsRef<Path>) -> Result<AgentConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_agent_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_temp_path(file_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "{file_name}-{}.toml",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse_agent_config("").expect("parse empty config");
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.agent.orchestrator, "docker-swarm");
        assert_eq!(config.agent.drain_secs, 10);
        assert_eq!(config.docker.binary, "docker");
        assert_eq!(config.docker.stop_timeout_secs, 10);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = parse_agent_config(
            r#"
[agent]
drain_secs = 3

[docker]
binary = "/usr/local/bin/docker"
"#,
        )
        .expect("parse config");
        assert_eq!(config.agent.orchestrator, "docker-swarm");
        assert_eq!(config.agent.drain_secs, 3);
        assert_eq!(config.docker.binary, "/usr/local/bin/docker");
        assert_eq!(config.docker.stop_timeout_secs, 10);
    }

    #[test]
    fn load_agent_config_classifies_read_and_parse_errors() {
        let missing_path = unique_temp_path("churn-missing-agent-config");
        let err = load_agent_config(&missing_path).expect_err("missing file should fail");
        assert!(matches!(err, ConfigError::Read { path, .. } if path == missing_path));

        let invalid_path = unique_temp_path("churn-invalid-agent-config");
        fs::write(&invalid_path, "[agent]\ndrain_secs = \"soon\"")
            .expect("write invalid config fixture");
        let err = load_agent_config(&invalid_path).expect_err("invalid config should fail");
        assert!(matches!(err, ConfigError::Parse { path, .. } if path == invalid_path));
        let _ = fs::remove_file(invalid_path);
    }

    #[test]
    fn load_agent_config_reads_file() {
        let path = unique_temp_path("churn-agent-config");
        fs::write(&path, "[agent]\norchestrator = \"docker-swarm\"\ndrain_secs = 1\n")
            .expect("write config fixture");
        let config = load_agent_config(&path).expect("load config");
        assert_eq!(config.agent.drain_secs, 1);
        let _ = fs::remove_file(path);
    }
}
