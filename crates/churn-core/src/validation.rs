//! Validation for agent configuration.

use serde::{Deserialize, Serialize};

use crate::config::{AgentConfig, SUPPORTED_ORCHESTRATORS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

impl Validate for AgentConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if !SUPPORTED_ORCHESTRATORS.contains(&self.agent.orchestrator.as_str()) {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "agent.orchestrator.unsupported",
                message: format!(
                    "orchestrator '{}' is not supported (expected one of: {})",
                    self.agent.orchestrator,
                    SUPPORTED_ORCHESTRATORS.join(", ")
                ),
            });
        }

        if self.agent.drain_secs == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "agent.drain_secs.zero",
                message: "drain interval is 0; runs finish before in-flight actions complete"
                    .to_string(),
            });
        }

        if self.docker.binary.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "docker.binary.empty",
                message: "docker binary must not be empty".to_string(),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::{Validate, ValidationLevel};
    use crate::config::AgentConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(AgentConfig::default().validate().is_empty());
    }

    #[test]
    fn unsupported_orchestrator_is_an_error() {
        let mut config = AgentConfig::default();
        config.agent.orchestrator = "kubernetes".to_string();

        let issues = config.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].level, ValidationLevel::Error);
        assert_eq!(issues[0].code, "agent.orchestrator.unsupported");
        assert!(issues[0].message.contains("kubernetes"));
    }

    #[test]
    fn zero_drain_is_only_a_warning() {
        let mut config = AgentConfig::default();
        config.agent.drain_secs = 0;

        let issues = config.validate();
        assert_eq!(issues.len(), 1);
        assert!(issues.iter().any(|issue| {
            issue.level == ValidationLevel::Warning && issue.code == "agent.drain_secs.zero"
        }));
    }

    #[test]
    fn blank_docker_binary_is_an_error() {
        let mut config = AgentConfig::default();
        config.docker.binary = "  ".to_string();

        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|issue| issue.code == "docker.binary.empty"));
    }
}
