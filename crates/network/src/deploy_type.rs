use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;

/// Execution mechanism used to run a worker on a host.
///
/// Parsing is an exact, case-sensitive match against the canonical names
/// returned by [`DeployType::as_str`]. There are no aliases and no fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeployType {
    /// The worker runs as a plain process from the host's binary directory.
    Native,
    /// The worker runs inside a container managed by the host's Docker daemon.
    Docker,
}

impl DeployType {
    pub const ALL: [DeployType; 2] = [DeployType::Native, DeployType::Docker];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeployType::Native => "native",
            DeployType::Docker => "docker",
        }
    }

    pub fn is_docker(&self) -> bool {
        matches!(self, DeployType::Docker)
    }

    fn recognized() -> String {
        Self::ALL
            .iter()
            .map(|d| format!("\"{}\"", d.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for DeployType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeployType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownDeployType {
                path: "deploy_type".to_string(),
                value: s.to_string(),
                recognized: Self::recognized(),
            })
    }
}
