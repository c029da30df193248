use std::path::PathBuf;

use crate::core::domain::CaseStatus;

#[mockall::automock]
#[async_trait::async_trait]
pub trait ContainerExecutor: std::fmt::Debug + Send + Sync {
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerOutput, ContainerError>;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub mounts: Vec<Mount>,
    /// Path inside the container fed to the process as stdin.
    pub stdin: Option<String>,
    pub limits: ContainerLimits,
    pub network_mode: String,
    pub env: Vec<(String, String)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    pub fn rw(host: impl Into<PathBuf>, container: &str) -> Self {
        Self {
            host: host.into(),
            container: container.to_string(),
            read_only: false,
        }
    }

    pub fn ro(host: impl Into<PathBuf>, container: &str) -> Self {
        Self {
            host: host.into(),
            container: container.to_string(),
            read_only: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContainerLimits {
    pub time_ms: Option<u64>,
    pub memory_kb: Option<u64>,
    pub output_bytes: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SandboxStatus {
    ExitedNormally,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    OutputLimitExceeded,
}

impl SandboxStatus {
    /// Case verdict forced by an abnormal sandbox status.
    pub fn verdict(&self) -> Option<CaseStatus> {
        match self {
            SandboxStatus::ExitedNormally => None,
            SandboxStatus::TimeLimitExceeded => Some(CaseStatus::TLE),
            SandboxStatus::MemoryLimitExceeded => Some(CaseStatus::MLE),
            SandboxStatus::RuntimeError => Some(CaseStatus::RE),
            SandboxStatus::OutputLimitExceeded => Some(CaseStatus::OLE),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContainerOutput {
    pub status: SandboxStatus,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
    /// -1 when the runtime does not report it
    pub memory_kb: i64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ContainerError {
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
    #[error("failed to create container: {0}")]
    Create(String),
    #[error("container run failed: {0}")]
    Run(String),
}
