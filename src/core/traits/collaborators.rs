//! Services the scheduler consumes but does not implement itself.

use std::{collections::BTreeMap, path::Path, path::PathBuf};

use serde::Serialize;

use crate::core::domain::{CaseKey, CaseResult, CaseStatus, Meta};

#[derive(Clone, Debug, Default)]
pub struct AnalysisOutcome {
    pub passed: bool,
    /// Forwarded to the backend as `staticAnalysis`.
    pub payload: Option<serde_json::Value>,
    /// Per-case CE results prepared by the analyzer when the gate fails.
    pub ce_results: Option<BTreeMap<CaseKey, CaseResult>>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("static analysis failed: {0}")]
pub struct AnalysisError(pub String);

#[mockall::automock]
#[async_trait::async_trait]
pub trait StaticAnalyzer: std::fmt::Debug + Send + Sync {
    async fn analyze(
        &self,
        submission_id: &str,
        problem_id: i64,
        meta: &Meta,
        submission_dir: &Path,
    ) -> Result<AnalysisOutcome, AnalysisError>;
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("network setup failed: {0}")]
pub struct NetworkError(pub String);

#[mockall::automock]
#[async_trait::async_trait]
pub trait NetworkProvisioner: std::fmt::Debug + Send + Sync {
    /// Returns the docker network mode every case container must join.
    async fn provision(&self, submission_id: &str, meta: &Meta) -> Result<String, NetworkError>;

    async fn teardown(&self, submission_id: &str);
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AssetError {
    #[error("asset `{asset}` of problem {problem_id} not found")]
    NotFound { problem_id: i64, asset: String },
    #[error("failed to fetch asset: {0}")]
    Fetch(String),
}

#[mockall::automock]
#[async_trait::async_trait]
pub trait AssetProvider: std::fmt::Debug + Send + Sync {
    /// Local path of a cached problem asset (file or directory).
    async fn fetch(&self, problem_id: i64, asset: &str) -> Result<PathBuf, AssetError>;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReport {
    pub tasks: Vec<Vec<CaseResult>>,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_analysis: Option<serde_json::Value>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("backend rejected report with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[mockall::automock]
#[async_trait::async_trait]
pub trait Backend: std::fmt::Debug + Send + Sync {
    async fn complete(
        &self,
        submission_id: &str,
        report: &SubmissionReport,
    ) -> Result<(), BackendError>;
}

#[derive(Clone, Debug)]
pub struct CheckRequest {
    pub submission_id: String,
    pub problem_id: i64,
    pub key: CaseKey,
    pub input_path: PathBuf,
    pub answer_path: PathBuf,
    pub output: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckVerdict {
    pub status: CaseStatus,
    pub message: String,
}

#[mockall::automock]
#[async_trait::async_trait]
pub trait OutputChecker: std::fmt::Debug + Send + Sync {
    async fn check(&self, request: &CheckRequest) -> Result<CheckVerdict, String>;
}
