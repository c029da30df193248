use std::sync::Arc;

use crate::{
    config::SubmissionConfig,
    core::{
        domain::{CaseResult, CaseStatus, Language},
        pipeline::{LOG_PREVIEW_CHARS, shorten},
        traits::executor::{ContainerExecutor, ContainerLimits, ContainerSpec, Mount, SandboxStatus},
    },
    storage::SubmissionPaths,
};

/// Runs the compiler of a compiled language once per submission.
#[derive(Debug, Clone)]
pub struct CompileStage {
    executor: Arc<dyn ContainerExecutor>,
    config: Arc<SubmissionConfig>,
}

impl CompileStage {
    pub fn new(executor: Arc<dyn ContainerExecutor>, config: Arc<SubmissionConfig>) -> Self {
        Self { executor, config }
    }

    /// AC when an executable was produced, CE with the compiler output
    /// otherwise, JE when the container itself could not run.
    #[tracing::instrument(skip(self, paths))]
    pub async fn compile(&self, paths: &SubmissionPaths, language: Language) -> CaseResult {
        let Some(spec) = self.config.language(language.key()) else {
            return CaseResult::judge_error(format!("language {} is not configured", language.key()));
        };
        let Some(command) = spec.compile.clone() else {
            return CaseResult::judge_error(format!("language {} is not compiled", language.key()));
        };

        let container = ContainerSpec {
            image: spec.image.clone(),
            command,
            working_dir: "/src".to_string(),
            mounts: vec![Mount::rw(paths.host_src(), "/src")],
            limits: ContainerLimits {
                time_ms: Some(self.config.compile_time_limit_ms),
                memory_kb: Some(self.config.compile_memory_limit_kb),
                output_bytes: Some(self.config.output_limit_bytes),
            },
            network_mode: "none".to_string(),
            ..Default::default()
        };

        tracing::debug!("Start compiling");
        let output = match self.executor.run(&container).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("Internal error during compilation: {}", e);
                return CaseResult::judge_error(e.to_string());
            }
        };
        tracing::debug!(
            status = ?output.status,
            exit_code = output.exit_code,
            stderr = %shorten(&output.stderr, LOG_PREVIEW_CHARS),
            "Compilation finished"
        );

        let status = if output.status == SandboxStatus::ExitedNormally && output.exit_code == 0 {
            CaseStatus::AC
        } else {
            CaseStatus::CE
        };
        CaseResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            exec_time: output.duration_ms,
            memory_usage: output.memory_kb,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::traits::executor::{ContainerError, ContainerOutput, MockContainerExecutor},
        storage::SubmissionStore,
    };

    fn paths() -> SubmissionPaths {
        SubmissionStore::new("/local", "/host", "/bk").paths("sub")
    }

    fn stage(executor: MockContainerExecutor) -> CompileStage {
        CompileStage::new(Arc::new(executor), Arc::new(SubmissionConfig::default()))
    }

    fn output(status: SandboxStatus, exit_code: i64, stderr: &str) -> ContainerOutput {
        ContainerOutput {
            status,
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
            duration_ms: 300,
            memory_kb: 10240,
        }
    }

    #[tokio::test]
    async fn test_successful_compilation() {
        let mut executor = MockContainerExecutor::new();
        executor
            .expect_run()
            .withf(|spec| {
                spec.working_dir == "/src"
                    && spec.mounts[0].host == std::path::Path::new("/host/sub/src")
                    && spec.limits.time_ms == Some(20_000)
                    && spec.network_mode == "none"
            })
            .times(1)
            .return_const(Ok(output(SandboxStatus::ExitedNormally, 0, "")));

        let result = stage(executor).compile(&paths(), Language::Cpp).await;
        assert_eq!(result.status, CaseStatus::AC);
        assert_eq!(result.exec_time, 300);
    }

    #[tokio::test]
    async fn test_compilation_failed() {
        let mut executor = MockContainerExecutor::new();
        executor
            .expect_run()
            .return_const(Ok(output(SandboxStatus::ExitedNormally, 1, "syntax error")));

        let result = stage(executor).compile(&paths(), Language::C).await;
        assert_eq!(result.status, CaseStatus::CE);
        assert_eq!(result.stderr, "syntax error");
    }

    #[tokio::test]
    async fn test_compilation_limits_exceeded() {
        for status in [SandboxStatus::TimeLimitExceeded, SandboxStatus::MemoryLimitExceeded] {
            let mut executor = MockContainerExecutor::new();
            executor.expect_run().return_const(Ok(output(status, 137, "")));
            let result = stage(executor).compile(&paths(), Language::C).await;
            assert_eq!(result.status, CaseStatus::CE);
        }
    }

    #[tokio::test]
    async fn test_compilation_internal_error() {
        let mut executor = MockContainerExecutor::new();
        executor
            .expect_run()
            .return_const(Err(ContainerError::Unavailable("Tux is sad and won't work :(".into())));

        let result = stage(executor).compile(&paths(), Language::Cpp).await;
        assert_eq!(result.status, CaseStatus::JE);
    }

    #[tokio::test]
    async fn test_interpreted_language_is_not_compiled() {
        let result = stage(MockContainerExecutor::new())
            .compile(&paths(), Language::Python)
            .await;
        assert_eq!(result.status, CaseStatus::JE);
    }
}
