use std::sync::Arc;

use crate::{
    config::SubmissionConfig,
    core::{
        domain::{CaseKey, CaseResult, CaseStatus, ExecutionMode},
        pipeline::{LOG_PREVIEW_CHARS, checking::LineComparator, shorten},
        registry::SubmissionState,
        traits::{
            collaborators::{CheckRequest, OutputChecker},
            executor::{ContainerExecutor, ContainerLimits, ContainerSpec, Mount},
        },
    },
    interactive::InteractiveRunner,
    storage::SubmissionPaths,
};

/// Runs a single case of a ready submission and judges its output.
#[derive(Debug, Clone)]
pub struct CaseRunner {
    executor: Arc<dyn ContainerExecutor>,
    config: Arc<SubmissionConfig>,
    checker: Arc<dyn OutputChecker>,
    custom_checker: Option<Arc<dyn OutputChecker>>,
    interactive: InteractiveRunner,
}

impl CaseRunner {
    pub fn new(executor: Arc<dyn ContainerExecutor>, config: Arc<SubmissionConfig>) -> Self {
        Self {
            interactive: InteractiveRunner::new(executor.clone(), config.clone()),
            executor,
            config,
            checker: Arc::new(LineComparator),
            custom_checker: None,
        }
    }

    /// Checker used for problems that ship a `checker` asset.
    pub fn with_custom_checker(mut self, checker: Arc<dyn OutputChecker>) -> Self {
        self.custom_checker = Some(checker);
        self
    }

    #[tracing::instrument(skip(self, state, paths), fields(submission_id = %state.id, case = %key))]
    pub async fn run(&self, state: &SubmissionState, paths: &SubmissionPaths, key: CaseKey) -> CaseResult {
        let meta = &state.meta;
        if meta.execution_mode == ExecutionMode::Interactive {
            return self.interactive.run(meta, paths, key).await;
        }

        let Some(task) = meta.tasks.get(key.task) else {
            return CaseResult::judge_error(format!("case {} has no task", key));
        };
        let Some(language) = self.config.language(meta.language.key()) else {
            return CaseResult::judge_error(format!("language {} is not configured", meta.language.key()));
        };

        let spec = ContainerSpec {
            image: language.image.clone(),
            command: language.run.clone(),
            working_dir: "/src".to_string(),
            mounts: vec![
                Mount::ro(paths.host_src(), "/src"),
                Mount::ro(paths.host_testcase(), "/testcase"),
            ],
            stdin: Some(format!("/testcase/{}.in", key)),
            limits: ContainerLimits {
                time_ms: Some(task.time_limit),
                memory_kb: Some(task.memory_limit),
                output_bytes: Some(self.config.output_limit_bytes),
            },
            network_mode: state.network_mode(),
            env: Vec::new(),
        };

        tracing::debug!("Start running");
        let output = match self.executor.run(&spec).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("Internal error while running: {}", e);
                return CaseResult::judge_error(e.to_string());
            }
        };
        tracing::debug!(
            status = ?output.status,
            time = output.duration_ms,
            stdout = %shorten(&output.stdout, LOG_PREVIEW_CHARS),
            stderr = %shorten(&output.stderr, LOG_PREVIEW_CHARS),
            "Run finished"
        );

        let mut result = CaseResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            exec_time: output.duration_ms,
            memory_usage: output.memory_kb,
            status: CaseStatus::JE,
        };
        if let Some(status) = output.status.verdict() {
            result.status = status;
            return result;
        }

        let checker = if meta.asset_paths.contains_key("checker") {
            match &self.custom_checker {
                Some(checker) => checker,
                None => {
                    result.stderr = "custom checker requested but not configured".to_string();
                    return result;
                }
            }
        } else {
            &self.checker
        };
        let testcase = paths.testcase();
        let request = CheckRequest {
            submission_id: state.id.clone(),
            problem_id: state.problem_id,
            key,
            input_path: testcase.join(format!("{}.in", key)),
            answer_path: testcase.join(format!("{}.out", key)),
            output: result.stdout.clone(),
        };
        match checker.check(&request).await {
            Ok(verdict) => {
                if !verdict.message.is_empty() {
                    tracing::debug!(message = %verdict.message, "checker message");
                }
                result.status = verdict.status;
            }
            Err(e) => {
                tracing::error!("checker failed: {}", e);
                result.stderr = e;
            }
        }
        result
    }
}
