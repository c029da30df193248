use std::sync::Arc;

use crate::{
    config::SubmissionConfig,
    core::{
        domain::{CaseKey, CaseResult, Language, Meta},
        traits::executor::{ContainerExecutor, ContainerLimits, ContainerSpec, Mount},
    },
    storage::SubmissionPaths,
};

use super::{channel::PipeMode, orchestrator::InteractiveReport};

/// Head room on top of the case limit for setup and the orchestrator's own deadline.
const CONTAINER_SLACK_MS: u64 = 10_000;

/// Forwarded into the container so the orchestrator keeps its channel directory.
pub const KEEP_TMP_ENV: &str = "KEEP_INTERACTIVE_TMP";

/// Runs one interactive case by launching the orchestrator binary inside a
/// container that sees the student tree, the teacher tree and the case input.
#[derive(Debug, Clone)]
pub struct InteractiveRunner {
    executor: Arc<dyn ContainerExecutor>,
    config: Arc<SubmissionConfig>,
    pipe_mode: PipeMode,
}

impl InteractiveRunner {
    pub fn new(executor: Arc<dyn ContainerExecutor>, config: Arc<SubmissionConfig>) -> Self {
        Self {
            executor,
            config,
            pipe_mode: PipeMode::Auto,
        }
    }

    fn command(&self, meta: &Meta, key: CaseKey, teacher_lang: Language) -> Vec<String> {
        let task = &meta.tasks[key.task];
        let mut command = self.config.orchestrator.clone();
        command.extend(
            [
                "--workdir",
                "/workspace",
                "--teacher-dir",
                "/teacher",
                "--student-dir",
                "/src",
                "--student-lang",
                meta.language.key(),
                "--teacher-lang",
                teacher_lang.key(),
            ]
            .map(String::from),
        );
        command.extend([
            "--time-limit".to_string(),
            task.time_limit.to_string(),
            "--mem-limit".to_string(),
            task.memory_limit.to_string(),
            "--pipe-mode".to_string(),
            self.pipe_mode.to_string(),
            "--case-path".to_string(),
            format!("/workspace/testcase/{}.in", key),
        ]);
        if meta.teacher_first {
            command.push("--teacher-first".to_string());
        }
        command
    }

    #[tracing::instrument(skip(self, meta, paths), fields(case = %key))]
    pub async fn run(&self, meta: &Meta, paths: &SubmissionPaths, key: CaseKey) -> CaseResult {
        let Some(task) = meta.tasks.get(key.task) else {
            return CaseResult::judge_error(format!("case {} has no task", key));
        };
        let teacher_lang = meta
            .asset_paths
            .get("teacherLang")
            .and_then(|k| Language::from_key(k))
            .unwrap_or(meta.language);
        let Some(image) = self.config.interactive_image(meta.language) else {
            return CaseResult::judge_error("no interactive image configured");
        };

        let env = std::env::var(KEEP_TMP_ENV)
            .map(|value| vec![(KEEP_TMP_ENV.to_string(), value)])
            .unwrap_or_default();
        let spec = ContainerSpec {
            image,
            command: self.command(meta, key, teacher_lang),
            working_dir: "/workspace".to_string(),
            mounts: vec![
                Mount::rw(paths.host_src(), "/src"),
                Mount::rw(paths.host_teacher(), "/teacher"),
                Mount::ro(paths.host_testcase(), "/workspace/testcase"),
            ],
            stdin: None,
            limits: ContainerLimits {
                time_ms: Some(task.time_limit.saturating_mul(2) + CONTAINER_SLACK_MS),
                memory_kb: Some(task.memory_limit),
                output_bytes: None,
            },
            network_mode: "none".to_string(),
            env,
        };

        let output = match self.executor.run(&spec).await {
            Ok(output) => output,
            Err(e) => return CaseResult::judge_error(format!("interactive runner failed: {}", e)),
        };
        let last_line = output.stdout.lines().rev().find(|l| !l.trim().is_empty());
        match last_line.map(serde_json::from_str::<InteractiveReport>) {
            Some(Ok(report)) => report.into_case_result(),
            _ => {
                tracing::error!(exit_code = output.exit_code, "unparsable orchestrator output");
                CaseResult {
                    exit_code: output.exit_code,
                    ..CaseResult::judge_error(format!(
                        "interactive runner failed: {}{}",
                        output.stdout, output.stderr
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{
            domain::{CaseStatus, ExecutionMode},
            traits::executor::{ContainerError, ContainerOutput, MockContainerExecutor, SandboxStatus},
        },
        storage::SubmissionStore,
    };

    fn meta() -> Meta {
        let meta = Meta::parse(
            r#"{"language": 0, "executionMode": 2, "buildStrategy": 3, "teacherFirst": true,
                "assetPaths": {"teacherLang": "py"},
                "tasks": [{"taskScore": 100, "memoryLimit": 65536, "timeLimit": 1000, "caseCount": 2}]}"#,
        )
        .unwrap();
        assert_eq!(meta.execution_mode, ExecutionMode::Interactive);
        meta
    }

    fn paths() -> SubmissionPaths {
        SubmissionStore::new("/local", "/host", "/bk").paths("sub")
    }

    fn stdout(stdout: &str) -> ContainerOutput {
        ContainerOutput {
            status: SandboxStatus::ExitedNormally,
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration_ms: 100,
            memory_kb: -1,
        }
    }

    fn runner(executor: MockContainerExecutor) -> InteractiveRunner {
        InteractiveRunner::new(Arc::new(executor), Arc::new(SubmissionConfig::default()))
    }

    #[tokio::test]
    async fn test_last_stdout_line_is_the_verdict() {
        let mut executor = MockContainerExecutor::new();
        executor
            .expect_run()
            .withf(|spec| {
                spec.network_mode == "none"
                    && spec.mounts.iter().any(|m| m.container == "/workspace/testcase" && m.read_only)
                    && spec.mounts.iter().any(|m| m.container == "/teacher" && !m.read_only)
                    && spec.command.contains(&"--teacher-first".to_string())
                    && spec.command.contains(&"/workspace/testcase/0001.in".to_string())
                    && spec.command.windows(2).any(|w| w[0] == "--teacher-lang" && w[1] == "python3")
            })
            .return_const(Ok(stdout(
                "sandbox noise\n{\"Status\":\"WA\",\"Stdout\":\"\",\"Stderr\":\"wrong\",\"Duration\":40,\"MemUsage\":512,\"DockerExitCode\":0,\"pipeMode\":\"devfd\"}\n",
            )));

        let result = runner(executor).run(&meta(), &paths(), CaseKey::new(0, 1)).await;
        assert_eq!(result.status, CaseStatus::WA);
        assert_eq!(result.stderr, "wrong");
        assert_eq!(result.exec_time, 40);
        assert_eq!(result.memory_usage, 512);
    }

    #[tokio::test]
    async fn test_garbage_output_is_judge_error() {
        let mut executor = MockContainerExecutor::new();
        executor
            .expect_run()
            .return_const(Ok(stdout("Traceback (most recent call last):\n")));
        let result = runner(executor).run(&meta(), &paths(), CaseKey::new(0, 0)).await;
        assert_eq!(result.status, CaseStatus::JE);
        assert!(result.stderr.contains("Traceback"));
    }

    #[tokio::test]
    async fn test_container_failure_is_judge_error() {
        let mut executor = MockContainerExecutor::new();
        executor
            .expect_run()
            .return_const(Err(ContainerError::Create("no such image".into())));
        let result = runner(executor).run(&meta(), &paths(), CaseKey::new(0, 0)).await;
        assert_eq!(result.status, CaseStatus::JE);
    }
}
