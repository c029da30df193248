use std::time::Duration;

use bollard::{
    API_DEFAULT_VERSION, Docker,
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
        LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
    },
    models::HostConfig,
};
use futures::StreamExt;
use tokio::time::Instant;
use uuid::Uuid;

use crate::core::traits::executor::{
    ContainerError, ContainerExecutor, ContainerOutput, ContainerSpec, SandboxStatus,
};

const CONNECT_TIMEOUT_SECS: u64 = 120;

#[derive(Clone, Debug)]
pub struct DockerExecutor {
    docker: Docker,
}

impl DockerExecutor {
    /// Connects to `url` (`unix://` or `tcp://`/`http://`), or to the local
    /// defaults when none is given.
    pub fn connect(url: Option<&str>) -> Result<Self, ContainerError> {
        let docker = match url {
            None => Docker::connect_with_local_defaults(),
            Some(url) if url.starts_with("unix://") => {
                Docker::connect_with_unix(url, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(url) => Docker::connect_with_http(url, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION),
        }
        .map_err(|e| ContainerError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    async fn wait(&self, id: &str) -> Result<i64, ContainerError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(ContainerError::Run(e.to_string())),
            None => Err(ContainerError::Run("wait stream ended without a status".into())),
        }
    }

    async fn logs(&self, id: &str, limit: Option<u64>) -> Result<Logs, ContainerError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };
        let mut logs = Logs::default();
        let mut stream = self.docker.logs(id, Some(options));
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(|e| ContainerError::Run(e.to_string()))? {
                LogOutput::StdOut { message } => logs.stdout.extend_from_slice(&message),
                LogOutput::StdErr { message } => logs.stderr.extend_from_slice(&message),
                _ => {}
            }
            if limit.is_some_and(|limit| logs.len() > limit) {
                logs.truncated = true;
                break;
            }
        }
        Ok(logs)
    }

    async fn oom_killed(&self, id: &str) -> bool {
        match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => info.state.and_then(|s| s.oom_killed).unwrap_or(false),
            Err(e) => {
                tracing::warn!(container = id, "inspect failed: {}", e);
                false
            }
        }
    }

    async fn remove(&self, id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(id, Some(options)).await {
            tracing::warn!(container = id, "failed to remove container: {}", e);
        }
    }

    async fn supervise(&self, id: &str, spec: &ContainerSpec) -> Result<ContainerOutput, ContainerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ContainerError::Run(e.to_string()))?;
        let started = Instant::now();

        let waited = match spec.limits.time_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), self.wait(id))
                .await
                .ok(),
            None => Some(self.wait(id).await),
        };
        let duration_ms = started.elapsed().as_millis() as i64;
        let (exit_code, timed_out) = match waited {
            Some(code) => (code?, false),
            None => {
                tracing::debug!(container = id, "time limit exceeded, killing");
                if let Err(e) = self
                    .docker
                    .kill_container(id, None::<KillContainerOptions<String>>)
                    .await
                {
                    tracing::warn!(container = id, "failed to kill container: {}", e);
                }
                (-1, true)
            }
        };

        let logs = self.logs(id, spec.limits.output_bytes).await?;
        let oom = !timed_out && self.oom_killed(id).await;
        Ok(ContainerOutput {
            status: classify(timed_out, oom, logs.truncated, exit_code),
            exit_code,
            stdout: String::from_utf8_lossy(&logs.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&logs.stderr).into_owned(),
            duration_ms,
            memory_kb: -1,
        })
    }
}

#[async_trait::async_trait]
impl ContainerExecutor for DockerExecutor {
    #[tracing::instrument(skip(self, spec), fields(image = %spec.image))]
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerOutput, ContainerError> {
        let name = format!("judge-{}", Uuid::new_v4());
        let options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };
        let id = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| ContainerError::Create(e.to_string()))?
            .id;
        tracing::debug!(container = %id, "container created");

        let result = self.supervise(&id, spec).await;
        self.remove(&id).await;
        result
    }
}

#[derive(Debug, Default)]
struct Logs {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    truncated: bool,
}

impl Logs {
    fn len(&self) -> u64 {
        (self.stdout.len() + self.stderr.len()) as u64
    }
}

fn classify(timed_out: bool, oom: bool, truncated: bool, exit_code: i64) -> SandboxStatus {
    if timed_out {
        SandboxStatus::TimeLimitExceeded
    } else if oom {
        SandboxStatus::MemoryLimitExceeded
    } else if truncated {
        SandboxStatus::OutputLimitExceeded
    } else if exit_code != 0 {
        SandboxStatus::RuntimeError
    } else {
        SandboxStatus::ExitedNormally
    }
}

/// Wraps the command so the process reads `stdin` from a file inside the container.
fn command_with_stdin(command: &[String], stdin: Option<&str>) -> Vec<String> {
    match stdin {
        None => command.to_vec(),
        Some(path) => {
            let mut wrapped = vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                r#"exec "$@" < "$0""#.to_string(),
                path.to_string(),
            ];
            wrapped.extend(command.iter().cloned());
            wrapped
        }
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let binds = spec
        .mounts
        .iter()
        .map(|m| {
            let mode = if m.read_only { "ro" } else { "rw" };
            format!("{}:{}:{}", m.host.display(), m.container, mode)
        })
        .collect();
    let memory = spec.limits.memory_kb.map(|kb| (kb * 1024) as i64);
    let env = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    Config {
        image: Some(spec.image.clone()),
        cmd: Some(command_with_stdin(&spec.command, spec.stdin.as_deref())),
        working_dir: Some(spec.working_dir.clone()).filter(|d| !d.is_empty()),
        env: Some(env),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        host_config: Some(HostConfig {
            binds: Some(binds),
            memory,
            memory_swap: memory,
            network_mode: Some(spec.network_mode.clone()).filter(|m| !m.is_empty()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
