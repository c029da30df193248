use std::{collections::HashMap, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, de::DeserializeOwned};

use crate::core::domain::Language;

pub const DEFAULT_DISPATCHER_CONFIG: &str = ".config/dispatcher.json";
pub const DEFAULT_SUBMISSION_CONFIG: &str = ".config/submission.json";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    #[serde(rename = "QUEUE_SIZE")]
    pub queue_size: usize,
    #[serde(rename = "MAX_CONTAINER_NUMBER")]
    pub max_container_number: usize,
    #[serde(rename = "submissionTimeoutSecs")]
    pub submission_timeout_secs: u64,
    #[serde(rename = "pollIntervalMs")]
    pub poll_interval_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_size: 16,
            max_container_number: 8,
            submission_timeout_secs: 300,
            poll_interval_ms: 100,
        }
    }
}

impl DispatcherConfig {
    pub fn submission_timeout(&self) -> Duration {
        Duration::from_secs(self.submission_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct LanguageSpec {
    pub image: String,
    /// Run inside `/src`; absent for interpreted languages.
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubmissionConfig {
    /// Submission root as seen by the docker daemon.
    pub working_dir: PathBuf,
    pub docker_url: Option<String>,
    pub languages: HashMap<String, LanguageSpec>,
    pub interactive_image: Option<String>,
    pub orchestrator: Vec<String>,
    pub compile_time_limit_ms: u64,
    pub compile_memory_limit_kb: u64,
    pub output_limit_bytes: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        let languages = [
            (
                Language::C,
                LanguageSpec {
                    image: "noj-c-cpp".to_string(),
                    compile: Some(shell(
                        "gcc -DONLINE_JUDGE -O2 -w -fmax-errors=3 -std=c11 main.c -lm -o main",
                    )),
                    run: vec!["./main".to_string()],
                },
            ),
            (
                Language::Cpp,
                LanguageSpec {
                    image: "noj-c-cpp".to_string(),
                    compile: Some(shell(
                        "g++ -DONLINE_JUDGE -O2 -w -fmax-errors=3 -std=c++17 main.cpp -lm -o main",
                    )),
                    run: vec!["./main".to_string()],
                },
            ),
            (
                Language::Python,
                LanguageSpec {
                    image: "noj-py3".to_string(),
                    compile: None,
                    run: vec!["python3".to_string(), "main.py".to_string()],
                },
            ),
        ]
        .into_iter()
        .map(|(lang, spec)| (lang.key().to_string(), spec))
        .collect();

        Self {
            working_dir: PathBuf::from("submissions"),
            docker_url: None,
            languages,
            interactive_image: None,
            orchestrator: vec!["/app/interactive-orchestrator".to_string()],
            compile_time_limit_ms: 20_000,
            compile_memory_limit_kb: 1_048_576,
            output_limit_bytes: 64 * 1024 * 1024,
        }
    }
}

fn shell(cmd: &str) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), cmd.to_string()]
}

impl SubmissionConfig {
    pub fn language(&self, key: &str) -> Option<&LanguageSpec> {
        self.languages.get(key)
    }

    pub fn interactive_image(&self, student: Language) -> Option<String> {
        self.interactive_image
            .clone()
            .or_else(|| self.language(student.key()).map(|l| l.image.clone()))
    }
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub api: String,
    pub token: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api: "http://web:8080".to_string(),
            token: "KoNoSandboxDa".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub submission_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub testdata_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            submission_dir: PathBuf::from("submissions"),
            backup_dir: PathBuf::from("submissions.bk"),
            testdata_root: PathBuf::from("sandbox-testdata"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Config {
    pub dispatcher: DispatcherConfig,
    pub submission: SubmissionConfig,
    pub backend: BackendConfig,
    pub storage: StorageConfig,
}

/// Environment variables taking precedence over the json files.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    queue_size: Option<usize>,
    max_container_number: Option<usize>,
    backend_api: Option<String>,
    sandbox_token: Option<String>,
    submission_dir: Option<PathBuf>,
    submission_backup_dir: Option<PathBuf>,
    submission_working_dir: Option<PathBuf>,
    testdata_root: Option<PathBuf>,
    docker_url: Option<String>,
    dispatcher_config: Option<PathBuf>,
    submission_config: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        let env = envy::from_env::<EnvOverrides>().unwrap_or_else(|e| {
            tracing::warn!("ignoring malformed environment overrides: {}", e);
            EnvOverrides::default()
        });
        let dispatcher_path = env
            .dispatcher_config
            .clone()
            .unwrap_or_else(|| DEFAULT_DISPATCHER_CONFIG.into());
        let submission_path = env
            .submission_config
            .clone()
            .unwrap_or_else(|| DEFAULT_SUBMISSION_CONFIG.into());

        let mut config = Config {
            dispatcher: load_json_or_default(&dispatcher_path),
            submission: load_json_or_default(&submission_path),
            ..Default::default()
        };
        config.apply(env);
        config
    }

    fn apply(&mut self, env: EnvOverrides) {
        if let Some(v) = env.queue_size {
            self.dispatcher.queue_size = v;
        }
        if let Some(v) = env.max_container_number {
            self.dispatcher.max_container_number = v;
        }
        if let Some(v) = env.backend_api {
            self.backend.api = v;
        }
        if let Some(v) = env.sandbox_token {
            self.backend.token = v;
        }
        if let Some(v) = env.submission_dir {
            self.storage.submission_dir = v;
        }
        if let Some(v) = env.submission_backup_dir {
            self.storage.backup_dir = v;
        }
        if let Some(v) = env.testdata_root {
            self.storage.testdata_root = v;
        }
        if let Some(v) = env.docker_url {
            self.submission.docker_url = Some(v);
        }
        match env.submission_working_dir {
            Some(v) => self.submission.working_dir = v,
            None if self.submission.working_dir == Path::new("submissions") => {
                self.submission.working_dir = self.storage.submission_dir.clone();
            }
            None => {}
        }
    }
}

/// Missing or malformed files yield the defaults.
pub fn load_json_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!("config {} not loaded: {}", path.display(), e);
            return T::default();
        }
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!("malformed config {}: {}", path.display(), e);
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_limits_are_independent() {
        let config: DispatcherConfig =
            serde_json::from_str(r#"{"QUEUE_SIZE": 64, "MAX_CONTAINER_NUMBER": 3}"#).unwrap();
        assert_eq!(config.queue_size, 64);
        assert_eq!(config.max_container_number, 3);
        assert_eq!(config.submission_timeout_secs, 300);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config: DispatcherConfig = load_json_or_default(Path::new("/nonexistent/dispatcher.json"));
        assert_eq!(config.queue_size, 16);
        assert_eq!(config.max_container_number, 8);
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = Config::default();
        config.apply(EnvOverrides {
            queue_size: Some(5),
            backend_api: Some("http://backend".to_string()),
            submission_dir: Some("/data/submissions".into()),
            ..Default::default()
        });
        assert_eq!(config.dispatcher.queue_size, 5);
        assert_eq!(config.dispatcher.max_container_number, 8);
        assert_eq!(config.backend.api, "http://backend");
        assert_eq!(config.submission.working_dir, PathBuf::from("/data/submissions"));
    }

    #[test]
    fn test_default_languages() {
        let config = SubmissionConfig::default();
        assert!(config.language("c11").unwrap().compile.is_some());
        assert!(config.language("python3").unwrap().compile.is_none());
        assert_eq!(config.interactive_image(Language::Python).unwrap(), "noj-py3");
    }
}
