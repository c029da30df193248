use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Language {
    C,
    Cpp,
    Python,
}

impl Language {
    /// Key used to look up images and commands in the submission config.
    pub fn key(&self) -> &'static str {
        match self {
            Language::C => "c11",
            Language::Cpp => "cpp17",
            Language::Python => "python3",
        }
    }

    /// Numeric id understood by the sandbox binary.
    pub fn sandbox_id(&self) -> u8 {
        (*self).into()
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "c11" | "c" => Some(Language::C),
            "cpp17" | "cpp" => Some(Language::Cpp),
            "python3" | "py" => Some(Language::Python),
            _ => None,
        }
    }

    pub fn needs_compile(&self) -> bool {
        matches!(self, Language::C | Language::Cpp)
    }

    pub fn source_suffix(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Python => "py",
        }
    }
}

impl TryFrom<u8> for Language {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Language::C),
            1 => Ok(Language::Cpp),
            2 => Ok(Language::Python),
            other => Err(format!("unsupported language id {}", other)),
        }
    }
}

impl From<Language> for u8 {
    fn from(value: Language) -> Self {
        match value {
            Language::C => 0,
            Language::Cpp => 1,
            Language::Python => 2,
        }
    }
}

macro_rules! int_enum {
    ($name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(try_from = "u8", into = "u8")]
        pub enum $name {
            #[default]
            $($variant),+
        }

        impl TryFrom<u8> for $name {
            type Error = String;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(format!("invalid {} {}", stringify!($name), other)),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> Self {
                match value {
                    $($name::$variant => $value,)+
                }
            }
        }
    };
}

int_enum!(SubmissionMode { Code = 0, Zip = 1 });
int_enum!(ExecutionMode {
    General = 0,
    FunctionOnly = 1,
    Interactive = 2,
});
int_enum!(BuildStrategy {
    Compile = 0,
    MakeNormal = 1,
    MakeFunctionOnly = 2,
    MakeInteractive = 3,
});

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_score: u32,
    /// KB
    pub memory_limit: u64,
    /// ms
    pub time_limit: u64,
    pub case_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sidecar {
    pub image: String,
    pub name: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Contents of `meta.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub language: Language,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub submission_mode: SubmissionMode,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub build_strategy: BuildStrategy,
    #[serde(default)]
    pub asset_paths: HashMap<String, String>,
    #[serde(default)]
    pub teacher_first: bool,
    #[serde(default)]
    pub network_access_restriction: Option<serde_json::Value>,
    #[serde(default)]
    pub sidecars: Vec<Sidecar>,
}

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("failed to read meta.json: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed meta.json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("at least one task is required")]
    NoTasks,
    #[error("task {0} declares no cases")]
    EmptyTask(usize),
    #[error("sum of scores must be 100, got {0}")]
    ScoreSum(u64),
}

impl Meta {
    pub fn parse(raw: &str) -> Result<Self, MetaError> {
        let meta: Meta = serde_json::from_str(raw)?;
        meta.validate()?;
        Ok(meta)
    }

    pub fn validate(&self) -> Result<(), MetaError> {
        if self.tasks.is_empty() {
            return Err(MetaError::NoTasks);
        }
        if let Some(index) = self.tasks.iter().position(|t| t.case_count == 0) {
            return Err(MetaError::EmptyTask(index));
        }
        let total: u64 = self.tasks.iter().map(|t| u64::from(t.task_score)).sum();
        if total != 100 {
            return Err(MetaError::ScoreSum(total));
        }
        Ok(())
    }

    /// Every declared case, task-major.
    pub fn case_keys(&self) -> impl Iterator<Item = CaseKey> + '_ {
        self.tasks.iter().enumerate().flat_map(|(task, t)| {
            (0..t.case_count).map(move |case| CaseKey::new(task, case))
        })
    }

    pub fn case_total(&self) -> usize {
        self.tasks.iter().map(|t| t.case_count).sum()
    }
}

/// `(task, case)` pair, rendered as `{task:02}{case:02}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CaseKey {
    pub task: usize,
    pub case: usize,
}

impl CaseKey {
    pub fn new(task: usize, case: usize) -> Self {
        Self { task, case }
    }
}

impl fmt::Display for CaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:02}", self.task, self.case)
    }
}

impl FromStr for CaseKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 4 || !s.is_char_boundary(2) {
            return Err(format!("invalid case key {:?}", s));
        }
        let task = s[..2].parse().map_err(|_| format!("invalid task in {:?}", s))?;
        let case = s[2..].parse().map_err(|_| format!("invalid case in {:?}", s))?;
        Ok(Self { task, case })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseStatus {
    AC,
    WA,
    TLE,
    MLE,
    RE,
    OLE,
    CE,
    JE,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::AC => "AC",
            CaseStatus::WA => "WA",
            CaseStatus::TLE => "TLE",
            CaseStatus::MLE => "MLE",
            CaseStatus::RE => "RE",
            CaseStatus::OLE => "OLE",
            CaseStatus::CE => "CE",
            CaseStatus::JE => "JE",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AC" => Ok(CaseStatus::AC),
            "WA" => Ok(CaseStatus::WA),
            "TLE" => Ok(CaseStatus::TLE),
            "MLE" => Ok(CaseStatus::MLE),
            "RE" => Ok(CaseStatus::RE),
            "OLE" => Ok(CaseStatus::OLE),
            "CE" => Ok(CaseStatus::CE),
            "JE" => Ok(CaseStatus::JE),
            other => Err(format!("unknown status {:?}", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    /// ms, -1 when unknown
    pub exec_time: i64,
    /// KB, -1 when unknown
    pub memory_usage: i64,
    pub status: CaseStatus,
}

impl CaseResult {
    /// Result used when a case never reached a container.
    pub fn failure(status: CaseStatus, message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: 1,
            exec_time: -1,
            memory_usage: -1,
            status,
        }
    }

    pub fn compile_error(message: impl Into<String>) -> Self {
        Self::failure(CaseStatus::CE, message)
    }

    pub fn judge_error(message: impl Into<String>) -> Self {
        Self::failure(CaseStatus::JE, message)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Job {
    Build { submission_id: String },
    Compile { submission_id: String },
    Execute { submission_id: String, key: CaseKey },
}

impl Job {
    pub fn submission_id(&self) -> &str {
        match self {
            Job::Build { submission_id }
            | Job::Compile { submission_id }
            | Job::Execute { submission_id, .. } => submission_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with_scores(scores: &[u32]) -> String {
        let tasks: Vec<_> = scores
            .iter()
            .map(|s| {
                format!(
                    r#"{{"taskScore": {}, "memoryLimit": 65536, "timeLimit": 1000, "caseCount": 2}}"#,
                    s
                )
            })
            .collect();
        format!(r#"{{"language": 1, "tasks": [{}]}}"#, tasks.join(","))
    }

    #[test]
    fn test_scores_summing_to_100_are_accepted() {
        let meta = Meta::parse(&meta_with_scores(&[60, 40])).unwrap();
        assert_eq!(meta.tasks.len(), 2);
        assert_eq!(meta.language, Language::Cpp);
        assert_eq!(meta.build_strategy, BuildStrategy::Compile);
        assert_eq!(meta.execution_mode, ExecutionMode::General);
    }

    #[test]
    fn test_scores_not_summing_to_100_are_rejected() {
        let err = Meta::parse(&meta_with_scores(&[60, 30])).unwrap_err();
        assert!(matches!(err, MetaError::ScoreSum(90)));
    }

    #[test]
    fn test_empty_tasks_rejected() {
        let err = Meta::parse(r#"{"language": 0, "tasks": []}"#).unwrap_err();
        assert!(matches!(err, MetaError::NoTasks));
    }

    #[test]
    fn test_task_without_cases_rejected() {
        let err = Meta::parse(
            r#"{"language": 2, "tasks": [
                {"taskScore": 50, "memoryLimit": 1, "timeLimit": 1, "caseCount": 2},
                {"taskScore": 50, "memoryLimit": 1, "timeLimit": 1, "caseCount": 0}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, MetaError::EmptyTask(1)));
    }

    #[test]
    fn test_huge_scores_do_not_overflow() {
        let max = u32::MAX;
        let err = Meta::parse(&meta_with_scores(&[max, max])).unwrap_err();
        assert!(matches!(err, MetaError::ScoreSum(total) if total == 2 * u64::from(max)));
    }

    #[test]
    fn test_unknown_enum_value_rejected() {
        let err = Meta::parse(
            r#"{"language": 7, "tasks": [{"taskScore": 100, "memoryLimit": 1, "timeLimit": 1, "caseCount": 1}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, MetaError::Parse(_)));
    }

    #[test]
    fn test_case_keys_cover_every_declared_case() {
        let meta = Meta::parse(&meta_with_scores(&[50, 25, 25])).unwrap();
        let keys: Vec<String> = meta.case_keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["0000", "0001", "0100", "0101", "0200", "0201"]);
        assert_eq!(meta.case_total(), 6);
    }

    #[test]
    fn test_case_key_parse() {
        assert_eq!("0312".parse::<CaseKey>().unwrap(), CaseKey::new(3, 12));
        assert!("312".parse::<CaseKey>().is_err());
        assert!("ab12".parse::<CaseKey>().is_err());
    }

    #[test]
    fn test_case_result_wire_names() {
        let result = CaseResult {
            stdout: "1 2\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
            exec_time: 12,
            memory_usage: 2048,
            status: CaseStatus::WA,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["exitCode"], 0);
        assert_eq!(value["execTime"], 12);
        assert_eq!(value["memoryUsage"], 2048);
        assert_eq!(value["status"], "WA");
    }
}
