use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::load_json_or_default;

pub const DEFAULT_INTERACTIVE_CONFIG: &str = "/app/.config/interactive.json";

/// Settings of the in-container orchestrator.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InteractiveConfig {
    pub output_limit_bytes: u64,
    pub max_teacher_new_files: usize,
    pub teacher_uid: u32,
    pub student_uid: u32,
    pub sandbox_gid: u32,
    pub student_allow_read: bool,
    pub student_allow_write: bool,
    pub sandbox_binary: String,
    pub process_limit: u32,
    pub deadline_slack_ms: u64,
    pub start_delay_ms: u64,
}

impl Default for InteractiveConfig {
    fn default() -> Self {
        Self {
            output_limit_bytes: 64 * 1024 * 1024,
            max_teacher_new_files: 500,
            teacher_uid: 1450,
            student_uid: 1451,
            sandbox_gid: 1450,
            student_allow_read: false,
            student_allow_write: false,
            sandbox_binary: "sandbox_interactive".to_string(),
            process_limit: 10,
            deadline_slack_ms: 2000,
            start_delay_ms: 50,
        }
    }
}

impl InteractiveConfig {
    pub fn load(path: &Path) -> Self {
        load_json_or_default(path)
    }

    /// `INTERACTIVE_CONFIG` overrides the default location.
    pub fn from_env() -> Self {
        let path = std::env::var_os("INTERACTIVE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INTERACTIVE_CONFIG));
        Self::load(&path)
    }
}
