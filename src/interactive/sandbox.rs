use std::path::Path;

use crate::core::domain::{CaseStatus, Language};

/// Parsed result file written by the sandbox binary.
#[derive(Clone, Debug, PartialEq)]
pub struct SandboxReport {
    /// AC for a normal exit.
    pub status: CaseStatus,
    pub exit_code: i64,
    pub time_ms: i64,
    pub memory_kb: i64,
    pub message: String,
    pub raw: String,
}

impl SandboxReport {
    fn missing(message: &str, raw: String) -> Self {
        Self {
            status: CaseStatus::CE,
            exit_code: -1,
            time_ms: -1,
            memory_kb: -1,
            message: message.to_string(),
            raw,
        }
    }

    pub fn parse(raw: &str) -> Self {
        let lines: Vec<&str> = raw.lines().collect();
        let raw = lines.join("\n");
        let Some(status_line) = lines.first() else {
            return Self::missing("empty result file", raw);
        };
        let status = match status_line.trim() {
            "Exited Normally" => CaseStatus::AC,
            "TLE" => CaseStatus::TLE,
            "MLE" => CaseStatus::MLE,
            "RE" => CaseStatus::RE,
            "OLE" => CaseStatus::OLE,
            _ => CaseStatus::CE,
        };
        let exit_info = lines.get(1).map(|l| l.trim()).unwrap_or_default();
        let number = |idx: usize| -> i64 {
            lines
                .get(idx)
                .and_then(|l| l.trim().parse().ok())
                .unwrap_or(-1)
        };
        let exit_code: i64 = exit_info
            .split_once("WEXITSTATUS() = ")
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .and_then(|n| n.parse().ok())
            .unwrap_or(-1);

        Self {
            status,
            exit_code,
            time_ms: number(2),
            memory_kb: number(3),
            message: exit_info.to_string(),
            raw,
        }
    }

    pub fn read(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::parse(&raw),
            Err(_) => Self::missing("result file missing", String::new()),
        }
    }

    pub fn exited_normally(&self) -> bool {
        self.status == CaseStatus::AC
    }
}

/// Verdict file the teacher writes: `STATUS: AC|WA` and `MESSAGE: ...`.
pub fn parse_check_result(raw: &str) -> Result<(CaseStatus, String), String> {
    let mut status = None;
    let mut message = String::new();
    for line in raw.lines() {
        if let Some(value) = line.strip_prefix("STATUS:") {
            status = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("MESSAGE:") {
            message = value.trim().to_string();
        }
    }
    match status.as_deref() {
        Some("AC") => Ok((CaseStatus::AC, message)),
        Some("WA") => Ok((CaseStatus::WA, message)),
        _ => Err("Invalid Check_Result STATUS".to_string()),
    }
}

pub fn read_check_result(path: &Path) -> Result<(CaseStatus, String), String> {
    let raw = std::fs::read_to_string(path).map_err(|_| "Check_Result not found".to_string())?;
    parse_check_result(&raw)
}

/// One sandboxed process invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct SandboxInvocation {
    pub language: Language,
    pub stdin: String,
    pub stdout: String,
    pub stderr: String,
    pub time_ms: u64,
    pub memory_kb: u64,
    pub output_limit: u64,
    pub process_limit: u32,
    pub result_path: String,
}

impl SandboxInvocation {
    /// `[binary, lang_id, allow_net, stdin, stdout, stderr, time_ms, mem_kb,
    /// allow_write, output_limit, proc_limit, result_path]`
    pub fn argv(&self, binary: &str) -> Vec<String> {
        vec![
            binary.to_string(),
            self.language.sandbox_id().to_string(),
            "0".to_string(),
            self.stdin.clone(),
            self.stdout.clone(),
            self.stderr.clone(),
            self.time_ms.to_string(),
            self.memory_kb.to_string(),
            // Actual write access is decided by the SANDBOX_ALLOW_WRITE env.
            "1".to_string(),
            self.output_limit.to_string(),
            self.process_limit.to_string(),
            self.result_path.clone(),
        ]
    }
}
