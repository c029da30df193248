use std::{
    io,
    os::unix::{fs::PermissionsExt, process::ExitStatusExt},
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};

use crate::core::domain::{CaseResult, CaseStatus, Language};

use super::{
    channel::{Endpoints, PipeChannel, PipeMode},
    config::InteractiveConfig,
    permissions::{self, Owner},
    sandbox::{SandboxInvocation, SandboxReport, read_check_result},
};

pub const CHECK_RESULT_FILE: &str = "Check_Result";
pub const TEACHER_CASE_FILE: &str = "testcase.in";
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("teacher binary missing")]
    TeacherBinaryMissing,
    #[error("teacher script missing")]
    TeacherScriptMissing,
    #[error("student entry not found")]
    StudentEntryMissing,
    #[error("failed to secure {side} dir: {source}")]
    Secure {
        side: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to establish pipe ({tried}); last error: {last}")]
    Channel { tried: String, last: String },
    #[error("execution failed: {0}")]
    Execution(#[source] io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One interactive case as described on the command line.
#[derive(Clone, Debug, PartialEq)]
pub struct OrchestrateRequest {
    pub workdir: PathBuf,
    pub teacher_dir: PathBuf,
    pub student_dir: PathBuf,
    pub student_lang: Language,
    pub teacher_lang: Language,
    pub teacher_first: bool,
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
    pub case_path: Option<PathBuf>,
    pub pipe_mode: PipeMode,
}

/// Single JSON line printed by the orchestrator binary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveReport {
    #[serde(rename = "Status")]
    pub status: CaseStatus,
    #[serde(rename = "Stdout", default)]
    pub stdout: String,
    #[serde(rename = "Stderr", default)]
    pub stderr: String,
    #[serde(rename = "Duration", default = "unknown")]
    pub duration: i64,
    #[serde(rename = "MemUsage", default = "unknown")]
    pub mem_usage: i64,
    #[serde(rename = "DockerExitCode", default)]
    pub docker_exit_code: i64,
    #[serde(default)]
    pub pipe_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_exit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_exit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_result: Option<String>,
}

fn unknown() -> i64 {
    -1
}

impl InteractiveReport {
    pub fn failure(error: impl std::fmt::Display, pipe_mode: PipeMode) -> Self {
        Self {
            status: CaseStatus::CE,
            stdout: String::new(),
            stderr: format!("interactive orchestrator failed: {}", error),
            duration: -1,
            mem_usage: -1,
            docker_exit_code: 1,
            pipe_mode: pipe_mode.to_string(),
            teacher_stderr: None,
            teacher_exit: None,
            student_stderr: None,
            student_exit: None,
            student_result: None,
            teacher_result: None,
        }
    }

    pub fn into_case_result(self) -> CaseResult {
        CaseResult {
            stdout: self.stdout,
            stderr: self.stderr,
            exit_code: self.docker_exit_code,
            exec_time: self.duration,
            memory_usage: self.mem_usage,
            status: self.status,
        }
    }
}

/// Final verdict by precedence: an abnormal student run, then an abnormal
/// teacher run, then the teacher's check file.
pub fn decide_verdict(
    student: &SandboxReport,
    student_stderr: &str,
    teacher: &SandboxReport,
    teacher_stderr: &str,
    check: Result<(CaseStatus, String), String>,
) -> (CaseStatus, String) {
    let describe = |report: &SandboxReport, stderr: &str| {
        [report.message.as_str(), stderr, report.raw.as_str()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .to_string()
    };
    if !student.exited_normally() {
        return (student.status, describe(student, student_stderr));
    }
    if !teacher.exited_normally() {
        return (teacher.status, describe(teacher, teacher_stderr));
    }
    match check {
        Ok(verdict) => verdict,
        Err(message) => (CaseStatus::CE, message),
    }
}

/// An accepted run is revoked if the teacher flooded its directory.
pub fn enforce_file_cap(
    verdict: (CaseStatus, String),
    new_files: usize,
    cap: usize,
) -> (CaseStatus, String) {
    if verdict.0 == CaseStatus::AC && new_files > cap {
        return (
            CaseStatus::CE,
            format!("teacher created too many files ({})", new_files),
        );
    }
    verdict
}

fn ensure_executable(target: &Path, candidates: &[PathBuf]) -> io::Result<()> {
    if !target.exists() {
        if let Some(source) = candidates.iter().find(|c| c.exists()) {
            if std::fs::hard_link(source, target).is_err() {
                std::fs::copy(source, target)?;
            }
        }
    }
    if target.exists() {
        let mut perms = std::fs::metadata(target)?.permissions();
        perms.set_mode(perms.mode() | 0o111);
        std::fs::set_permissions(target, perms)?;
    }
    Ok(())
}

fn exit_code(status: Option<ExitStatus>) -> i64 {
    match status {
        Some(s) => s
            .code()
            .map(i64::from)
            .or_else(|| s.signal().map(|sig| -i64::from(sig)))
            .unwrap_or(-1),
        None => -1,
    }
}

fn read_or_empty(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

#[derive(Debug)]
pub struct Orchestrator {
    config: InteractiveConfig,
    keep_tmp: bool,
}

impl Orchestrator {
    pub fn new(config: InteractiveConfig, keep_tmp: bool) -> Self {
        Self { config, keep_tmp }
    }

    /// Never fails: any fault becomes a CE report.
    pub async fn run(&self, request: &OrchestrateRequest) -> InteractiveReport {
        match self.orchestrate(request).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("interactive orchestration failed: {}", e);
                InteractiveReport::failure(e, request.pipe_mode)
            }
        }
    }

    fn teacher_owner(&self) -> Owner {
        Owner {
            uid: self.config.teacher_uid,
            gid: self.config.sandbox_gid,
        }
    }

    fn student_owner(&self) -> Owner {
        Owner {
            uid: self.config.student_uid,
            gid: self.config.sandbox_gid,
        }
    }

    fn prepare_entries(&self, request: &OrchestrateRequest) -> Result<(), OrchestratorError> {
        let teacher = &request.teacher_dir;
        if request.teacher_lang.needs_compile() {
            let binary = teacher.join(crate::core::pipeline::building::TEACHER_BINARY);
            if !binary.exists() {
                return Err(OrchestratorError::TeacherBinaryMissing);
            }
            ensure_executable(&teacher.join("main"), &[binary, teacher.join("a.out")])?;
        } else if !teacher.join("main.py").exists() {
            return Err(OrchestratorError::TeacherScriptMissing);
        }

        let student = &request.student_dir;
        let entry = if request.student_lang.needs_compile() {
            let entry = student.join("main");
            ensure_executable(&entry, &[student.join("a.out")])?;
            ensure_executable(&student.join("a.out"), &[entry.clone()])?;
            entry
        } else {
            student.join("main.py")
        };
        if !entry.exists() {
            return Err(OrchestratorError::StudentEntryMissing);
        }
        Ok(())
    }

    fn secure_trees(&self, request: &OrchestrateRequest) -> Result<(), OrchestratorError> {
        permissions::secure_teacher_tree(&request.teacher_dir, self.teacher_owner())
            .map_err(|source| OrchestratorError::Secure {
                side: "teacher",
                source,
            })?;
        permissions::secure_student_tree(
            &request.student_dir,
            self.student_owner(),
            self.config.student_allow_read,
            self.config.student_allow_write,
        )
        .map_err(|source| OrchestratorError::Secure {
            side: "student",
            source,
        })
    }

    fn make_tmpdir(&self, workdir: &Path) -> Result<PathBuf, OrchestratorError> {
        std::fs::create_dir_all(workdir)?;
        let tmpdir = workdir.join(format!(".interactive-{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir(&tmpdir)?;
        self.teacher_owner().apply(&tmpdir)?;
        std::fs::set_permissions(
            &tmpdir,
            std::fs::Permissions::from_mode(permissions::PRIVATE_DIR_MODE),
        )?;
        Ok(tmpdir)
    }

    fn open_channel(&self, mode: PipeMode, tmpdir: &Path) -> Result<PipeChannel, OrchestratorError> {
        let candidates = mode.candidates(self.config.student_allow_write);
        let mut last = String::new();
        for candidate in &candidates {
            match PipeChannel::open(*candidate, tmpdir, self.teacher_owner()) {
                Ok(channel) => return Ok(channel),
                Err(e) => {
                    tracing::warn!(mode = %candidate, "pipe setup failed: {}", e);
                    last = e.to_string();
                }
            }
        }
        Err(OrchestratorError::Channel {
            tried: candidates.iter().map(PipeMode::as_str).collect::<Vec<_>>().join("/"),
            last,
        })
    }

    /// Copies the case input into the teacher tree, readable by the teacher only.
    fn stage_case_file(&self, request: &OrchestrateRequest) -> Option<PathBuf> {
        let source = request.case_path.as_ref().filter(|p| p.exists())?;
        let local = request.teacher_dir.join(TEACHER_CASE_FILE);
        let staged = std::fs::copy(source, &local).and_then(|_| {
            std::fs::set_permissions(
                &local,
                std::fs::Permissions::from_mode(permissions::PRIVATE_FILE_MODE),
            )
        });
        if let Err(e) = staged {
            tracing::warn!("failed to stage case file: {}", e);
            return None;
        }
        if let Err(e) = self.teacher_owner().apply(&local) {
            tracing::warn!("failed to hand over case file: {}", e);
        }
        Some(local)
    }

    fn command(
        &self,
        language: Language,
        ends: &Endpoints,
        tmpdir: &Path,
        result_file: &str,
        request: &OrchestrateRequest,
    ) -> Vec<String> {
        SandboxInvocation {
            language,
            stdin: ends.stdin.clone(),
            stdout: ends.stdout.clone(),
            stderr: ends.stderr.to_string_lossy().into_owned(),
            time_ms: request.time_limit_ms,
            memory_kb: request.memory_limit_kb,
            output_limit: self.config.output_limit_bytes,
            process_limit: self.config.process_limit,
            result_path: tmpdir.join(result_file).to_string_lossy().into_owned(),
        }
        .argv(&self.config.sandbox_binary)
    }

    fn spawn(&self, argv: &[String], cwd: &Path, env: &[(&str, String)], drop_env: &[&str]) -> io::Result<Child> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .env("PWD", cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true);
        for key in drop_env {
            command.env_remove(key);
        }
        for (key, value) in env {
            command.env(key, value);
        }
        command.spawn()
    }

    async fn orchestrate(&self, request: &OrchestrateRequest) -> Result<InteractiveReport, OrchestratorError> {
        self.prepare_entries(request)?;
        self.secure_trees(request)?;
        let teacher_files_before = permissions::count_files(&request.teacher_dir);

        let tmpdir = self.make_tmpdir(&request.workdir)?;
        let outcome = self.converse(request, &tmpdir).await;
        if !self.keep_tmp {
            if let Err(e) = std::fs::remove_dir_all(&tmpdir) {
                tracing::warn!("failed to remove tmpdir {}: {}", tmpdir.display(), e);
            }
        }
        let mut report = outcome?;

        let new_files = permissions::count_files(&request.teacher_dir)
            .saturating_sub(teacher_files_before);
        let (status, message) = enforce_file_cap(
            (report.status, report.stderr),
            new_files,
            self.config.max_teacher_new_files,
        );
        report.status = status;
        report.stderr = message;
        Ok(report)
    }

    async fn converse(
        &self,
        request: &OrchestrateRequest,
        tmpdir: &Path,
    ) -> Result<InteractiveReport, OrchestratorError> {
        let mut channel = self.open_channel(request.pipe_mode, tmpdir)?;
        let student_argv = self.command(request.student_lang, channel.student(), tmpdir, "student.result", request);
        let teacher_argv = self.command(request.teacher_lang, channel.teacher(), tmpdir, "teacher.result", request);

        let config = &self.config;
        let mut student_env = vec![
            ("SANDBOX_UID", config.student_uid.to_string()),
            ("SANDBOX_GID", config.sandbox_gid.to_string()),
        ];
        let mut student_drop = Vec::new();
        for (key, allowed) in [
            ("SANDBOX_ALLOW_WRITE", config.student_allow_write),
            ("SANDBOX_ALLOW_READ", config.student_allow_read),
        ] {
            if allowed {
                student_env.push((key, "1".to_string()));
            } else {
                student_drop.push(key);
            }
        }
        let mut teacher_env = vec![
            ("SANDBOX_UID", config.teacher_uid.to_string()),
            ("SANDBOX_GID", config.sandbox_gid.to_string()),
            ("SANDBOX_ALLOW_WRITE", "1".to_string()),
        ];
        if let Some(case) = &request.case_path {
            teacher_env.push(("CASE_PATH", case.to_string_lossy().into_owned()));
        }
        let staged_case = self.stage_case_file(request);

        let started = Instant::now();
        let deadline = started
            + Duration::from_millis(request.time_limit_ms + config.deadline_slack_ms);
        let spawn_student = || self.spawn(&student_argv, &request.student_dir, &student_env, &student_drop);
        let spawn_teacher = || self.spawn(&teacher_argv, &request.teacher_dir, &teacher_env, &[]);
        let delay = Duration::from_millis(config.start_delay_ms);

        let spawned = if request.teacher_first {
            match spawn_teacher() {
                Ok(teacher) => {
                    tokio::time::sleep(delay).await;
                    spawn_student().map(|student| (student, teacher))
                }
                Err(e) => Err(e),
            }
        } else {
            match spawn_student() {
                Ok(student) => {
                    tokio::time::sleep(delay).await;
                    spawn_teacher().map(|teacher| (student, teacher))
                }
                Err(e) => Err(e),
            }
        };
        // kill_on_drop reaps a half-started pair.
        let (mut student, mut teacher) = spawned.map_err(OrchestratorError::Execution)?;
        if let Err(e) = channel.release_spawn_fds() {
            tracing::warn!("failed to release spawn descriptors: {}", e);
        }

        let (student_status, teacher_status) =
            supervise(&mut student, &mut teacher, &mut channel, deadline).await;
        let duration = started.elapsed().as_millis() as i64;

        if let Some(local) = staged_case {
            if let Err(e) = std::fs::remove_file(&local) {
                tracing::warn!("failed to remove staged case file: {}", e);
            }
        }

        let student_report = SandboxReport::read(&tmpdir.join("student.result"));
        let teacher_report = SandboxReport::read(&tmpdir.join("teacher.result"));
        let student_stderr = read_or_empty(&channel.student().stderr);
        let teacher_stderr = read_or_empty(&channel.teacher().stderr);
        let (status, message) = decide_verdict(
            &student_report,
            &student_stderr,
            &teacher_report,
            &teacher_stderr,
            read_check_result(&request.teacher_dir.join(CHECK_RESULT_FILE)),
        );
        let mem_usage = student_report.memory_kb.max(teacher_report.memory_kb).max(-1);
        tracing::info!(%status, pipe_mode = %channel.mode(), duration, "interactive case finished");

        Ok(InteractiveReport {
            status,
            stdout: String::new(),
            stderr: message,
            duration,
            mem_usage,
            docker_exit_code: 0,
            pipe_mode: channel.mode().to_string(),
            teacher_stderr: Some(teacher_stderr),
            teacher_exit: Some(exit_code(teacher_status)),
            student_stderr: Some(student_stderr),
            student_exit: Some(exit_code(student_status)),
            student_result: Some(student_report.raw),
            teacher_result: Some(teacher_report.raw),
        })
    }
}

/// Polls both children until they exit or the deadline passes, kicking the
/// teacher once if the student leaves first. Survivors are killed.
async fn supervise(
    student: &mut Child,
    teacher: &mut Child,
    channel: &mut PipeChannel,
    deadline: Instant,
) -> (Option<ExitStatus>, Option<ExitStatus>) {
    let mut student_status = None;
    let mut teacher_status = None;
    loop {
        if student_status.is_none() {
            student_status = student.try_wait().ok().flatten();
        }
        if teacher_status.is_none() {
            teacher_status = teacher.try_wait().ok().flatten();
        }
        if student_status.is_some() && teacher_status.is_none() {
            match channel.kick_teacher() {
                Ok(true) => tracing::debug!("student exited first, teacher kicked"),
                Ok(false) => {}
                Err(e) => tracing::warn!("kick write failed: {}", e),
            }
        }
        if (student_status.is_some() && teacher_status.is_some()) || Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    for (child, status) in [(student, &mut student_status), (teacher, &mut teacher_status)] {
        if status.is_some() {
            continue;
        }
        if let Err(e) = child.start_kill() {
            tracing::warn!("failed to kill overdue process: {}", e);
        }
        if let Ok(Ok(exit)) = tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
            *status = Some(exit);
        }
    }
    (student_status, teacher_status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(raw: &str) -> SandboxReport {
        SandboxReport::parse(raw)
    }

    fn normal() -> SandboxReport {
        report("Exited Normally\nWEXITSTATUS() = 0\n5\n1024")
    }

    #[test]
    fn test_student_tle_beats_teacher_ac() {
        let (status, _) = decide_verdict(
            &report("TLE\ntime out\n2000\n1024"),
            "",
            &normal(),
            "",
            Ok((CaseStatus::AC, "ok".to_string())),
        );
        assert_eq!(status, CaseStatus::TLE);
    }

    #[test]
    fn test_teacher_abnormal_beats_check_file() {
        let (status, message) = decide_verdict(
            &normal(),
            "",
            &report("RE\n"),
            "teacher crashed",
            Ok((CaseStatus::AC, "ok".to_string())),
        );
        assert_eq!(status, CaseStatus::RE);
        assert_eq!(message, "teacher crashed");
    }

    #[test]
    fn test_check_file_decides_normal_runs() {
        let verdict = decide_verdict(
            &normal(),
            "",
            &normal(),
            "",
            Ok((CaseStatus::AC, "ok".to_string())),
        );
        assert_eq!(verdict, (CaseStatus::AC, "ok".to_string()));
    }

    #[test]
    fn test_missing_check_file_is_ce() {
        let dir = tempfile::tempdir().unwrap();
        let (status, message) = decide_verdict(
            &normal(),
            "",
            &normal(),
            "",
            read_check_result(&dir.path().join(CHECK_RESULT_FILE)),
        );
        assert_eq!(status, CaseStatus::CE);
        assert!(message.contains("not found"));
    }

    #[test]
    fn test_missing_student_result_is_ce() {
        let dir = tempfile::tempdir().unwrap();
        let (status, message) = decide_verdict(
            &SandboxReport::read(&dir.path().join("student.result")),
            "",
            &normal(),
            "",
            Ok((CaseStatus::AC, "ok".to_string())),
        );
        assert_eq!(status, CaseStatus::CE);
        assert!(message.contains("missing"));
    }

    #[test]
    fn test_file_cap_revokes_accept_only() {
        let ac = (CaseStatus::AC, "ok".to_string());
        assert_eq!(enforce_file_cap(ac.clone(), 500, 500), ac);
        let (status, message) = enforce_file_cap(ac, 501, 500);
        assert_eq!(status, CaseStatus::CE);
        assert_eq!(message, "teacher created too many files (501)");

        let wa = (CaseStatus::WA, "no".to_string());
        assert_eq!(enforce_file_cap(wa.clone(), 9999, 500), wa);
    }

    #[test]
    fn test_report_wire_format() {
        let value = serde_json::to_value(InteractiveReport::failure("boom", PipeMode::Auto)).unwrap();
        assert_eq!(value["Status"], "CE");
        assert_eq!(value["Stderr"], "interactive orchestrator failed: boom");
        assert_eq!(value["DockerExitCode"], 1);
        assert_eq!(value["pipeMode"], "auto");
        assert!(value.get("teacherExit").is_none());

        let parsed: InteractiveReport =
            serde_json::from_str(r#"{"Status":"AC","Stderr":"ok","Duration":12,"MemUsage":300}"#)
                .unwrap();
        let result = parsed.into_case_result();
        assert_eq!(result.status, CaseStatus::AC);
        assert_eq!(result.exec_time, 12);
        assert_eq!(result.exit_code, 0);
    }

    /// Stand-in sandbox: runs the teacher or student body depending on which
    /// result file it was asked to write. `normal` records a clean exit.
    fn sandbox_script(student: &str, teacher: &str) -> String {
        format!(
            r#"#!/bin/sh
result="${{11}}"
normal() {{ printf 'Exited Normally\nWEXITSTATUS() = 0\n5\n1024\n' > "$result"; }}
case "$result" in
*teacher.result)
{teacher}
;;
*)
{student}
;;
esac
"#
        )
    }

    /// Python on both sides, owned by the current user, with `script` as sandbox.
    fn scripted(
        dir: &Path,
        script: String,
        time_limit_ms: u64,
    ) -> (OrchestrateRequest, InteractiveConfig) {
        use nix::unistd::{Gid, Uid};

        let binary = dir.join("sandbox.sh");
        std::fs::write(&binary, script).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let request = OrchestrateRequest {
            workdir: dir.join("workspace"),
            teacher_dir: dir.join("teacher"),
            student_dir: dir.join("src"),
            student_lang: Language::Python,
            teacher_lang: Language::Python,
            teacher_first: false,
            time_limit_ms,
            memory_limit_kb: 65536,
            case_path: None,
            pipe_mode: PipeMode::DevFd,
        };
        for side in [&request.teacher_dir, &request.student_dir] {
            std::fs::create_dir_all(side).unwrap();
            std::fs::write(side.join("main.py"), "pass\n").unwrap();
        }
        let config = InteractiveConfig {
            teacher_uid: Uid::current().as_raw(),
            student_uid: Uid::current().as_raw(),
            sandbox_gid: Gid::current().as_raw(),
            sandbox_binary: binary.to_string_lossy().into_owned(),
            deadline_slack_ms: 200,
            start_delay_ms: 10,
            ..InteractiveConfig::default()
        };
        (request, config)
    }

    #[tokio::test]
    async fn test_check_result_decides_accepted_run() {
        let dir = tempfile::tempdir().unwrap();
        let script = sandbox_script(
            r#"echo 42 > "$4"; normal"#,
            r#"read answer < "$3"
if [ "$answer" = 42 ]; then printf 'STATUS: AC\nMESSAGE: ok\n' > Check_Result
else printf 'STATUS: WA\nMESSAGE: got %s\n' "$answer" > Check_Result; fi
normal"#,
        );
        let (request, config) = scripted(dir.path(), script, 2000);

        let report = Orchestrator::new(config, false).run(&request).await;
        assert_eq!(report.status, CaseStatus::AC, "{:?}", report);
        assert_eq!(report.stderr, "ok");
        assert_eq!(report.pipe_mode, "devfd");
        assert_eq!(report.student_exit, Some(0));
        assert_eq!(report.teacher_exit, Some(0));
        assert_eq!(report.mem_usage, 1024);
        assert_eq!(std::fs::read_dir(&request.workdir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_overdue_student_is_killed_at_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let script = sandbox_script(
            "exec sleep 30",
            r#"printf 'STATUS: AC\nMESSAGE: ok\n' > Check_Result; normal"#,
        );
        let (request, config) = scripted(dir.path(), script, 100);

        let started = Instant::now();
        let report = Orchestrator::new(config, false).run(&request).await;
        let elapsed = started.elapsed();
        assert_eq!(report.status, CaseStatus::CE);
        assert_eq!(report.stderr, "result file missing");
        assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn test_teacher_is_kicked_when_student_exits_first() {
        let dir = tempfile::tempdir().unwrap();
        let script = sandbox_script(
            "normal",
            r#"read answer < "$3"
printf 'STATUS: WA\nMESSAGE: no answer\n' > Check_Result
normal"#,
        );
        let (request, config) = scripted(dir.path(), script, 10_000);

        let started = Instant::now();
        let report = Orchestrator::new(config, false).run(&request).await;
        assert_eq!(report.status, CaseStatus::WA, "{:?}", report);
        assert_eq!(report.stderr, "no answer");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_teacher_flooding_its_dir_revokes_accept() {
        let dir = tempfile::tempdir().unwrap();
        let script = sandbox_script(
            "normal",
            r#"for i in 1 2 3 4 5; do : > "extra$i"; done
printf 'STATUS: AC\nMESSAGE: ok\n' > Check_Result
normal"#,
        );
        let (request, mut config) = scripted(dir.path(), script, 2000);
        config.max_teacher_new_files = 2;

        let report = Orchestrator::new(config, false).run(&request).await;
        assert_eq!(report.status, CaseStatus::CE);
        assert_eq!(report.stderr, "teacher created too many files (6)");
    }

    #[tokio::test]
    async fn test_missing_teacher_binary_reports_ce() {
        let dir = tempfile::tempdir().unwrap();
        let request = OrchestrateRequest {
            workdir: dir.path().join("workspace"),
            teacher_dir: dir.path().join("teacher"),
            student_dir: dir.path().join("src"),
            student_lang: Language::C,
            teacher_lang: Language::C,
            teacher_first: false,
            time_limit_ms: 1000,
            memory_limit_kb: 65536,
            case_path: None,
            pipe_mode: PipeMode::Auto,
        };
        std::fs::create_dir_all(&request.teacher_dir).unwrap();
        std::fs::create_dir_all(&request.student_dir).unwrap();

        let report = Orchestrator::new(InteractiveConfig::default(), false)
            .run(&request)
            .await;
        assert_eq!(report.status, CaseStatus::CE);
        assert!(report.stderr.contains("teacher binary missing"));
    }
}
