use std::{
    io,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    config::SubmissionConfig,
    core::{
        budget::ContainerBudget,
        domain::{BuildStrategy, Language, Meta, SubmissionMode},
        traits::{
            collaborators::{AssetError, AssetProvider},
            executor::{
                ContainerExecutor, ContainerLimits, ContainerOutput, ContainerSpec, Mount,
                SandboxStatus,
            },
        },
    },
    storage::{SubmissionPaths, copy_tree},
};

/// Canonical executable produced by `make`.
pub const MAKE_OUTPUT: &str = "a.out";
/// Name the runner expects after finalization.
pub const ENTRY_BINARY: &str = "main";
pub const TEACHER_BINARY: &str = "Teacher_main";

#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Make(String),
    #[error("teacher program failed to compile: {0}")]
    Teacher(String),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error("io error: {0}")]
    Io(String),
}

impl From<io::Error> for BuildError {
    fn from(value: io::Error) -> Self {
        BuildError::Io(value.to_string())
    }
}

fn invalid(msg: impl Into<String>) -> BuildError {
    BuildError::Invalid(msg.into())
}

/// Step run after a successful `make`.
#[derive(Clone, Debug, PartialEq)]
pub enum Finalize {
    CompiledBinary { src_dir: PathBuf },
    FunctionOnly { src_dir: PathBuf, language: Language },
}

impl Finalize {
    pub fn apply(&self) -> Result<(), BuildError> {
        match self {
            Finalize::CompiledBinary { src_dir } => finalize_compiled_binary(src_dir),
            Finalize::FunctionOnly { src_dir, language } => {
                if language.needs_compile() {
                    return finalize_compiled_binary(src_dir);
                }
                if !src_dir.join("main.py").exists() {
                    return Err(invalid("main.py not found after running make"));
                }
                Ok(())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BuildPlan {
    pub needs_make: bool,
    pub lang_key: Option<String>,
    pub finalize: Option<Finalize>,
}

impl BuildPlan {
    /// Nothing to build; the compile stage (if any) handles the source.
    pub fn direct() -> Self {
        Self {
            needs_make: false,
            lang_key: None,
            finalize: None,
        }
    }
}

/// Every container started here holds a slot of `budget`.
#[derive(Debug, Clone)]
pub struct BuildStage {
    executor: Arc<dyn ContainerExecutor>,
    assets: Arc<dyn AssetProvider>,
    config: Arc<SubmissionConfig>,
    budget: ContainerBudget,
}

impl BuildStage {
    pub fn new(
        executor: Arc<dyn ContainerExecutor>,
        assets: Arc<dyn AssetProvider>,
        config: Arc<SubmissionConfig>,
        budget: ContainerBudget,
    ) -> Self {
        Self {
            executor,
            assets,
            config,
            budget,
        }
    }

    /// Resolves the build strategy of a freshly registered submission.
    #[tracing::instrument(skip(self, meta, paths))]
    pub async fn prepare(
        &self,
        submission_id: &str,
        problem_id: i64,
        meta: &Meta,
        paths: &SubmissionPaths,
    ) -> Result<BuildPlan, BuildError> {
        tracing::info!(strategy = ?meta.build_strategy, "preparing build");
        match meta.build_strategy {
            BuildStrategy::Compile => Ok(BuildPlan::direct()),
            BuildStrategy::MakeNormal => plan_for_student_artifacts(meta.language, &paths.src()),
            BuildStrategy::MakeInteractive => {
                // The teacher must be usable before anything of the student is looked at.
                self.prepare_teacher(problem_id, meta, paths).await?;
                match meta.submission_mode {
                    SubmissionMode::Zip => plan_for_student_artifacts(meta.language, &paths.src()),
                    SubmissionMode::Code => Ok(BuildPlan::direct()),
                }
            }
            BuildStrategy::MakeFunctionOnly => {
                self.prepare_function_only(problem_id, meta, paths).await
            }
        }
    }

    /// Runs `make` in a container and applies the plan's finalize step.
    #[tracing::instrument(skip(self, paths, plan))]
    pub async fn make(
        &self,
        paths: &SubmissionPaths,
        plan: &BuildPlan,
        language: Language,
    ) -> Result<(), BuildError> {
        let key = plan
            .lang_key
            .clone()
            .unwrap_or_else(|| language.key().to_string());
        let image = self
            .config
            .language(&key)
            .or_else(|| self.config.language(Language::Cpp.key()))
            .map(|l| l.image.clone())
            .ok_or_else(|| invalid(format!("no image configured for {}", key)))?;

        let spec = ContainerSpec {
            image,
            command: vec!["/bin/sh".into(), "-c".into(), "make".into()],
            working_dir: "/src".to_string(),
            mounts: vec![Mount::rw(paths.host_src(), "/src")],
            limits: self.compile_limits(),
            network_mode: "none".to_string(),
            ..Default::default()
        };
        let output = self
            .run_container(&spec)
            .await
            .map_err(|e| BuildError::Make(format!("make execution failed: {}", e)))?;
        if output.status != SandboxStatus::ExitedNormally || output.exit_code != 0 {
            let msg = if output.stderr.trim().is_empty() {
                "make failed".to_string()
            } else {
                output.stderr
            };
            return Err(BuildError::Make(msg));
        }

        if let Some(finalize) = plan.finalize.clone() {
            tokio::task::spawn_blocking(move || finalize.apply())
                .await
                .map_err(|e| BuildError::Make(format!("build finalization failed: {}", e)))??;
        }
        Ok(())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<ContainerOutput, String> {
        let _slot = self.budget.acquire().await.map_err(|e| e.to_string())?;
        self.executor.run(spec).await.map_err(|e| e.to_string())
    }

    fn compile_limits(&self) -> ContainerLimits {
        ContainerLimits {
            time_ms: Some(self.config.compile_time_limit_ms),
            memory_kb: Some(self.config.compile_memory_limit_kb),
            output_bytes: Some(self.config.output_limit_bytes),
        }
    }

    async fn prepare_teacher(
        &self,
        problem_id: i64,
        meta: &Meta,
        paths: &SubmissionPaths,
    ) -> Result<(), BuildError> {
        let teacher_lang = match meta.asset_paths.get("teacherLang") {
            Some(key) => Language::from_key(key)
                .ok_or_else(|| invalid(format!("unsupported teacher language: {}", key)))?,
            None => meta.language,
        };
        let asset = self.assets.fetch(problem_id, "teacher_file").await?;

        let teacher_dir = paths.teacher();
        tokio::fs::create_dir_all(&teacher_dir).await?;
        let source = teacher_dir.join(format!("main.{}", teacher_lang.source_suffix()));
        tokio::fs::copy(&asset, &source).await?;

        let Some(compile) = self
            .config
            .language(teacher_lang.key())
            .and_then(|l| l.compile.clone().map(|cmd| (l.image.clone(), cmd)))
        else {
            // Interpreted teacher runs from source.
            return Ok(());
        };
        let (image, command) = compile;
        let spec = ContainerSpec {
            image,
            command,
            working_dir: "/src".to_string(),
            mounts: vec![Mount::rw(paths.host_teacher(), "/src")],
            limits: self.compile_limits(),
            network_mode: "none".to_string(),
            ..Default::default()
        };
        let output = self.run_container(&spec).await.map_err(BuildError::Teacher)?;
        if output.status != SandboxStatus::ExitedNormally || output.exit_code != 0 {
            return Err(BuildError::Teacher(output.stderr));
        }
        let built = teacher_dir.join(ENTRY_BINARY);
        if !built.exists() {
            return Err(BuildError::Teacher("teacher executable was not produced".into()));
        }
        tokio::fs::rename(&built, teacher_dir.join(TEACHER_BINARY)).await?;
        Ok(())
    }

    async fn prepare_function_only(
        &self,
        problem_id: i64,
        meta: &Meta,
        paths: &SubmissionPaths,
    ) -> Result<BuildPlan, BuildError> {
        if meta.submission_mode == SubmissionMode::Zip {
            return Err(invalid("function-only submissions only accept code uploads"));
        }
        let src_dir = paths.src();
        let student_path = src_dir.join(format!("main.{}", meta.language.source_suffix()));
        let student_code = tokio::fs::read_to_string(&student_path)
            .await
            .map_err(|_| invalid("student source not found"))?;
        if !meta.asset_paths.contains_key("makefile") {
            return Err(invalid("functionOnly mode requires makefile asset"));
        }
        let template = self.assets.fetch(problem_id, "makefile").await?;

        let language = meta.language;
        let target = src_dir.clone();
        tokio::task::spawn_blocking(move || -> Result<(), BuildError> {
            reset_directory(&target)?;
            copy_tree(&template, &target)?;
            let template_name = if language.needs_compile() {
                "function.h"
            } else {
                "student_impl.py"
            };
            std::fs::write(target.join(template_name), student_code)?;
            Ok(())
        })
        .await
        .map_err(|e| BuildError::Io(e.to_string()))??;

        Ok(BuildPlan {
            needs_make: true,
            lang_key: Some(language.key().to_string()),
            finalize: Some(Finalize::FunctionOnly { src_dir, language }),
        })
    }
}

fn plan_for_student_artifacts(language: Language, src_dir: &Path) -> Result<BuildPlan, BuildError> {
    if !language.needs_compile() {
        if !src_dir.join("main.py").exists() {
            return Err(invalid("main.py not found in submission archive"));
        }
        return Ok(BuildPlan::direct());
    }
    if !src_dir.join("Makefile").exists() {
        return Err(invalid("Makefile not found in submission directory"));
    }
    Ok(BuildPlan {
        needs_make: true,
        lang_key: Some(language.key().to_string()),
        finalize: Some(Finalize::CompiledBinary {
            src_dir: src_dir.to_path_buf(),
        }),
    })
}

fn reset_directory(dir: &Path) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn is_executable(path: &Path) -> io::Result<bool> {
    let meta = std::fs::metadata(path)?;
    Ok(meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

/// Rejects archives that carry executables besides the allowed names.
pub fn ensure_single_executable(src_dir: &Path, allowed: &[&str]) -> Result<(), BuildError> {
    for entry in std::fs::read_dir(src_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if is_executable(&entry.path())? && !allowed.contains(&name.as_ref()) {
            return Err(invalid(format!(
                "only one executable named {} is allowed in zip submissions (found {})",
                MAKE_OUTPUT, name
            )));
        }
    }
    Ok(())
}

fn finalize_compiled_binary(src_dir: &Path) -> Result<(), BuildError> {
    let binary = src_dir.join(MAKE_OUTPUT);
    if !binary.exists() {
        return Err(invalid("a.out not found after running make"));
    }
    ensure_single_executable(src_dir, &[MAKE_OUTPUT])?;
    let target = src_dir.join(ENTRY_BINARY);
    if target.exists() {
        std::fs::remove_file(&target)?;
    }
    std::fs::rename(&binary, &target)?;
    let mut perms = std::fs::metadata(&target)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    std::fs::set_permissions(&target, perms)?;
    Ok(())
}
