use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde::Serialize;

use crate::{
    config::Config,
    core::{
        budget::ContainerBudget,
        domain::{CaseKey, CaseResult, CaseStatus, Job, Meta, MetaError},
        pipeline::{
            building::BuildStage,
            compiling::CompileStage, reporting::Reporter, running::CaseRunner,
        },
        queue::{JobQueue, JobTicket},
        registry::{Readiness, SubmissionRegistry, SubmissionState},
        traits::{
            collaborators::{AssetProvider, Backend, NetworkProvisioner, OutputChecker, StaticAnalyzer},
            executor::ContainerExecutor,
        },
    },
    error::DispatchError,
    storage::{SubmissionPaths, SubmissionStore},
};

/// External services the scheduler depends on.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn ContainerExecutor>,
    pub analyzer: Arc<dyn StaticAnalyzer>,
    pub network: Arc<dyn NetworkProvisioner>,
    pub assets: Arc<dyn AssetProvider>,
    pub backend: Arc<dyn Backend>,
    pub custom_checker: Option<Arc<dyn OutputChecker>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub queue_size: usize,
    pub max_queue_size: usize,
    pub container_count: usize,
    pub max_container_count: usize,
    pub submissions: Vec<String>,
}

#[derive(Debug)]
struct Inner {
    poll_interval: Duration,
    queue: JobQueue,
    budget: ContainerBudget,
    registry: SubmissionRegistry,
    store: SubmissionStore,
    build: BuildStage,
    compile: CompileStage,
    runner: CaseRunner,
    reporter: Reporter,
    analyzer: Arc<dyn StaticAnalyzer>,
    network: Arc<dyn NetworkProvisioner>,
    stopped: AtomicBool,
}

/// Turns submissions into container runs and reports their verdicts.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Debug, Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let submission = Arc::new(config.submission.clone());
        let store = SubmissionStore::new(
            config.storage.submission_dir.clone(),
            submission.working_dir.clone(),
            config.storage.backup_dir.clone(),
        );
        let mut runner = CaseRunner::new(collaborators.executor.clone(), submission.clone());
        if let Some(checker) = collaborators.custom_checker {
            runner = runner.with_custom_checker(checker);
        }
        let budget = ContainerBudget::new(config.dispatcher.max_container_number);
        let inner = Inner {
            poll_interval: config.dispatcher.poll_interval(),
            queue: JobQueue::new(config.dispatcher.queue_size),
            registry: SubmissionRegistry::new(config.dispatcher.submission_timeout()),
            build: BuildStage::new(
                collaborators.executor.clone(),
                collaborators.assets,
                submission.clone(),
                budget.clone(),
            ),
            compile: CompileStage::new(collaborators.executor, submission),
            runner,
            budget,
            reporter: Reporter::new(
                collaborators.backend,
                store.clone(),
                config.backend.token.clone(),
            ),
            store,
            analyzer: collaborators.analyzer,
            network: collaborators.network,
            stopped: AtomicBool::new(false),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let inner = &self.inner;
        SchedulerStatus {
            queue_size: inner.queue.outstanding(),
            max_queue_size: inner.queue.capacity(),
            container_count: inner.budget.active(),
            max_container_count: inner.budget.max(),
            submissions: inner.registry.ids(),
        }
    }

    pub fn is_registered(&self, submission_id: &str) -> bool {
        self.inner.registry.contains(submission_id)
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Registers a submission found under the submission root and enqueues
    /// its jobs.
    ///
    /// Errors are only returned before the submission is accepted; after
    /// that every fault ends up as a case verdict in the report.
    #[tracing::instrument(skip(self))]
    pub async fn handle(&self, submission_id: &str, problem_id: i64) -> Result<(), DispatchError> {
        let inner = &self.inner;
        let paths = inner.store.paths(submission_id);
        match tokio::fs::metadata(&paths.local).await {
            Err(_) => return Err(DispatchError::NotFound(submission_id.to_string())),
            Ok(m) if !m.is_dir() => return Err(DispatchError::NotADirectory(paths.local)),
            Ok(_) => {}
        }
        let raw = tokio::fs::read_to_string(paths.meta())
            .await
            .map_err(MetaError::from)?;
        let meta = Meta::parse(&raw)?;
        let registered = inner
            .registry
            .register(SubmissionState::new(submission_id, problem_id, meta))?;
        let state = registered.state;
        if let Some(stale) = registered.replaced {
            stale.set_readiness(Readiness::Aborted);
            let dropped = inner.queue.purge(submission_id);
            tracing::warn!(dropped, "discarded jobs of the timed out submission");
            inner.network.teardown(submission_id).await;
        }
        tracing::info!(cases = state.meta.case_total(), "submission registered");

        let jobs = match self.prepare(&state, &paths).await {
            Ok(Some(jobs)) => jobs,
            Ok(None) => return Ok(()),
            Err(result) => {
                tracing::warn!(reason = %result.stderr, "submission failed before execution");
                self.settle_submission(&state, |_| result.clone()).await;
                return Ok(());
            }
        };

        if let Err(e) = inner.queue.push_all(jobs) {
            tracing::warn!("{}", e);
            inner.registry.release_if_same(&state);
            inner.network.teardown(&state.id).await;
            return Err(e);
        }
        Ok(())
    }

    /// Network setup, static analysis and build planning. An `Err` carries
    /// the verdict every case receives; `None` means the submission was
    /// already settled by static analysis.
    async fn prepare(
        &self,
        state: &Arc<SubmissionState>,
        paths: &SubmissionPaths,
    ) -> Result<Option<Vec<Job>>, CaseResult> {
        let inner = &self.inner;
        let meta = &state.meta;

        let mode = inner
            .network
            .provision(&state.id, meta)
            .await
            .map_err(|e| CaseResult::compile_error(e.to_string()))?;
        state.set_network_mode(mode);

        let outcome = inner
            .analyzer
            .analyze(&state.id, state.problem_id, meta, &paths.local)
            .await
            .map_err(|e| CaseResult::compile_error(e.to_string()))?;
        state.set_analysis_payload(outcome.payload);
        if !outcome.passed {
            let ce_results = outcome.ce_results.unwrap_or_default();
            let fallback = CaseResult::compile_error("static analysis failed");
            self.settle_submission(state, |key| {
                ce_results.get(&key).cloned().unwrap_or_else(|| fallback.clone())
            })
            .await;
            return Ok(None);
        }

        let plan = inner
            .build
            .prepare(&state.id, state.problem_id, meta, paths)
            .await
            .map_err(|e| CaseResult::compile_error(e.to_string()))?;

        let submission_id = state.id.clone();
        let mut jobs = Vec::with_capacity(meta.case_total() + 2);
        let needs_compile = meta.language.needs_compile() && !plan.needs_make;
        if plan.needs_make {
            state.arm_build(plan);
            jobs.push(Job::Build {
                submission_id: submission_id.clone(),
            });
        } else if needs_compile {
            state.set_readiness(Readiness::Compiling);
            jobs.push(Job::Compile {
                submission_id: submission_id.clone(),
            });
        } else {
            state.set_readiness(Readiness::Ready);
        }
        jobs.extend(meta.case_keys().map(|key| Job::Execute {
            submission_id: submission_id.clone(),
            key,
        }));
        Ok(Some(jobs))
    }

    /// Drains the queue until [`Scheduler::stop`] is called.
    pub async fn run(&self) {
        let inner = &self.inner;
        tracing::info!(
            queue = inner.queue.capacity(),
            containers = inner.budget.max(),
            "scheduler started"
        );
        while !self.is_stopped() {
            if inner.queue.is_empty() || inner.budget.is_exhausted() {
                tokio::time::sleep(inner.poll_interval).await;
                continue;
            }
            let Some((job, ticket)) = inner.queue.pop() else {
                continue;
            };
            let Some(state) = inner.registry.get(job.submission_id()) else {
                tracing::debug!(submission_id = job.submission_id(), "dropping job of unknown submission");
                continue;
            };
            if state.is_timed_out(inner.registry.timeout()) {
                self.evict(&state).await;
                continue;
            }
            self.dispatch(job, ticket, state);
        }
        tracing::info!("scheduler stopped");
    }

    async fn evict(&self, state: &Arc<SubmissionState>) {
        let inner = &self.inner;
        if inner.registry.release_if_same(state) {
            state.set_readiness(Readiness::Aborted);
            let dropped = inner.queue.purge(&state.id);
            tracing::warn!(
                submission_id = %state.id,
                dropped,
                pending = state.pending_cases().len(),
                "submission timed out"
            );
            inner.network.teardown(&state.id).await;
        }
    }

    /// The ticket lives as long as the worker, keeping the job counted
    /// against the queue bound.
    fn dispatch(&self, job: Job, ticket: JobTicket, state: Arc<SubmissionState>) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let _ticket = ticket;
            match job {
                Job::Build { .. } => scheduler.build_worker(state).await,
                Job::Compile { .. } => scheduler.compile_worker(state).await,
                Job::Execute { key, .. } => scheduler.execute_worker(state, key).await,
            }
        });
    }

    #[tracing::instrument(skip(self, state), fields(submission_id = %state.id))]
    async fn build_worker(&self, state: Arc<SubmissionState>) {
        let inner = &self.inner;
        let Ok(_guard) = state.build_lock.try_lock() else {
            tracing::error!("build already in progress, rejecting duplicate build job");
            return;
        };
        let Some(plan) = state.take_build_plan() else {
            tracing::error!("build job without a pending build plan");
            return;
        };
        let paths = inner.store.paths(&state.id);
        match inner.build.make(&paths, &plan, state.meta.language).await {
            Ok(()) => {
                tracing::info!("build finished");
                state.set_readiness(Readiness::Ready);
            }
            Err(e) => {
                tracing::warn!("build failed: {}", e);
                inner.queue.purge(&state.id);
                state.set_readiness(Readiness::Aborted);
                let result = CaseResult::compile_error(e.to_string());
                self.settle_submission(&state, |_| result.clone()).await;
            }
        }
    }

    #[tracing::instrument(skip(self, state), fields(submission_id = %state.id))]
    async fn compile_worker(&self, state: Arc<SubmissionState>) {
        let inner = &self.inner;
        let Ok(_guard) = state.compile_lock.try_lock() else {
            tracing::error!("compile already in progress, rejecting duplicate compile job");
            return;
        };
        if state.compile_result().is_some() {
            tracing::error!("submission already compiled");
            return;
        }
        let paths = inner.store.paths(&state.id);
        let result = match inner.budget.acquire().await {
            Ok(_slot) => inner.compile.compile(&paths, state.meta.language).await,
            Err(e) => CaseResult::judge_error(e.to_string()),
        };
        tracing::info!(status = %result.status, "compile finished");
        state.cache_compile_result(result.clone());
        if result.status == CaseStatus::AC {
            state.set_readiness(Readiness::Ready);
        } else {
            state.set_readiness(Readiness::CompileFailed(result));
        }
    }

    #[tracing::instrument(skip(self, state), fields(submission_id = %state.id, case = %key))]
    async fn execute_worker(&self, state: Arc<SubmissionState>, key: CaseKey) {
        match state.wait_settled().await {
            Readiness::Ready => {}
            Readiness::CompileFailed(result) => {
                self.complete_case(&state, key, result).await;
                return;
            }
            other => {
                tracing::debug!(readiness = ?other, "case will not run");
                return;
            }
        }

        let budget = self.inner.budget.clone();
        let runner = self.inner.runner.clone();
        let paths = self.inner.store.paths(&state.id);
        let run_state = state.clone();
        let run = tokio::spawn(async move {
            let _slot = match budget.acquire().await {
                Ok(slot) => slot,
                Err(e) => return CaseResult::judge_error(e.to_string()),
            };
            runner.run(&run_state, &paths, key).await
        });
        let result = match run.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("case run aborted: {}", e);
                CaseResult::judge_error(format!("case run aborted: {}", e))
            }
        };
        self.complete_case(&state, key, result).await;
    }

    async fn complete_case(&self, state: &Arc<SubmissionState>, key: CaseKey, result: CaseResult) {
        tracing::debug!(case = %key, status = %result.status, "case finished");
        match state.record(key, result) {
            Ok(true) => self.finish(state).await,
            Ok(false) => {}
            Err(e) => tracing::warn!(submission_id = %state.id, "{}", e),
        }
    }

    /// Overwrites every case and reports the submission.
    async fn settle_submission<F>(&self, state: &Arc<SubmissionState>, result_for: F)
    where
        F: Fn(CaseKey) -> CaseResult,
    {
        if state.settle_all(result_for) {
            self.finish(state).await;
        }
    }

    /// Posts the report, then releases the submission.
    async fn finish(&self, state: &Arc<SubmissionState>) {
        let inner = &self.inner;
        let current = inner
            .registry
            .get(&state.id)
            .is_some_and(|registered| Arc::ptr_eq(&registered, state));
        if !current {
            tracing::warn!(submission_id = %state.id, "stale submission completed, report dropped");
            return;
        }
        let outcome = inner.reporter.deliver(state).await;
        tracing::info!(submission_id = %state.id, ?outcome, "submission completed");
        inner.registry.release_if_same(state);
        inner.queue.purge(&state.id);
        inner.network.teardown(&state.id).await;
    }
}
