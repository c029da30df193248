use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, MutexGuard, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::watch;

use crate::{
    core::{
        domain::{CaseKey, CaseResult, Meta},
        pipeline::building::BuildPlan,
    },
    error::DispatchError,
};

/// Where a submission stands with respect to running its cases.
#[derive(Clone, Debug, PartialEq)]
pub enum Readiness {
    Preparing,
    Building,
    Compiling,
    Ready,
    /// Compilation finished without an executable; every case reports this.
    CompileFailed(CaseResult),
    /// The submission was already settled as a whole (e.g. `make` failed).
    Aborted,
}

impl Readiness {
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Readiness::Ready | Readiness::CompileFailed(_) | Readiness::Aborted
        )
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("case {0} is not declared by the submission")]
    UnknownCase(CaseKey),
    #[error("case {0} already has a result")]
    AlreadyRecorded(CaseKey),
}

type Slots = BTreeMap<CaseKey, Option<CaseResult>>;

#[derive(Debug)]
pub struct SubmissionState {
    pub id: String,
    pub problem_id: i64,
    pub meta: Meta,
    pub created_at: DateTime<Utc>,
    slots: Mutex<Slots>,
    completed: AtomicBool,
    build_plan: Mutex<Option<BuildPlan>>,
    pub(crate) build_lock: tokio::sync::Mutex<()>,
    pub(crate) compile_lock: tokio::sync::Mutex<()>,
    compile_result: OnceLock<CaseResult>,
    readiness: watch::Sender<Readiness>,
    network_mode: Mutex<String>,
    analysis_payload: Mutex<Option<serde_json::Value>>,
}

impl SubmissionState {
    pub fn new(id: &str, problem_id: i64, meta: Meta) -> Self {
        let slots = meta.case_keys().map(|key| (key, None)).collect();
        let (readiness, _) = watch::channel(Readiness::Preparing);
        Self {
            id: id.to_string(),
            problem_id,
            meta,
            created_at: Utc::now(),
            slots: Mutex::new(slots),
            completed: AtomicBool::new(false),
            build_plan: Mutex::new(None),
            build_lock: tokio::sync::Mutex::new(()),
            compile_lock: tokio::sync::Mutex::new(()),
            compile_result: OnceLock::new(),
            readiness,
            network_mode: Mutex::new("none".to_string()),
            analysis_payload: Mutex::new(None),
        }
    }

    pub fn age(&self) -> Duration {
        (Utc::now() - self.created_at).to_std().unwrap_or_default()
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.age() > timeout
    }

    /// Stores one case result. Returns `true` for the single call that
    /// filled the last pending slot.
    pub fn record(&self, key: CaseKey, result: CaseResult) -> Result<bool, RecordError> {
        let mut slots = lock(&self.slots);
        let slot = slots.get_mut(&key).ok_or(RecordError::UnknownCase(key))?;
        if slot.is_some() {
            return Err(RecordError::AlreadyRecorded(key));
        }
        *slot = Some(result);
        Ok(self.check_complete(&slots))
    }

    /// Overwrites every slot, pending or not. Returns `true` if this call
    /// completed the submission.
    pub fn settle_all<F>(&self, result_for: F) -> bool
    where
        F: Fn(CaseKey) -> CaseResult,
    {
        let mut slots = lock(&self.slots);
        for (key, slot) in slots.iter_mut() {
            *slot = Some(result_for(*key));
        }
        self.check_complete(&slots)
    }

    fn check_complete(&self, slots: &Slots) -> bool {
        slots.values().all(Option::is_some) && !self.completed.swap(true, Ordering::SeqCst)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn pending_cases(&self) -> Vec<CaseKey> {
        lock(&self.slots)
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn results(&self) -> BTreeMap<CaseKey, Option<CaseResult>> {
        lock(&self.slots).clone()
    }

    pub fn arm_build(&self, plan: BuildPlan) {
        *lock(&self.build_plan) = Some(plan);
        self.set_readiness(Readiness::Building);
    }

    pub fn take_build_plan(&self) -> Option<BuildPlan> {
        lock(&self.build_plan).take()
    }

    pub fn compile_result(&self) -> Option<&CaseResult> {
        self.compile_result.get()
    }

    /// Returns `false` if a result was already cached.
    pub fn cache_compile_result(&self, result: CaseResult) -> bool {
        self.compile_result.set(result).is_ok()
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness.borrow().clone()
    }

    pub fn set_readiness(&self, readiness: Readiness) {
        self.readiness.send_replace(readiness);
    }

    /// Waits until the submission either can run cases or never will.
    pub async fn wait_settled(&self) -> Readiness {
        let mut rx = self.readiness.subscribe();
        match rx.wait_for(Readiness::is_settled).await {
            Ok(readiness) => (*readiness).clone(),
            Err(_) => Readiness::Aborted,
        }
    }

    pub fn network_mode(&self) -> String {
        lock(&self.network_mode).clone()
    }

    pub fn set_network_mode(&self, mode: String) {
        *lock(&self.network_mode) = mode;
    }

    pub fn set_analysis_payload(&self, payload: Option<serde_json::Value>) {
        *lock(&self.analysis_payload) = payload;
    }

    pub fn take_analysis_payload(&self) -> Option<serde_json::Value> {
        lock(&self.analysis_payload).take()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug)]
pub struct Registered {
    pub state: Arc<SubmissionState>,
    pub replaced: Option<Arc<SubmissionState>>,
}

/// Every submission currently known to the scheduler, keyed by id.
#[derive(Debug)]
pub struct SubmissionRegistry {
    submissions: DashMap<String, Arc<SubmissionState>>,
    timeout: Duration,
}

impl SubmissionRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            submissions: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Inserts a new submission. A live entry with the same id is a
    /// duplicate; a timed-out one is replaced and handed back so the caller
    /// can discard its leftover work.
    pub fn register(&self, state: SubmissionState) -> Result<Registered, DispatchError> {
        let state = Arc::new(state);
        let replaced = match self.submissions.entry(state.id.clone()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_timed_out(self.timeout) {
                    return Err(DispatchError::Duplicated(state.id.clone()));
                }
                tracing::info!(submission_id = %state.id, "replacing timed out submission");
                Some(entry.insert(state.clone()))
            }
            Entry::Vacant(entry) => {
                entry.insert(state.clone());
                None
            }
        };
        Ok(Registered { state, replaced })
    }

    pub fn get(&self, submission_id: &str) -> Option<Arc<SubmissionState>> {
        self.submissions.get(submission_id).map(|s| s.clone())
    }

    pub fn contains(&self, submission_id: &str) -> bool {
        self.submissions.contains_key(submission_id)
    }

    /// Removes the entry only if it is still `state`, so a stale worker cannot
    /// release a newer submission that reused the id.
    pub fn release_if_same(&self, state: &Arc<SubmissionState>) -> bool {
        self.submissions
            .remove_if(&state.id, |_, current| Arc::ptr_eq(current, state))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.submissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.submissions.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{CaseStatus, Language, Task};

    fn meta(case_counts: &[usize]) -> Meta {
        let score = 100 / case_counts.len() as u32;
        let mut tasks: Vec<Task> = case_counts
            .iter()
            .map(|&case_count| Task {
                task_score: score,
                memory_limit: 65536,
                time_limit: 1000,
                case_count,
            })
            .collect();
        tasks[0].task_score += 100 - score * case_counts.len() as u32;
        Meta::parse(
            &serde_json::json!({ "language": u8::from(Language::Python), "tasks": tasks })
                .to_string(),
        )
        .unwrap()
    }

    fn ok() -> CaseResult {
        CaseResult {
            stdout: "ok".to_string(),
            stderr: String::new(),
            exit_code: 0,
            exec_time: 1,
            memory_usage: 1,
            status: CaseStatus::AC,
        }
    }

    #[test]
    fn test_duplicate_rejected_while_registered() {
        let registry = SubmissionRegistry::new(Duration::from_secs(300));
        registry
            .register(SubmissionState::new("s1", 1, meta(&[1])))
            .unwrap();
        let err = registry
            .register(SubmissionState::new("s1", 1, meta(&[1])))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Duplicated(id) if id == "s1"));
    }

    #[test]
    fn test_reuse_after_release() {
        let registry = SubmissionRegistry::new(Duration::from_secs(300));
        let first = registry
            .register(SubmissionState::new("s1", 1, meta(&[1])))
            .unwrap();
        assert!(first.replaced.is_none());
        assert!(registry.release_if_same(&first.state));
        assert!(!registry.release_if_same(&first.state));
        registry
            .register(SubmissionState::new("s1", 1, meta(&[1])))
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_timed_out_entry_is_replaced() {
        let registry = SubmissionRegistry::new(Duration::ZERO);
        let old = registry
            .register(SubmissionState::new("s1", 1, meta(&[1])))
            .unwrap()
            .state;
        std::thread::sleep(Duration::from_millis(5));
        let registered = registry
            .register(SubmissionState::new("s1", 1, meta(&[1])))
            .unwrap();
        let new = registered.state;
        assert!(registered.replaced.is_some_and(|r| Arc::ptr_eq(&r, &old)));
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(!registry.release_if_same(&old));
        assert!(registry.release_if_same(&new));
    }

    #[test]
    fn test_completion_fires_once() {
        let state = SubmissionState::new("s1", 1, meta(&[2, 1]));
        assert_eq!(state.pending_cases().len(), 3);
        assert_eq!(state.record(CaseKey::new(0, 1), ok()), Ok(false));
        assert_eq!(state.record(CaseKey::new(1, 0), ok()), Ok(false));
        assert_eq!(
            state.record(CaseKey::new(1, 0), ok()),
            Err(RecordError::AlreadyRecorded(CaseKey::new(1, 0)))
        );
        assert_eq!(
            state.record(CaseKey::new(2, 0), ok()),
            Err(RecordError::UnknownCase(CaseKey::new(2, 0)))
        );
        assert_eq!(state.record(CaseKey::new(0, 0), ok()), Ok(true));
        assert!(state.is_completed());
        assert!(!state.settle_all(|_| CaseResult::compile_error("late")));
    }

    #[test]
    fn test_settle_all_overwrites_partial_results() {
        let state = SubmissionState::new("s1", 1, meta(&[2]));
        state.record(CaseKey::new(0, 0), ok()).unwrap();
        assert!(state.settle_all(|_| CaseResult::compile_error("make failed")));
        let results = state.results();
        assert!(
            results
                .values()
                .all(|r| r.as_ref().unwrap().status == CaseStatus::CE)
        );
    }

    #[tokio::test]
    async fn test_wait_settled_observes_later_update() {
        let state = Arc::new(SubmissionState::new("s1", 1, meta(&[1])));
        state.set_readiness(Readiness::Compiling);
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_settled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        state.set_readiness(Readiness::Ready);
        assert_eq!(waiter.await.unwrap(), Readiness::Ready);
    }
}
