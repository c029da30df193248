use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use itertools::Itertools;

use crate::{
    core::{
        domain::{CaseKey, CaseResult},
        registry::SubmissionState,
        traits::collaborators::{Backend, SubmissionReport},
    },
    storage::SubmissionStore,
};

/// Orders results task-major, one list per task.
pub fn assemble_tasks(results: BTreeMap<CaseKey, Option<CaseResult>>) -> Vec<Vec<CaseResult>> {
    let by_task = results.into_iter().chunk_by(|(key, _)| key.task);
    by_task
        .into_iter()
        .map(|(_, cases)| {
            cases
                .map(|(key, result)| {
                    result.unwrap_or_else(|| CaseResult::judge_error(format!("case {} has no result", key)))
                })
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// Backend accepted the report and the tree was removed.
    Delivered,
    /// Backend did not accept it; the tree was kept here.
    BackedUp(PathBuf),
    /// Neither delivery nor backup succeeded.
    Lost,
}

#[derive(Debug, Clone)]
pub struct Reporter {
    backend: Arc<dyn Backend>,
    store: SubmissionStore,
    token: String,
}

impl Reporter {
    pub fn new(backend: Arc<dyn Backend>, store: SubmissionStore, token: String) -> Self {
        Self {
            backend,
            store,
            token,
        }
    }

    pub fn build_report(&self, state: &SubmissionState) -> SubmissionReport {
        SubmissionReport {
            tasks: assemble_tasks(state.results()),
            token: self.token.clone(),
            static_analysis: state.take_analysis_payload(),
        }
    }

    #[tracing::instrument(skip(self, state), fields(submission_id = %state.id))]
    pub async fn deliver(&self, state: &SubmissionState) -> ReportOutcome {
        let report = self.build_report(state);
        let store = self.store.clone();
        let id = state.id.clone();

        match self.backend.complete(&state.id, &report).await {
            Ok(()) => {
                tracing::info!("report delivered");
                let cleaned = tokio::task::spawn_blocking(move || store.clean(&id)).await;
                if !matches!(cleaned, Ok(Ok(()))) {
                    tracing::warn!("failed to clean submission tree: {:?}", cleaned);
                }
                ReportOutcome::Delivered
            }
            Err(e) => {
                tracing::warn!("report not delivered, backing up: {}", e);
                match tokio::task::spawn_blocking(move || store.backup(&id)).await {
                    Ok(Ok(path)) => ReportOutcome::BackedUp(path),
                    other => {
                        tracing::error!("backup failed: {:?}", other);
                        ReportOutcome::Lost
                    }
                }
            }
        }
    }
}
