use std::time::Duration;

use crate::core::traits::collaborators::{Backend, BackendError, SubmissionReport};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Posts finished submissions to `{api}/submission/{id}/complete`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    api: String,
}

impl HttpBackend {
    pub fn new(api: &str) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;
        Ok(Self {
            http,
            api: api.trim_end_matches('/').to_owned(),
        })
    }

    pub fn complete_url(&self, submission_id: &str) -> String {
        format!("{}/submission/{}/complete", self.api, submission_id)
    }
}

#[async_trait::async_trait]
impl Backend for HttpBackend {
    #[tracing::instrument(skip(self, report))]
    async fn complete(
        &self,
        submission_id: &str,
        report: &SubmissionReport,
    ) -> Result<(), BackendError> {
        let resp = self
            .http
            .post(self.complete_url(submission_id))
            .json(report)
            .send()
            .await
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(BackendError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
