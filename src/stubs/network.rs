use crate::core::{
    domain::Meta,
    traits::collaborators::{NetworkError, NetworkProvisioner},
};

/// Runs every case without network access and starts no sidecars.
#[derive(Debug, Clone, Default)]
pub struct IsolatedNetwork;

#[async_trait::async_trait]
impl NetworkProvisioner for IsolatedNetwork {
    async fn provision(&self, submission_id: &str, meta: &Meta) -> Result<String, NetworkError> {
        if !meta.sidecars.is_empty() || meta.network_access_restriction.is_some() {
            tracing::warn!(
                submission_id,
                sidecars = meta.sidecars.len(),
                "network restrictions requested but not provisioned, running isolated"
            );
        }
        Ok("none".to_string())
    }

    async fn teardown(&self, _submission_id: &str) {}
}
