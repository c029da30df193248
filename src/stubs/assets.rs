use std::path::PathBuf;

use crate::core::traits::collaborators::{AssetError, AssetProvider};

/// Serves assets already present under `<root>/<problem_id>/<asset>`.
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl AssetProvider for LocalAssetStore {
    async fn fetch(&self, problem_id: i64, asset: &str) -> Result<PathBuf, AssetError> {
        if asset.is_empty() || asset.contains("..") {
            return Err(AssetError::Fetch(format!("invalid asset name {:?}", asset)));
        }
        let path = self.root.join(problem_id.to_string()).join(asset);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(path),
            Ok(false) => Err(AssetError::NotFound {
                problem_id,
                asset: asset.to_string(),
            }),
            Err(e) => Err(AssetError::Fetch(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_from_problem_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("42").join("makefile")).unwrap();
        let store = LocalAssetStore::new(dir.path());

        let path = store.fetch(42, "makefile").await.unwrap();
        assert_eq!(path, dir.path().join("42").join("makefile"));

        let err = store.fetch(42, "teacher_file").await.unwrap_err();
        assert!(matches!(err, AssetError::NotFound { problem_id: 42, .. }));
        assert!(store.fetch(42, "../43/makefile").await.is_err());
    }
}
