use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::Local;

/// On-disk layout of one submission: `<root>/<id>/{meta.json, src/, testcase/, teacher/}`.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionPaths {
    /// Directory as seen by this process.
    pub local: PathBuf,
    /// Same directory as seen by the container runtime, used for bind mounts.
    pub host: PathBuf,
}

impl SubmissionPaths {
    pub fn meta(&self) -> PathBuf {
        self.local.join("meta.json")
    }

    pub fn src(&self) -> PathBuf {
        self.local.join("src")
    }

    pub fn testcase(&self) -> PathBuf {
        self.local.join("testcase")
    }

    pub fn teacher(&self) -> PathBuf {
        self.local.join("teacher")
    }

    pub fn host_src(&self) -> PathBuf {
        self.host.join("src")
    }

    pub fn host_testcase(&self) -> PathBuf {
        self.host.join("testcase")
    }

    pub fn host_teacher(&self) -> PathBuf {
        self.host.join("teacher")
    }
}

#[derive(Clone, Debug)]
pub struct SubmissionStore {
    root: PathBuf,
    host_root: PathBuf,
    backup_root: PathBuf,
}

impl SubmissionStore {
    pub fn new(root: impl Into<PathBuf>, host_root: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            host_root: host_root.into(),
            backup_root: backup_root.into(),
        }
    }

    pub fn paths(&self, submission_id: &str) -> SubmissionPaths {
        SubmissionPaths {
            local: self.root.join(submission_id),
            host: self.host_root.join(submission_id),
        }
    }

    /// Deletes the submission tree once the backend accepted the report.
    pub fn clean(&self, submission_id: &str) -> io::Result<()> {
        std::fs::remove_dir_all(self.root.join(submission_id))
    }

    /// Moves the submission tree aside after the backend refused the report.
    pub fn backup(&self, submission_id: &str) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.backup_root)?;
        let dest = self.backup_root.join(format!(
            "{}_{}",
            submission_id,
            Local::now().format("%Y-%m-%d_%H:%M:%S")
        ));
        let src = self.root.join(submission_id);
        if std::fs::rename(&src, &dest).is_err() {
            // Cross-device moves need a copy.
            copy_tree(&src, &dest)?;
            std::fs::remove_dir_all(&src)?;
        }
        Ok(dest)
    }
}

/// Recursively copies `src` into `dest`, creating `dest` if needed.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_layout() {
        let store = SubmissionStore::new("/local", "/host", "/bk");
        let paths = store.paths("abc");
        assert_eq!(paths.meta(), PathBuf::from("/local/abc/meta.json"));
        assert_eq!(paths.testcase(), PathBuf::from("/local/abc/testcase"));
        assert_eq!(paths.host_src(), PathBuf::from("/host/abc/src"));
    }

    #[test]
    fn test_backup_moves_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubmissionStore::new(dir.path().join("subs"), "/host", dir.path().join("bk"));
        let sub = dir.path().join("subs").join("s1").join("src");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("main.py"), "print(1)").unwrap();

        let dest = store.backup("s1").unwrap();
        assert!(dest.join("src").join("main.py").exists());
        assert!(!dir.path().join("subs").join("s1").exists());
        assert!(
            dest.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("s1_")
        );
    }

    #[test]
    fn test_clean_removes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubmissionStore::new(dir.path(), dir.path(), dir.path().join("bk"));
        std::fs::create_dir_all(dir.path().join("s1").join("testcase")).unwrap();
        store.clean("s1").unwrap();
        assert!(!dir.path().join("s1").exists());
    }
}
