//! Ownership and mode layout applied before either interactive process starts.
//!
//! The teacher tree belongs to the teacher identity and is closed to others
//! (directories are traversable only). The student tree belongs to the student
//! identity; its files may be further restricted by the allow flags, even
//! against the student itself.

use std::{
    io,
    os::unix::fs::PermissionsExt,
    path::Path,
};

use nix::unistd::{Gid, Uid, chown};

pub const TEACHER_DIR_MODE: u32 = 0o701;
pub const STUDENT_DIR_MODE: u32 = 0o751;
pub const PRIVATE_FILE_MODE: u32 = 0o600;
pub const PRIVATE_DIR_MODE: u32 = 0o700;

pub fn teacher_file_mode(executable: bool) -> u32 {
    if executable { 0o700 } else { 0o600 }
}

pub fn student_file_mode(executable: bool, allow_read: bool, allow_write: bool) -> u32 {
    if !allow_read {
        return if executable { 0o511 } else { 0o440 };
    }
    match (allow_write, executable) {
        (true, true) => 0o755,
        (true, false) => 0o644,
        (false, true) => 0o555,
        (false, false) => 0o444,
    }
}

/// Identity a tree is handed over to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    pub fn apply(&self, path: &Path) -> io::Result<()> {
        chown(
            path,
            Some(Uid::from_raw(self.uid)),
            Some(Gid::from_raw(self.gid)),
        )
        .map_err(io::Error::from)
    }
}

fn is_executable(mode: u32) -> bool {
    mode & 0o111 != 0
}

/// Recursively hands `root` over to `owner`, setting `dir_mode` on every
/// directory and `file_mode(executable)` on every file.
pub fn secure_tree<F>(root: &Path, owner: Owner, dir_mode: u32, file_mode: &F) -> io::Result<()>
where
    F: Fn(bool) -> u32,
{
    owner.apply(root)?;
    std::fs::set_permissions(root, std::fs::Permissions::from_mode(dir_mode))?;
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let meta = std::fs::symlink_metadata(&path)?;
        if meta.is_dir() {
            secure_tree(&path, owner, dir_mode, file_mode)?;
        } else if meta.is_file() {
            owner.apply(&path)?;
            let mode = file_mode(is_executable(meta.permissions().mode()));
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

pub fn secure_teacher_tree(root: &Path, owner: Owner) -> io::Result<()> {
    secure_tree(root, owner, TEACHER_DIR_MODE, &teacher_file_mode)
}

pub fn secure_student_tree(
    root: &Path,
    owner: Owner,
    allow_read: bool,
    allow_write: bool,
) -> io::Result<()> {
    secure_tree(root, owner, STUDENT_DIR_MODE, &|exec| {
        student_file_mode(exec, allow_read, allow_write)
    })
}

/// Number of regular files below `root`.
pub fn count_files(root: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(root) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(t) if t.is_dir() => count_files(&entry.path()),
            Ok(t) if t.is_file() => 1,
            _ => 0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teacher_modes() {
        assert_eq!(teacher_file_mode(true), 0o700);
        assert_eq!(teacher_file_mode(false), 0o600);
    }

    #[test]
    fn test_student_modes() {
        assert_eq!(student_file_mode(true, true, true), 0o755);
        assert_eq!(student_file_mode(false, true, true), 0o644);
        assert_eq!(student_file_mode(true, true, false), 0o555);
        assert_eq!(student_file_mode(false, true, false), 0o444);
        // Read restriction wins over write permission.
        assert_eq!(student_file_mode(true, false, true), 0o511);
        assert_eq!(student_file_mode(false, false, false), 0o440);
    }

    #[test]
    fn test_secure_tree_as_current_user() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("lib");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("data.txt"), "x").unwrap();
        std::fs::write(dir.path().join("main"), "bin").unwrap();
        std::fs::set_permissions(dir.path().join("main"), std::fs::Permissions::from_mode(0o755))
            .unwrap();

        let owner = Owner {
            uid: Uid::current().as_raw(),
            gid: Gid::current().as_raw(),
        };
        secure_student_tree(dir.path(), owner, true, false).unwrap();

        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(dir.path()), STUDENT_DIR_MODE);
        assert_eq!(mode(&nested), STUDENT_DIR_MODE);
        assert_eq!(mode(&dir.path().join("main")), 0o555);
        assert_eq!(mode(&nested.join("data.txt")), 0o444);
        assert_eq!(count_files(dir.path()), 2);

        // Restore so the tempdir can be removed.
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::set_permissions(&nested, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}
