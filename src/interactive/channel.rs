use std::{
    fmt,
    fs::File,
    io::{self, Write},
    os::{
        fd::{AsRawFd, OwnedFd},
        unix::fs::{OpenOptionsExt, PermissionsExt},
    },
    path::{Path, PathBuf},
};

use nix::{
    fcntl::{FcntlArg, FdFlag, OFlag, fcntl},
    sys::stat::Mode,
    unistd::{mkfifo, pipe},
};

use super::permissions::Owner;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum PipeMode {
    Auto,
    #[value(name = "devfd")]
    DevFd,
    Fifo,
}

impl PipeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipeMode::Auto => "auto",
            PipeMode::DevFd => "devfd",
            PipeMode::Fifo => "fifo",
        }
    }

    /// Concrete modes to try, in order. Opening a FIFO for writing can block
    /// forever when the student may not write, so FIFOs need that capability.
    pub fn candidates(&self, student_allow_write: bool) -> Vec<PipeMode> {
        match (self, student_allow_write) {
            (PipeMode::Auto, true) => vec![PipeMode::DevFd, PipeMode::Fifo],
            (PipeMode::Fifo, true) => vec![PipeMode::Fifo],
            _ => vec![PipeMode::DevFd],
        }
    }
}

impl fmt::Display for PipeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Paths one side passes to the sandbox as its stdio.
#[derive(Clone, Debug, PartialEq)]
pub struct Endpoints {
    pub stdin: String,
    pub stdout: String,
    pub stderr: PathBuf,
}

/// Anonymous pipe pair inherited by both children as `/dev/fd/N`.
#[derive(Debug)]
pub struct AnonymousPipe {
    student: Endpoints,
    teacher: Endpoints,
    inherited: Vec<OwnedFd>,
    kick_source: Option<OwnedFd>,
    kick: Option<File>,
}

/// Named FIFOs in the private temp dir, kept openable by holder descriptors.
#[derive(Debug)]
pub struct FifoPair {
    student: Endpoints,
    teacher: Endpoints,
    holders: Vec<File>,
    kick: Option<File>,
}

/// Student/teacher stdio wiring.
#[derive(Debug)]
pub enum PipeChannel {
    AnonymousPipe(AnonymousPipe),
    Fifo(FifoPair),
}

fn inheritable(fd: &OwnedFd) -> io::Result<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::empty()))?;
    Ok(())
}

fn dev_fd(fd: &OwnedFd) -> String {
    format!("/dev/fd/{}", fd.as_raw_fd())
}

impl PipeChannel {
    /// Opens a channel of a concrete mode (`Auto` is resolved by the caller).
    pub fn open(mode: PipeMode, tmpdir: &Path, owner: Owner) -> io::Result<Self> {
        match mode {
            PipeMode::Fifo => Self::open_fifo(tmpdir, owner),
            PipeMode::DevFd | PipeMode::Auto => Self::open_anonymous(tmpdir),
        }
    }

    fn open_anonymous(tmpdir: &Path) -> io::Result<Self> {
        let (s2t_r, s2t_w) = pipe()?;
        let (t2s_r, t2s_w) = pipe()?;
        for fd in [&s2t_r, &s2t_w, &t2s_r, &t2s_w] {
            inheritable(fd)?;
        }
        let student = Endpoints {
            stdin: dev_fd(&t2s_r),
            stdout: dev_fd(&s2t_w),
            stderr: tmpdir.join("student.err"),
        };
        let teacher = Endpoints {
            stdin: dev_fd(&s2t_r),
            stdout: dev_fd(&t2s_w),
            stderr: tmpdir.join("teacher.err"),
        };
        let kick_source = s2t_w.try_clone()?;
        Ok(PipeChannel::AnonymousPipe(AnonymousPipe {
            student,
            teacher,
            inherited: vec![s2t_r, s2t_w, t2s_r, t2s_w],
            kick_source: Some(kick_source),
            kick: None,
        }))
    }

    fn open_fifo(tmpdir: &Path, owner: Owner) -> io::Result<Self> {
        let s2t = tmpdir.join("s2t.fifo");
        let t2s = tmpdir.join("t2s.fifo");
        let mode = Mode::from_bits_truncate(0o660);
        mkfifo(&s2t, mode)?;
        mkfifo(&t2s, mode)?;
        for fifo in [&s2t, &t2s] {
            if let Err(e) = owner
                .apply(fifo)
                .and_then(|_| std::fs::set_permissions(fifo, std::fs::Permissions::from_mode(0o660)))
            {
                tracing::warn!("failed to hand over {}: {}", fifo.display(), e);
            }
        }
        // Read-write holders keep either side's open() from blocking.
        let holder = |path: &Path| {
            std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(OFlag::O_NONBLOCK.bits())
                .open(path)
        };
        let holders = vec![holder(&s2t)?, holder(&t2s)?];

        let path = |p: &PathBuf| p.to_string_lossy().into_owned();
        Ok(PipeChannel::Fifo(FifoPair {
            student: Endpoints {
                stdin: path(&t2s),
                stdout: path(&s2t),
                stderr: tmpdir.join("s2t.err"),
            },
            teacher: Endpoints {
                stdin: path(&s2t),
                stdout: path(&t2s),
                stderr: tmpdir.join("t2s.err"),
            },
            holders,
            kick: None,
        }))
    }

    pub fn mode(&self) -> PipeMode {
        match self {
            PipeChannel::AnonymousPipe(_) => PipeMode::DevFd,
            PipeChannel::Fifo(_) => PipeMode::Fifo,
        }
    }

    pub fn student(&self) -> &Endpoints {
        match self {
            PipeChannel::AnonymousPipe(p) => &p.student,
            PipeChannel::Fifo(f) => &f.student,
        }
    }

    pub fn teacher(&self) -> &Endpoints {
        match self {
            PipeChannel::AnonymousPipe(p) => &p.teacher,
            PipeChannel::Fifo(f) => &f.teacher,
        }
    }

    /// Called once both sides are spawned: closes every descriptor the parent
    /// only held for the children, keeping one writer on the teacher's input
    /// for [`PipeChannel::kick_teacher`].
    pub fn release_spawn_fds(&mut self) -> io::Result<()> {
        match self {
            PipeChannel::AnonymousPipe(p) => {
                p.kick = p.kick_source.take().map(File::from);
                p.inherited.clear();
            }
            PipeChannel::Fifo(f) => {
                if let Some(first) = f.holders.first() {
                    f.kick = Some(first.try_clone()?);
                }
                f.holders.clear();
            }
        }
        Ok(())
    }

    /// Unblocks a teacher still reading after the student exited: writes a
    /// single newline to the teacher's input and closes the last writer.
    /// Returns `false` if the kick was already spent.
    pub fn kick_teacher(&mut self) -> io::Result<bool> {
        let kick = match self {
            PipeChannel::AnonymousPipe(p) => p.kick.take(),
            PipeChannel::Fifo(f) => f.kick.take(),
        };
        match kick {
            Some(mut writer) => {
                writer.write_all(b"\n")?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{Gid, Uid};
    use std::io::Read;

    fn current_owner() -> Owner {
        Owner {
            uid: Uid::current().as_raw(),
            gid: Gid::current().as_raw(),
        }
    }

    #[test]
    fn test_candidates() {
        assert_eq!(PipeMode::Auto.candidates(false), vec![PipeMode::DevFd]);
        assert_eq!(
            PipeMode::Auto.candidates(true),
            vec![PipeMode::DevFd, PipeMode::Fifo]
        );
        assert_eq!(PipeMode::Fifo.candidates(false), vec![PipeMode::DevFd]);
        assert_eq!(PipeMode::Fifo.candidates(true), vec![PipeMode::Fifo]);
    }

    #[test]
    fn test_anonymous_pipe_kick_reaches_teacher_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = PipeChannel::open(PipeMode::DevFd, dir.path(), current_owner()).unwrap();
        assert_eq!(channel.mode(), PipeMode::DevFd);
        assert!(channel.student().stdout.starts_with("/dev/fd/"));

        let mut teacher_in = File::open(&channel.teacher().stdin).unwrap();
        channel.release_spawn_fds().unwrap();
        assert!(channel.kick_teacher().unwrap());
        assert!(!channel.kick_teacher().unwrap());

        let mut received = Vec::new();
        teacher_in.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"\n");
    }

    #[test]
    fn test_fifo_kick_reaches_teacher_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = PipeChannel::open(PipeMode::Fifo, dir.path(), current_owner()).unwrap();
        assert_eq!(channel.mode(), PipeMode::Fifo);
        assert!(dir.path().join("s2t.fifo").exists());
        assert_eq!(channel.student().stdout, channel.teacher().stdin);

        let mut teacher_in = File::open(&channel.teacher().stdin).unwrap();
        channel.release_spawn_fds().unwrap();
        assert!(channel.kick_teacher().unwrap());

        let mut received = Vec::new();
        teacher_in.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"\n");
    }
}
