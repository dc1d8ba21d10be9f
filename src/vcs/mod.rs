//! Local version control: the working copy a release is assembled in.
//!
//! [`LocalVcs`] is a thin command runner. Implementations report raw
//! [`CommandOutput`] (stdout, stderr, exit code) and never decide what a
//! non-zero exit means; [`Workspace`] does that, and redacts credentials from
//! anything it surfaces.

mod cli;
mod credential;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use cli::{GitCli, git_command};
pub use credential::Credential;

use crate::types::Sha;

/// Errors from local version control operations.
#[derive(Debug, Error)]
pub enum VcsError {
    /// A command exited non-zero. Output is already redacted.
    #[error("{command} exited with {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("unexpected output from {command}: {output}")]
    UnexpectedOutput { command: String, output: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type VcsResult<T> = Result<T, VcsError>;

/// Raw result of running one command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the process was killed by a signal.
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        CommandOutput {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        CommandOutput {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// How a push treats the remote branch's current value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMode {
    /// Fast-forward only.
    Normal,
    /// Overwrite with `source`, but only if the remote still points at
    /// `expected`.
    ForceWithLease { expected: Sha, source: String },
}

/// Identity used for commits, passed per command via `-c` flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

/// Local version control commands.
///
/// Every method runs exactly one logical operation in `workdir` (or creates
/// `dest`) and reports what the tool printed. `Err` is reserved for failing to
/// run the tool at all.
pub trait LocalVcs: Send + Sync {
    fn clone_repo(&self, url: &str, dest: &Path) -> io::Result<CommandOutput>;

    /// Fetches `refspec` from `origin`.
    fn fetch(&self, workdir: &Path, refspec: &str) -> io::Result<CommandOutput>;

    fn checkout(&self, workdir: &Path, rev: &str) -> io::Result<CommandOutput>;

    /// Creates (or resets) `branch` at `start` and checks it out.
    fn create_branch(&self, workdir: &Path, branch: &str, start: &str)
    -> io::Result<CommandOutput>;

    fn delete_local_branch(&self, workdir: &Path, branch: &str) -> io::Result<CommandOutput>;

    /// Stages every change and commits it.
    fn commit_all(
        &self,
        workdir: &Path,
        message: &str,
        identity: &CommitIdentity,
    ) -> io::Result<CommandOutput>;

    /// Pushes to `refs/heads/{branch}` on `origin`: `HEAD` for a normal push,
    /// the lease's `source` rev otherwise.
    fn push(&self, workdir: &Path, branch: &str, mode: &PushMode) -> io::Result<CommandOutput>;

    fn reset_hard(&self, workdir: &Path, rev: &str) -> io::Result<CommandOutput>;

    fn rev_parse(&self, workdir: &Path, rev: &str) -> io::Result<CommandOutput>;

    /// Prints the contents of `path` as of `rev`.
    fn show_file(&self, workdir: &Path, rev: &str, path: &str) -> io::Result<CommandOutput>;
}

/// A working copy driven through a [`LocalVcs`].
///
/// Turns raw command output into results: a non-zero exit becomes
/// [`VcsError::CommandFailed`] with the credential scrubbed from it.
pub struct Workspace<'a, V: LocalVcs> {
    vcs: &'a V,
    dir: PathBuf,
    credential: &'a Credential,
}

impl<'a, V: LocalVcs> Workspace<'a, V> {
    pub fn new(vcs: &'a V, dir: impl Into<PathBuf>, credential: &'a Credential) -> Self {
        Workspace {
            vcs,
            dir: dir.into(),
            credential,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn check(&self, command: String, output: io::Result<CommandOutput>) -> VcsResult<String> {
        let output = output?;
        if output.success() {
            return Ok(output.stdout);
        }
        let command = self.credential.redact(&command);
        let stderr = self.credential.redact(output.stderr.trim());
        tracing::debug!(%command, exit_code = output.exit_code, %stderr, "command failed");
        Err(VcsError::CommandFailed {
            command,
            exit_code: output.exit_code,
            stderr,
        })
    }

    /// Clones `url` (with the credential injected) into this workspace's directory.
    pub fn clone_from(&self, url: &str) -> VcsResult<()> {
        let authed = self.credential.inject(url);
        self.check(
            format!("git clone {}", authed),
            self.vcs.clone_repo(&authed, &self.dir),
        )?;
        Ok(())
    }

    pub fn fetch(&self, refspec: &str) -> VcsResult<()> {
        self.check(
            format!("git fetch origin {}", refspec),
            self.vcs.fetch(&self.dir, refspec),
        )?;
        Ok(())
    }

    pub fn checkout(&self, rev: &str) -> VcsResult<()> {
        self.check(
            format!("git checkout {}", rev),
            self.vcs.checkout(&self.dir, rev),
        )?;
        Ok(())
    }

    pub fn create_branch(&self, branch: &str, start: &str) -> VcsResult<()> {
        self.check(
            format!("git checkout -B {} {}", branch, start),
            self.vcs.create_branch(&self.dir, branch, start),
        )?;
        Ok(())
    }

    pub fn delete_local_branch(&self, branch: &str) -> VcsResult<()> {
        self.check(
            format!("git branch -D {}", branch),
            self.vcs.delete_local_branch(&self.dir, branch),
        )?;
        Ok(())
    }

    pub fn commit_all(&self, message: &str, identity: &CommitIdentity) -> VcsResult<()> {
        self.check(
            "git commit".to_string(),
            self.vcs.commit_all(&self.dir, message, identity),
        )?;
        Ok(())
    }

    pub fn push(&self, branch: &str, mode: &PushMode) -> VcsResult<()> {
        let source = match mode {
            PushMode::Normal => "HEAD",
            PushMode::ForceWithLease { source, .. } => source.as_str(),
        };
        self.check(
            format!("git push origin {}:refs/heads/{}", source, branch),
            self.vcs.push(&self.dir, branch, mode),
        )?;
        Ok(())
    }

    pub fn reset_hard(&self, rev: &str) -> VcsResult<()> {
        self.check(
            format!("git reset --hard {}", rev),
            self.vcs.reset_hard(&self.dir, rev),
        )?;
        Ok(())
    }

    pub fn rev_parse(&self, rev: &str) -> VcsResult<Sha> {
        let command = format!("git rev-parse {}", rev);
        let stdout = self.check(command.clone(), self.vcs.rev_parse(&self.dir, rev))?;
        Sha::parse(stdout.trim()).map_err(|_| VcsError::UnexpectedOutput {
            command,
            output: stdout.trim().to_string(),
        })
    }

    pub fn show_file(&self, rev: &str, path: &str) -> VcsResult<String> {
        self.check(
            format!("git show {}:{}", rev, path),
            self.vcs.show_file(&self.dir, rev, path),
        )
    }
}
