//! [`LocalVcs`] backed by the `git` binary.

use std::io;
use std::path::Path;
use std::process::{Command, Output};

use super::{CommandOutput, CommitIdentity, LocalVcs, PushMode};

/// Creates a git command with a clean environment (no system or user config,
/// no terminal prompts).
pub fn git_command(workdir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd
}

fn capture(output: Output) -> CommandOutput {
    CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    }
}

/// Runs `git` as a subprocess.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        GitCli
    }

    fn run(&self, workdir: &Path, args: &[&str]) -> io::Result<CommandOutput> {
        git_command(workdir).args(args).output().map(capture)
    }
}

impl LocalVcs for GitCli {
    fn clone_repo(&self, url: &str, dest: &Path) -> io::Result<CommandOutput> {
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let dest = dest.to_string_lossy();
        self.run(parent, &["clone", "--no-tags", url, &dest])
    }

    fn fetch(&self, workdir: &Path, refspec: &str) -> io::Result<CommandOutput> {
        self.run(workdir, &["fetch", "origin", refspec])
    }

    fn checkout(&self, workdir: &Path, rev: &str) -> io::Result<CommandOutput> {
        self.run(workdir, &["checkout", rev])
    }

    fn create_branch(
        &self,
        workdir: &Path,
        branch: &str,
        start: &str,
    ) -> io::Result<CommandOutput> {
        self.run(workdir, &["checkout", "-B", branch, start])
    }

    fn delete_local_branch(&self, workdir: &Path, branch: &str) -> io::Result<CommandOutput> {
        // A branch cannot be deleted while checked out.
        let detach = self.run(workdir, &["checkout", "--detach"])?;
        if !detach.success() {
            return Ok(detach);
        }
        self.run(workdir, &["branch", "-D", branch])
    }

    fn commit_all(
        &self,
        workdir: &Path,
        message: &str,
        identity: &CommitIdentity,
    ) -> io::Result<CommandOutput> {
        let add = self.run(workdir, &["add", "--all"])?;
        if !add.success() {
            return Ok(add);
        }
        git_command(workdir)
            .arg("-c")
            .arg(format!("user.name={}", identity.name))
            .arg("-c")
            .arg(format!("user.email={}", identity.email))
            .args(["commit", "-m", message])
            .output()
            .map(capture)
    }

    fn push(&self, workdir: &Path, branch: &str, mode: &PushMode) -> io::Result<CommandOutput> {
        match mode {
            PushMode::Normal => {
                let refspec = format!("HEAD:refs/heads/{}", branch);
                self.run(workdir, &["push", "origin", &refspec])
            }
            PushMode::ForceWithLease { expected, source } => {
                let refspec = format!("{}:refs/heads/{}", source, branch);
                let lease = format!("--force-with-lease=refs/heads/{}:{}", branch, expected);
                self.run(workdir, &["push", &lease, "origin", &refspec])
            }
        }
    }

    fn reset_hard(&self, workdir: &Path, rev: &str) -> io::Result<CommandOutput> {
        self.run(workdir, &["reset", "--hard", rev])
    }

    fn rev_parse(&self, workdir: &Path, rev: &str) -> io::Result<CommandOutput> {
        self.run(workdir, &["rev-parse", "--verify", rev])
    }

    fn show_file(&self, workdir: &Path, rev: &str, path: &str) -> io::Result<CommandOutput> {
        self.run(workdir, &["show", &format!("{}:{}", rev, path)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::{Credential, Workspace};
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let out = git_command(dir).args(args).output().unwrap();
        assert!(
            out.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
    }

    fn identity() -> CommitIdentity {
        CommitIdentity {
            name: "Test".to_string(),
            email: "test@test.com".to_string(),
        }
    }

    /// A bare "remote" with one commit on `main` containing a VERSION file.
    fn create_remote() -> (TempDir, std::path::PathBuf) {
        let temp = TempDir::new().unwrap();
        let remote = temp.path().join("remote.git");
        std::fs::create_dir_all(&remote).unwrap();
        git(&remote, &["init", "--bare"]);
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        let seed = temp.path().join("seed");
        std::fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init"]);
        std::fs::write(seed.join("VERSION"), "1.2.3\n").unwrap();
        git(&seed, &["add", "."]);
        git(
            &seed,
            &["-c", "user.name=T", "-c", "user.email=t@t", "commit", "-m", "init"],
        );
        git(&seed, &["remote", "add", "origin", remote.to_str().unwrap()]);
        git(&seed, &["push", "origin", "HEAD:refs/heads/main"]);

        (temp, remote)
    }

    #[test]
    fn clone_branch_commit_push_round() {
        let (temp, remote) = create_remote();
        let cli = GitCli::new();
        let cred = Credential::new("unused");
        let ws = Workspace::new(&cli, temp.path().join("work"), &cred);

        ws.clone_from(remote.to_str().unwrap()).unwrap();
        ws.fetch("main").unwrap();
        ws.create_branch("release-20260101", "origin/main").unwrap();
        let before = ws.rev_parse("HEAD").unwrap();

        std::fs::write(ws.dir().join("VERSION"), "1.2.4\n").unwrap();
        ws.commit_all("Bump version to 1.2.4", &identity()).unwrap();
        ws.push("release-20260101", &PushMode::Normal).unwrap();

        let after = ws.rev_parse("HEAD").unwrap();
        assert_ne!(before, after);
        assert_eq!(ws.show_file("origin/main", "VERSION").unwrap(), "1.2.3\n");

        ws.fetch("release-20260101").unwrap();
        assert_eq!(ws.rev_parse("origin/release-20260101").unwrap(), after);
    }

    #[test]
    fn force_with_lease_restores_previous_tip() {
        let (temp, remote) = create_remote();
        let cli = GitCli::new();
        let cred = Credential::new("unused");
        let ws = Workspace::new(&cli, temp.path().join("work"), &cred);

        ws.clone_from(remote.to_str().unwrap()).unwrap();
        ws.create_branch("rel", "origin/main").unwrap();
        let original = ws.rev_parse("HEAD").unwrap();
        ws.push("rel", &PushMode::Normal).unwrap();

        std::fs::write(ws.dir().join("VERSION"), "9.9.9\n").unwrap();
        ws.commit_all("bump", &identity()).unwrap();
        let bumped = ws.rev_parse("HEAD").unwrap();
        ws.push("rel", &PushMode::Normal).unwrap();

        let lease = PushMode::ForceWithLease {
            expected: bumped,
            source: original.to_string(),
        };
        ws.push("rel", &lease).unwrap();
        ws.fetch("rel").unwrap();
        assert_eq!(ws.rev_parse("origin/rel").unwrap(), original);
    }

    #[test]
    fn delete_local_branch_detaches_first() {
        let (temp, remote) = create_remote();
        let cli = GitCli::new();
        let cred = Credential::new("unused");
        let ws = Workspace::new(&cli, temp.path().join("work"), &cred);

        ws.clone_from(remote.to_str().unwrap()).unwrap();
        ws.create_branch("rel", "origin/main").unwrap();
        ws.delete_local_branch("rel").unwrap();
        assert!(ws.rev_parse("refs/heads/rel").is_err());
    }

    #[test]
    fn failure_reports_exit_code() {
        let (temp, remote) = create_remote();
        let cli = GitCli::new();
        let cred = Credential::new("unused");
        let ws = Workspace::new(&cli, temp.path().join("work"), &cred);
        ws.clone_from(remote.to_str().unwrap()).unwrap();

        let err = ws.show_file("origin/main", "missing.txt").unwrap_err();
        assert!(matches!(
            err,
            crate::vcs::VcsError::CommandFailed { exit_code, .. } if exit_code != 0
        ));
    }
}
