//! Shared test utilities: in-memory host and VCS doubles and builders.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use crate::events::{EventSink, ReleaseEvent};
use crate::host::{HostError, HostResult, NewPullRequest, RemoteHost};
use crate::types::{
    CandidateChange, CandidateState, CheckRun, CheckStatus, CompareStatus, Mergeability, PrNumber,
    Review, ReviewState, Sha,
};
use crate::vcs::{CommandOutput, CommitIdentity, LocalVcs, PushMode};

// ─────────────────────────────────────────────────────────────────────────────
// Builders
// ─────────────────────────────────────────────────────────────────────────────

pub fn make_sha(n: u64) -> Sha {
    Sha::parse(format!("{:0>40x}", n)).unwrap()
}

/// An open, mergeable candidate on branch `feature-{n}` targeting `base`.
pub fn open_candidate(n: u64, base: &str) -> CandidateChange {
    CandidateChange {
        number: PrNumber(n),
        title: format!("Change {}", n),
        head_ref: format!("feature-{}", n),
        head_sha: make_sha(n),
        base_ref: base.to_string(),
        state: CandidateState::Open,
        mergeable: Mergeability::Mergeable,
    }
}

pub fn passing_check(name: &str) -> CheckRun {
    CheckRun {
        name: name.to_string(),
        status: CheckStatus::Completed,
        conclusion: Some("success".to_string()),
    }
}

fn at_minute(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 18, 9, 0, 0).unwrap() + chrono::Duration::minutes(minute as i64)
}

/// A review submitted `minute` minutes into a fixed morning.
pub fn review(reviewer: &str, state: ReviewState, minute: u32) -> Review {
    Review {
        reviewer: reviewer.to_string(),
        state,
        submitted_at: Some(at_minute(minute)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event sink
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ReleaseEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ReleaseEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ReleaseEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MockHost
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct HostState {
    candidates: BTreeMap<u64, CandidateChange>,
    reviews: HashMap<u64, Vec<Review>>,
    checks: HashMap<String, Vec<CheckRun>>,
    branches: BTreeSet<String>,
    compare: HashMap<(String, String), CompareStatus>,
    /// Answers for successive `get_candidate` calls; the stored flag is used
    /// once a script runs out.
    mergeable_scripts: HashMap<u64, VecDeque<Mergeability>>,
    /// Stale `get_candidate` reads still owed before a requested branch
    /// update lands.
    pending_updates: HashMap<u64, u32>,
    update_lag: HashMap<u64, u32>,
    /// Keyed by operation (`merge`) or operation plus target (`merge #12`).
    failures: HashMap<String, VecDeque<HostError>>,
    calls: Vec<String>,
    descriptions: HashMap<u64, String>,
    review_requests: HashMap<u64, Vec<String>>,
    merge_order: Vec<PrNumber>,
    next_pr: u64,
}

/// An in-memory remote host.
///
/// Every call is recorded as `"{op} {target}"`, e.g. `"list_reviews #12"`.
pub struct MockHost {
    state: Mutex<HostState>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    pub fn new() -> Self {
        MockHost {
            state: Mutex::new(HostState {
                next_pr: 1000,
                ..HostState::default()
            }),
        }
    }

    pub fn add_candidate(&self, candidate: CandidateChange) {
        let mut state = self.state.lock().unwrap();
        state.candidates.insert(candidate.number.0, candidate);
    }

    pub fn candidate(&self, pr: u64) -> Option<CandidateChange> {
        self.state.lock().unwrap().candidates.get(&pr).cloned()
    }

    /// Adds a candidate that was merged into `base` at `minute`.
    pub fn add_merged(&self, n: u64, base: &str, minute: u32) {
        let mut candidate = open_candidate(n, base);
        candidate.state = CandidateState::Merged {
            merge_commit_sha: make_sha(0x10_000 + n),
            merged_at: Some(at_minute(minute)),
        };
        self.add_candidate(candidate);
    }

    pub fn set_reviews(&self, pr: u64, reviews: Vec<Review>) {
        self.state.lock().unwrap().reviews.insert(pr, reviews);
    }

    pub fn set_checks(&self, git_ref: &str, runs: Vec<CheckRun>) {
        self.state
            .lock()
            .unwrap()
            .checks
            .insert(git_ref.to_string(), runs);
    }

    pub fn add_branch(&self, branch: &str) {
        self.state
            .lock()
            .unwrap()
            .branches
            .insert(branch.to_string());
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        self.state.lock().unwrap().branches.contains(branch)
    }

    pub fn set_compare(&self, base: &str, head: &str, status: CompareStatus) {
        self.state
            .lock()
            .unwrap()
            .compare
            .insert((base.to_string(), head.to_string()), status);
    }

    pub fn script_mergeable(&self, pr: u64, answers: Vec<Mergeability>) {
        self.state
            .lock()
            .unwrap()
            .mergeable_scripts
            .insert(pr, answers.into());
    }

    pub fn set_mergeable(&self, pr: u64, mergeable: Mergeability) {
        if let Some(c) = self.state.lock().unwrap().candidates.get_mut(&pr) {
            c.mergeable = mergeable;
        }
    }

    /// Makes the next branch update for `pr` land only after `reads`
    /// `get_candidate` calls have returned the old head.
    pub fn set_update_lag(&self, pr: u64, reads: u32) {
        self.state.lock().unwrap().update_lag.insert(pr, reads);
    }

    pub fn set_head(&self, pr: u64, sha: Sha) {
        if let Some(c) = self.state.lock().unwrap().candidates.get_mut(&pr) {
            c.head_sha = sha;
        }
    }

    pub fn set_state(&self, pr: u64, new_state: CandidateState) {
        if let Some(c) = self.state.lock().unwrap().candidates.get_mut(&pr) {
            c.state = new_state;
        }
    }

    /// Makes the next matching call fail. `key` is an operation name, an
    /// operation plus its first target word, or the full call, e.g. `"merge"`,
    /// `"merge #12"` or `"retarget #12 main"`.
    pub fn fail_next(&self, key: &str, error: HostError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(key.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, call: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == call)
            .count()
    }

    pub fn merge_order(&self) -> Vec<PrNumber> {
        self.state.lock().unwrap().merge_order.clone()
    }

    pub fn description(&self, pr: u64) -> Option<String> {
        self.state.lock().unwrap().descriptions.get(&pr).cloned()
    }

    pub fn review_requests(&self, pr: u64) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .review_requests
            .get(&pr)
            .cloned()
            .unwrap_or_default()
    }

    /// Records the call and pops a scripted failure for it, if any.
    fn enter(&self, op: &str, target: &str) -> Result<std::sync::MutexGuard<'_, HostState>, HostError> {
        let mut state = self.state.lock().unwrap();
        let call = if target.is_empty() {
            op.to_string()
        } else {
            format!("{} {}", op, target)
        };
        let first_word = target.split(' ').next().unwrap_or_default();
        let targeted = format!("{} {}", op, first_word);
        let scripted = [call.as_str(), targeted.as_str(), op]
            .into_iter()
            .find_map(|key| state.failures.get_mut(key).and_then(|q| q.pop_front()));
        state.calls.push(call);
        match scripted {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }
}

/// The head a candidate's branch moves to once an update lands.
pub fn updated_head(pr: PrNumber) -> Sha {
    make_sha(0x40_000 + pr.0)
}

fn missing_pr(pr: PrNumber) -> HostError {
    HostError::not_found(format!("pull request {} not found", pr))
}

impl RemoteHost for MockHost {
    async fn get_candidate(&self, pr: PrNumber) -> HostResult<CandidateChange> {
        let mut state = self.enter("get_candidate", &pr.to_string())?;
        if let Some(owed) = state.pending_updates.get_mut(&pr.0) {
            if *owed == 0 {
                state.pending_updates.remove(&pr.0);
                if let Some(c) = state.candidates.get_mut(&pr.0) {
                    c.head_sha = updated_head(pr);
                }
            } else {
                *owed -= 1;
            }
        }
        let scripted = state
            .mergeable_scripts
            .get_mut(&pr.0)
            .and_then(|q| q.pop_front());
        let mut candidate = state
            .candidates
            .get(&pr.0)
            .cloned()
            .ok_or_else(|| missing_pr(pr))?;
        if let Some(m) = scripted {
            candidate.mergeable = m;
        }
        Ok(candidate)
    }

    async fn list_candidates(&self, base: &str) -> HostResult<Vec<CandidateChange>> {
        let state = self.enter("list_candidates", base)?;
        Ok(state
            .candidates
            .values()
            .filter(|c| c.state.is_open() && c.base_ref == base)
            .cloned()
            .collect())
    }

    async fn list_merged_targeting(&self, branch: &str) -> HostResult<Vec<CandidateChange>> {
        let state = self.enter("list_merged_targeting", branch)?;
        // Reverse order: callers must not rely on what the host returns.
        Ok(state
            .candidates
            .values()
            .rev()
            .filter(|c| c.state.is_merged() && c.base_ref == branch)
            .cloned()
            .collect())
    }

    async fn find_open(&self, head: &str, base: &str) -> HostResult<Option<CandidateChange>> {
        let state = self.enter("find_open", &format!("{} {}", head, base))?;
        Ok(state
            .candidates
            .values()
            .find(|c| c.state.is_open() && c.head_ref == head && c.base_ref == base)
            .cloned())
    }

    async fn list_reviews(&self, pr: PrNumber) -> HostResult<Vec<Review>> {
        let state = self.enter("list_reviews", &pr.to_string())?;
        Ok(state.reviews.get(&pr.0).cloned().unwrap_or_default())
    }

    async fn get_ci_checks(&self, git_ref: &str) -> HostResult<Vec<CheckRun>> {
        let state = self.enter("get_ci_checks", git_ref)?;
        Ok(state.checks.get(git_ref).cloned().unwrap_or_default())
    }

    async fn branch_exists(&self, branch: &str) -> HostResult<bool> {
        let state = self.enter("branch_exists", branch)?;
        Ok(state.branches.contains(branch))
    }

    async fn compare(&self, base: &str, head: &str) -> HostResult<CompareStatus> {
        let state = self.enter("compare", &format!("{}...{}", base, head))?;
        Ok(state
            .compare
            .get(&(base.to_string(), head.to_string()))
            .copied()
            .unwrap_or(CompareStatus::Ahead))
    }

    async fn retarget(&self, pr: PrNumber, new_base: &str) -> HostResult<()> {
        let mut state = self.enter("retarget", &format!("{} {}", pr, new_base))?;
        let candidate = state
            .candidates
            .get_mut(&pr.0)
            .ok_or_else(|| missing_pr(pr))?;
        candidate.base_ref = new_base.to_string();
        Ok(())
    }

    async fn request_branch_update(&self, pr: PrNumber) -> HostResult<()> {
        let mut state = self.enter("request_branch_update", &pr.to_string())?;
        if !state.candidates.contains_key(&pr.0) {
            return Err(missing_pr(pr));
        }
        let lag = state.update_lag.remove(&pr.0).unwrap_or(0);
        state.pending_updates.insert(pr.0, lag);
        Ok(())
    }

    async fn merge(&self, pr: PrNumber, expected_head: &Sha) -> HostResult<Sha> {
        let mut state = self.enter("merge", &format!("{} {}", pr, expected_head))?;
        let order = state.merge_order.len() as u32;
        let candidate = state
            .candidates
            .get_mut(&pr.0)
            .ok_or_else(|| missing_pr(pr))?;
        if !candidate.state.is_open() {
            return Err(HostError::permanent_without_source(format!(
                "pull request {} is not open",
                pr
            )));
        }
        if &candidate.head_sha != expected_head {
            return Err(HostError::sha_mismatch(pr, expected_head, None));
        }
        let sha = make_sha(0x10_000 + pr.0);
        candidate.state = CandidateState::Merged {
            merge_commit_sha: sha.clone(),
            merged_at: Some(at_minute(30 + order)),
        };
        state.merge_order.push(pr);
        Ok(sha)
    }

    async fn open_pull_request(&self, request: &NewPullRequest) -> HostResult<PrNumber> {
        let mut state = self.enter(
            "open_pull_request",
            &format!("{} {}", request.head, request.base),
        )?;
        let number = state.next_pr;
        state.next_pr += 1;
        state.candidates.insert(
            number,
            CandidateChange {
                number: PrNumber(number),
                title: request.title.clone(),
                head_ref: request.head.clone(),
                head_sha: make_sha(0x20_000 + number),
                base_ref: request.base.clone(),
                state: CandidateState::Open,
                mergeable: Mergeability::Mergeable,
            },
        );
        state.descriptions.insert(number, request.body.clone());
        Ok(PrNumber(number))
    }

    async fn set_description(&self, pr: PrNumber, body: &str) -> HostResult<()> {
        let mut state = self.enter("set_description", &pr.to_string())?;
        if !state.candidates.contains_key(&pr.0) {
            return Err(missing_pr(pr));
        }
        state.descriptions.insert(pr.0, body.to_string());
        Ok(())
    }

    async fn request_review(&self, pr: PrNumber, reviewers: &[String]) -> HostResult<()> {
        let mut state = self.enter("request_review", &pr.to_string())?;
        state
            .review_requests
            .entry(pr.0)
            .or_default()
            .extend(reviewers.iter().cloned());
        Ok(())
    }

    async fn close_pull_request(&self, pr: PrNumber) -> HostResult<()> {
        let mut state = self.enter("close_pull_request", &pr.to_string())?;
        let candidate = state
            .candidates
            .get_mut(&pr.0)
            .ok_or_else(|| missing_pr(pr))?;
        candidate.state = CandidateState::Closed;
        Ok(())
    }

    async fn delete_branch(&self, branch: &str) -> HostResult<()> {
        let mut state = self.enter("delete_branch", branch)?;
        if state.branches.remove(branch) {
            Ok(())
        } else {
            Err(HostError::not_found(format!(
                "Reference does not exist: {}",
                branch
            )))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MockVcs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct VcsState {
    calls: Vec<String>,
    failures: HashMap<String, VecDeque<CommandOutput>>,
    /// Base-branch contents, written into the working copy on clone.
    files: BTreeMap<String, String>,
    head: Option<Sha>,
    commits: u64,
    pushes: Vec<(String, PushMode)>,
}

/// A scripted local VCS.
///
/// Operation keys for [`fail_next`](MockVcs::fail_next): `clone`, `fetch`,
/// `checkout`, `create_branch`, `delete_local_branch`, `commit`, `push`,
/// `reset`, `rev-parse`, `show`.
#[derive(Default)]
pub struct MockVcs {
    state: Mutex<VcsState>,
}

impl MockVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a file on the base branch.
    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), contents.to_string());
        self
    }

    pub fn set_head(&self, sha: Sha) {
        self.state.lock().unwrap().head = Some(sha);
    }

    pub fn fail_next(&self, op: &str, output: CommandOutput) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(op.to_string())
            .or_default()
            .push_back(output);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn pushes(&self) -> Vec<(String, PushMode)> {
        self.state.lock().unwrap().pushes.clone()
    }

    pub fn commits(&self) -> u64 {
        self.state.lock().unwrap().commits
    }

    fn enter(&self, op: &str, detail: String) -> (std::sync::MutexGuard<'_, VcsState>, Option<CommandOutput>) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{} {}", op, detail));
        let scripted = state.failures.get_mut(op).and_then(|q| q.pop_front());
        (state, scripted)
    }
}

impl LocalVcs for MockVcs {
    fn clone_repo(&self, url: &str, dest: &Path) -> io::Result<CommandOutput> {
        let (state, scripted) = self.enter("clone", format!("{} {}", url, dest.display()));
        if let Some(out) = scripted {
            return Ok(out);
        }
        std::fs::create_dir_all(dest)?;
        for (path, contents) in &state.files {
            let target = dest.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, contents)?;
        }
        Ok(CommandOutput::ok(""))
    }

    fn fetch(&self, _workdir: &Path, refspec: &str) -> io::Result<CommandOutput> {
        let (_state, scripted) = self.enter("fetch", refspec.to_string());
        Ok(scripted.unwrap_or_else(|| CommandOutput::ok("")))
    }

    fn checkout(&self, _workdir: &Path, rev: &str) -> io::Result<CommandOutput> {
        let (_state, scripted) = self.enter("checkout", rev.to_string());
        Ok(scripted.unwrap_or_else(|| CommandOutput::ok("")))
    }

    fn create_branch(&self, _workdir: &Path, branch: &str, start: &str) -> io::Result<CommandOutput> {
        let (_state, scripted) = self.enter("create_branch", format!("{} {}", branch, start));
        Ok(scripted.unwrap_or_else(|| CommandOutput::ok("")))
    }

    fn delete_local_branch(&self, _workdir: &Path, branch: &str) -> io::Result<CommandOutput> {
        let (_state, scripted) = self.enter("delete_local_branch", branch.to_string());
        Ok(scripted.unwrap_or_else(|| CommandOutput::ok("")))
    }

    fn commit_all(
        &self,
        _workdir: &Path,
        message: &str,
        _identity: &CommitIdentity,
    ) -> io::Result<CommandOutput> {
        let (mut state, scripted) = self.enter("commit", message.to_string());
        if let Some(out) = scripted {
            return Ok(out);
        }
        state.commits += 1;
        state.head = Some(make_sha(0x30_000 + state.commits));
        Ok(CommandOutput::ok(""))
    }

    fn push(&self, _workdir: &Path, branch: &str, mode: &PushMode) -> io::Result<CommandOutput> {
        let flavour = match mode {
            PushMode::Normal => "normal".to_string(),
            PushMode::ForceWithLease { expected, source } => {
                format!("lease {} {}", expected.short(), source)
            }
        };
        let (mut state, scripted) = self.enter("push", format!("{} {}", branch, flavour));
        if let Some(out) = scripted {
            return Ok(out);
        }
        state.pushes.push((branch.to_string(), mode.clone()));
        Ok(CommandOutput::ok(""))
    }

    fn reset_hard(&self, _workdir: &Path, rev: &str) -> io::Result<CommandOutput> {
        let (mut state, scripted) = self.enter("reset", rev.to_string());
        if let Some(out) = scripted {
            return Ok(out);
        }
        if let Ok(sha) = Sha::parse(rev) {
            state.head = Some(sha);
        }
        Ok(CommandOutput::ok(""))
    }

    fn rev_parse(&self, _workdir: &Path, rev: &str) -> io::Result<CommandOutput> {
        let (state, scripted) = self.enter("rev-parse", rev.to_string());
        if let Some(out) = scripted {
            return Ok(out);
        }
        let head = state.head.clone().unwrap_or_else(|| make_sha(1));
        Ok(CommandOutput::ok(format!("{}\n", head)))
    }

    fn show_file(&self, _workdir: &Path, rev: &str, path: &str) -> io::Result<CommandOutput> {
        let (state, scripted) = self.enter("show", format!("{}:{}", rev, path));
        if let Some(out) = scripted {
            return Ok(out);
        }
        Ok(match state.files.get(path) {
            Some(contents) => CommandOutput::ok(contents.clone()),
            None => CommandOutput::failed(
                128,
                format!("fatal: path '{}' does not exist in '{}'", path, rev),
            ),
        })
    }
}
