//! FETCH -> INSTALL -> RESTART against the service's own working copy

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::DeployConfig;
use crate::deploy::{
    BranchName, DeployHistory, DeployResult, InFlightDeploy, MAX_MESSAGE_OUTPUT, Stage,
    output_tail,
};
use crate::executor::{CommandExecutor, CommandSpec};

/// Proof that the caller holds the working copy. Released on drop.
#[derive(Debug)]
pub struct DeployPermit {
    _guard: OwnedMutexGuard<()>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StageFailure {
    message: String,
    exit_code: Option<i32>,
}

pub struct DeployOrchestrator {
    config: DeployConfig,
    executor: Arc<dyn CommandExecutor>,
    lock: Arc<Mutex<()>>,
    history: StdMutex<DeployHistory>,
}

impl DeployOrchestrator {
    pub fn new(config: DeployConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            config,
            executor,
            lock: Arc::new(Mutex::new(())),
            history: StdMutex::new(DeployHistory::default()),
        }
    }

    /// Claim the working copy, or `None` if another deploy is in flight
    pub fn try_acquire(&self) -> Option<DeployPermit> {
        self.lock
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| DeployPermit { _guard: guard })
    }

    /// Commands making the working copy exactly the remote branch tip.
    /// Local edits and untracked files are discarded, never merged.
    pub fn fetch_commands(&self, branch: &BranchName) -> Vec<CommandSpec> {
        let remote = self.config.remote.as_str();
        let tracking = format!("{}/{}", remote, branch);
        // Explicit destination, since shallow and single-branch clones only
        // map their original branch to a remote-tracking ref
        let refspec = format!("+refs/heads/{}:refs/remotes/{}", branch, tracking);
        let git = |args: &[&str]| {
            let mut spec = CommandSpec::new("git", &self.config.repo_path)
                .args(args.iter().copied())
                .env("GIT_TERMINAL_PROMPT", "0");
            if let Some(ssh) = &self.config.git_ssh_command {
                spec = spec.env("GIT_SSH_COMMAND", ssh.as_str());
            }
            spec
        };

        vec![
            git(&["fetch", "--prune", remote, refspec.as_str()]),
            git(&["checkout", "--force", "-B", branch.as_str(), tracking.as_str()]),
            git(&["reset", "--hard", tracking.as_str()]),
            git(&["clean", "-fd"]),
        ]
    }

    pub fn install_commands(&self) -> Vec<CommandSpec> {
        self.config
            .install
            .iter()
            .filter_map(|line| CommandSpec::from_command_line(line, &self.config.repo_path))
            .collect()
    }

    pub fn restart_commands(&self) -> Vec<CommandSpec> {
        CommandSpec::from_command_line(&self.config.restart, &self.config.repo_path)
            .into_iter()
            .collect()
    }

    fn stage_commands(&self, stage: Stage, branch: &BranchName) -> Vec<CommandSpec> {
        match stage {
            Stage::Fetch => self.fetch_commands(branch),
            Stage::Install => self.install_commands(),
            Stage::Restart => self.restart_commands(),
        }
    }

    /// Run the full sequence while holding `permit`. Each stage only runs if
    /// the previous one succeeded; the first failure ends the deploy.
    pub async fn run(&self, _permit: DeployPermit, branch: &BranchName) -> DeployResult {
        let mut deploy = InFlightDeploy::new(branch);
        info!("Deploy {} - starting for branch '{}'", deploy.id, branch);
        self.history().start(deploy.clone());

        for stage in Stage::ALL {
            deploy.stage = stage;
            self.history().advance(stage);
            info!("Deploy {} - stage {}", deploy.id, stage);

            if let Err(failure) = self.run_stage(stage, branch).await {
                warn!(
                    "Deploy {} - stage {} failed for branch '{}' (exit code {:?})",
                    deploy.id, stage, branch, failure.exit_code
                );
                let result = deploy.finish(false, failure.message, failure.exit_code);
                self.history().finish(result.clone());
                return result;
            }
        }

        info!("Deploy {} - branch '{}' deployed, restart issued", deploy.id, branch);
        let result = deploy.finish(
            true,
            format!(
                "Branch '{}' fetched, dependencies installed and restart issued",
                branch
            ),
            Some(0),
        );
        self.history().finish(result.clone());
        result
    }

    async fn run_stage(&self, stage: Stage, branch: &BranchName) -> Result<(), StageFailure> {
        let timeout = self.config.stage_timeout(stage);
        // None only when the timeout is beyond what the clock can represent
        let deadline = Instant::now().checked_add(timeout);

        for command in self.stage_commands(stage, branch) {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            if remaining.is_zero() {
                return Err(timed_out(stage, timeout, &command));
            }

            let output = match self.executor.run(&command, remaining).await {
                Ok(output) => output,
                Err(e) => {
                    error!("{} stage could not run `{}`: {}", stage, command, e);
                    return Err(StageFailure {
                        message: format!("{} failed: {}", stage, e),
                        exit_code: None,
                    });
                }
            };

            if output.success() {
                continue;
            }
            if output.timed_out {
                return Err(timed_out(stage, timeout, &command));
            }

            let status = match output.exit_code {
                Some(code) => format!("exited with status {}", code),
                None => "was terminated by a signal".to_string(),
            };
            let tail = output_tail(&output.combined(), MAX_MESSAGE_OUTPUT);
            let message = if tail.is_empty() {
                format!("{} failed: `{}` {}", stage, command, status)
            } else {
                format!("{} failed: `{}` {}\n{}", stage, command, status, tail)
            };
            return Err(StageFailure {
                message,
                exit_code: output.exit_code,
            });
        }

        Ok(())
    }

    /// The deploy in flight (if any) and the most recent results
    pub fn snapshot(&self, limit: usize) -> (Option<InFlightDeploy>, Vec<DeployResult>) {
        let history = self.history();
        (history.current().cloned(), history.recent(limit))
    }

    /// Recovers a poisoned lock; no history update panics half-way
    fn history(&self) -> MutexGuard<'_, DeployHistory> {
        self.history.lock().unwrap_or_else(|poisoned| {
            warn!("Deploy history lock was poisoned, continuing with its last state");
            self.history.clear_poison();
            poisoned.into_inner()
        })
    }
}

fn timed_out(stage: Stage, timeout: Duration, command: &CommandSpec) -> StageFailure {
    StageFailure {
        message: format!(
            "{} timed out after {}s while running `{}`",
            stage,
            timeout.as_secs(),
            command
        ),
        exit_code: None,
    }
}
