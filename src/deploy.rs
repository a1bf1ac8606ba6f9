use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

use crate::error::ApiError;

/// Maximum amount of command output folded into a result message (4KB)
pub const MAX_MESSAGE_OUTPUT: usize = 4 * 1024;

/// Number of finished deploys kept for the status endpoint
pub const DEFAULT_MAX_HISTORY: usize = 24;

const MAX_BRANCH_LEN: usize = 255;

/// Body accepted by `POST /deploy`
#[derive(Debug, Clone, Deserialize)]
pub struct DeployRequest {
    pub branch: Option<String>,
}

/// A branch name that is safe to hand to git as an argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchName(String);

impl BranchName {
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        if raw.is_empty() {
            return Err(ApiError::validation("branch must not be empty"));
        }
        if raw.len() > MAX_BRANCH_LEN {
            return Err(ApiError::validation(format!(
                "branch must be at most {} characters",
                MAX_BRANCH_LEN
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/')))
        {
            return Err(ApiError::validation(format!(
                "branch contains forbidden character {:?}; allowed are letters, digits, '-', '_' and '/'",
                bad
            )));
        }
        // A leading '-' would be read by git as an option
        if raw.starts_with('-') || raw.starts_with('/') || raw.ends_with('/') || raw.contains("//")
        {
            return Err(ApiError::validation(format!(
                "branch '{}' is not a valid ref name",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sequential steps of a deploy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    Fetch,
    Install,
    Restart,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Fetch, Stage::Install, Stage::Restart];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "FETCH",
            Stage::Install => "INSTALL",
            Stage::Restart => "RESTART",
        };
        f.write_str(name)
    }
}

/// Outcome of one deploy request. `stage` is the last stage attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResult {
    pub id: String,
    pub branch: String,
    pub success: bool,
    pub stage: Stage,
    pub message: String,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// The deploy currently holding the working copy
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightDeploy {
    pub id: String,
    pub branch: String,
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
}

impl InFlightDeploy {
    pub fn new(branch: &BranchName) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            branch: branch.to_string(),
            stage: Stage::Fetch,
            started_at: Utc::now(),
        }
    }

    /// Seal the deploy into its terminal result
    pub fn finish(&self, success: bool, message: String, exit_code: Option<i32>) -> DeployResult {
        let finished_at = Utc::now();
        DeployResult {
            id: self.id.clone(),
            branch: self.branch.clone(),
            success,
            stage: self.stage,
            message,
            exit_code,
            started_at: self.started_at,
            finished_at,
            duration_ms: (finished_at - self.started_at).num_milliseconds(),
        }
    }
}

/// In-memory record of the running deploy and the most recent results
#[derive(Debug)]
pub struct DeployHistory {
    current: Option<InFlightDeploy>,
    finished: VecDeque<DeployResult>,
    max_finished: usize,
}

impl DeployHistory {
    pub fn new(max_finished: usize) -> Self {
        Self {
            current: None,
            finished: VecDeque::with_capacity(max_finished),
            max_finished,
        }
    }

    pub fn start(&mut self, deploy: InFlightDeploy) {
        self.current = Some(deploy);
    }

    pub fn advance(&mut self, stage: Stage) {
        if let Some(current) = self.current.as_mut() {
            current.stage = stage;
        }
    }

    pub fn finish(&mut self, result: DeployResult) {
        self.current = None;
        if self.max_finished == 0 {
            return;
        }
        while self.finished.len() >= self.max_finished {
            self.finished.pop_front();
        }
        self.finished.push_back(result);
    }

    pub fn current(&self) -> Option<&InFlightDeploy> {
        self.current.as_ref()
    }

    /// Most recent first
    pub fn recent(&self, limit: usize) -> Vec<DeployResult> {
        self.finished.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for DeployHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

/// Keep the last `max` bytes of command output, cut on a char boundary
pub fn output_tail(output: &str, max: usize) -> String {
    let output = output.trim_end();
    if output.len() <= max {
        return output.to_string();
    }
    let mut start = output.len() - max;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    format!("... (output truncated)\n{}", &output[start..])
}
