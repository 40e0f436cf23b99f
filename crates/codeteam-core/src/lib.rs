use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type Result<T> = anyhow::Result<T>;

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".codeteam")
}

/// Lifecycle of a single unit of work inside a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// A plan is an ordered sequence of tasks. Declared order encodes the
/// planner's intended execution sequence and is the scheduling tie-break.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub request: String,
    #[serde(default)]
    pub accepted: bool,
    pub tasks: Vec<Task>,
}

impl Plan {
    #[must_use]
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// All tasks finished successfully.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.tasks.is_empty()
            && self
                .tasks
                .iter()
                .all(|t| t.status == TaskStatus::Completed)
    }

    /// The task currently being worked on, if any. At most one task is ever
    /// in progress; the first match wins if a hand-edited plan violates that.
    #[must_use]
    pub fn active_task(&self) -> Option<&Task> {
        self.tasks
            .iter()
            .find(|t| t.status == TaskStatus::InProgress)
    }
}

/// A named point in the workflow state machine. Always recomputed from
/// external signals, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NoPlan,
    AwaitingPlanAcceptance,
    ReadyToStartTask,
    TaskInProgress,
    AwaitingVerification,
    AwaitingHumanReview,
    ReadyToCommit,
    PlanComplete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NoPlan => "no_plan",
            Self::AwaitingPlanAcceptance => "awaiting_plan_acceptance",
            Self::ReadyToStartTask => "ready_to_start_task",
            Self::TaskInProgress => "task_in_progress",
            Self::AwaitingVerification => "awaiting_verification",
            Self::AwaitingHumanReview => "awaiting_human_review",
            Self::ReadyToCommit => "ready_to_commit",
            Self::PlanComplete => "plan_complete",
        };
        f.write_str(name)
    }
}

/// Outcome of a human gate suspension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject { feedback: String },
    Defer,
}

/// Closed set of agent roles behind the single gateway interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    PlanReviewer,
    Prompter,
    Coder,
    Verifier,
    Summarizer,
    Committer,
}

impl AgentRole {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::PlanReviewer => "plan_reviewer",
            Self::Prompter => "prompter",
            Self::Coder => "coder",
            Self::Verifier => "verifier",
            Self::Summarizer => "summarizer",
            Self::Committer => "committer",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq_no: u64,
    pub at: DateTime<Utc>,
    pub run_id: Uuid,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventKind {
    PhaseComputedV1 {
        phase: Phase,
    },
    PlanCreatedV1 {
        plan_id: String,
        tasks: usize,
    },
    PlanAcceptedV1 {
        plan_id: String,
    },
    TaskStartedV1 {
        task_id: String,
    },
    CoderRunV1 {
        task_id: String,
        transcript_chars: u64,
    },
    VerificationRunV1 {
        task_id: String,
        accepted: bool,
        failed_categories: Vec<String>,
    },
    DecisionRecordedV1 {
        task_id: String,
        decision: Decision,
    },
    CommitCreatedV1 {
        task_id: String,
        commit_id: String,
    },
    TaskCompletedV1 {
        task_id: String,
    },
    TaskFailedV1 {
        task_id: String,
        reason: String,
    },
    ContextCompactedV1 {
        task_id: String,
        from_chars: u64,
        to_chars: u64,
    },
}

impl EventKind {
    /// Logical category for this event kind.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::PhaseComputedV1 { .. } => "phase",
            Self::PlanCreatedV1 { .. } | Self::PlanAcceptedV1 { .. } => "plan",
            Self::TaskStartedV1 { .. }
            | Self::TaskCompletedV1 { .. }
            | Self::TaskFailedV1 { .. } => "task",
            Self::CoderRunV1 { .. } | Self::ContextCompactedV1 { .. } => "coder",
            Self::VerificationRunV1 { .. } => "verification",
            Self::DecisionRecordedV1 { .. } => "gate",
            Self::CommitCreatedV1 { .. } => "commit",
        }
    }
}

// ── Configuration ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub coder: CoderConfig,
    pub verification: VerificationConfig,
    /// Verifier category → parallel instance count. A count of 0 disables
    /// the category entirely.
    pub verifier_instances: BTreeMap<String, usize>,
    /// Directory for plan documents, relative to the workspace root.
    pub plans_directory: String,
    /// Commit trailer appended to generated commit messages.
    pub attribution: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            coder: CoderConfig::default(),
            verification: VerificationConfig::default(),
            verifier_instances: default_verifier_instances(),
            plans_directory: default_plans_directory(),
            attribution: default_attribution(),
        }
    }
}

fn default_verifier_instances() -> BTreeMap<String, usize> {
    BTreeMap::from([
        ("architecture".to_string(), 1),
        ("task_completion".to_string(), 1),
        ("security".to_string(), 0),
        ("performance".to_string(), 0),
    ])
}

fn default_plans_directory() -> String {
    ".codeteam/plans".to_string()
}

fn default_attribution() -> String {
    "CodeTeam".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Agent backend: "process" pipes prompts through a local agent CLI,
    /// "http" posts to a chat-completions endpoint.
    pub provider: String,
    /// Command line for the process provider. The prompt is written to the
    /// child's stdin; the reply is read from stdout.
    pub agent_command: String,
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_seconds: u64,
    pub max_retries: u8,
    pub retry_base_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: "process".to_string(),
            agent_command: "claude -p".to_string(),
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            model: "sonnet".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            timeout_seconds: 600,
            max_retries: 3,
            retry_base_ms: 400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoderConfig {
    /// Transcript size (chars) above which the coder log is compacted
    /// before the next agent call.
    pub log_compact_threshold: u64,
}

impl Default for CoderConfig {
    fn default() -> Self {
        Self {
            log_compact_threshold: 75_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Literal shell commands run as verification instances, one instance
    /// per command, alongside the agent-backed categories.
    pub commands: Vec<VerificationCommand>,
    pub timeout_seconds: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationCommand {
    pub name: String,
    pub command: String,
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(".codeteam/settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    pub fn legacy_toml_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("config.toml")
    }

    /// Load layered configuration: defaults, then legacy TOML, then user,
    /// project, and project-local settings.json. Later layers win per key.
    pub fn load(workspace: &Path) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        let legacy = Self::legacy_toml_path(workspace);
        if legacy.exists() {
            let raw = fs::read_to_string(legacy)?;
            let legacy_cfg: AppConfig = toml::from_str(&raw)?;
            merge_json_value(&mut merged, &serde_json::to_value(legacy_cfg)?);
        }

        let mut paths = Vec::new();
        if let Some(user) = Self::user_settings_path() {
            paths.push(user);
        }
        paths.push(Self::project_settings_path(workspace));
        paths.push(Self::project_local_settings_path(workspace));

        for path in paths {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            merge_json_value(&mut merged, &value);
        }

        Ok(serde_json::from_value(merged)?)
    }

    /// Load the config, writing default project settings on first use.
    pub fn ensure(workspace: &Path) -> Result<Self> {
        let path = Self::project_settings_path(workspace);
        if path.exists()
            || Self::project_local_settings_path(workspace).exists()
            || Self::legacy_toml_path(workspace).exists()
        {
            return Self::load(workspace);
        }
        let cfg = Self::default();
        cfg.save(workspace)?;
        Ok(cfg)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::project_settings_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid config path"))?,
        )?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn merge_json_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}
