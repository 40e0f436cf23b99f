//! Reconciliation-based orchestration engine.
//!
//! Every invocation re-derives the workflow phase from observable external
//! state — the plan document, working-tree status, transcript files, and
//! decision markers — then runs exactly one handler per pass. There is no
//! private authoritative state anywhere: stopping the process at any point
//! and re-running is always safe, because recovery is re-derivation, not
//! replay.

pub mod context;
pub mod gate;
mod lock;
mod planner;
mod prompts;
pub mod reconcile;
pub mod signals;
pub mod transcript;

pub use context::{ContextAction, ContextBoundManager};
pub use gate::{AutoDefer, DecisionSource, HumanGate, StdinDecisions};
pub use reconcile::reconcile;
pub use signals::ExternalSignals;
pub use transcript::TranscriptLog;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use codeteam_core::{
    AgentRole, AppConfig, Decision, EventKind, Phase, Plan, Task, TaskStatus, runtime_dir,
};
use codeteam_gateway::{AgentGateway, AgentRequest, parsing};
use codeteam_observe::Observer;
use codeteam_plan::{
    load_active_plan, next_eligible_task, next_plan_id, plan_document_path, save_plan, validate,
};
use codeteam_tools::{GitCli, PlatformShellRunner, VersionControl, repo_map};
use codeteam_verify::{
    VerificationEngine, VerificationReport, delete_report, load_report, save_report, tree_digest,
};
use lock::RunLock;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What a single `code` invocation did: the phase at every reconciliation
/// pass, and any commits produced.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub phases: Vec<Phase>,
    pub commits: Vec<String>,
}

impl RunSummary {
    #[must_use]
    pub fn final_phase(&self) -> Option<Phase> {
        self.phases.last().copied()
    }
}

#[derive(Debug, Serialize)]
pub struct PlanOutcome {
    pub plan_id: String,
    pub tasks: usize,
    pub accepted: bool,
    pub document: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub phase: Phase,
    pub plan_id: Option<String>,
    pub active_task: Option<String>,
    pub tasks_completed: usize,
    pub tasks_total: usize,
    pub tree_dirty: bool,
}

pub struct Engine {
    workspace: PathBuf,
    cfg: AppConfig,
    gateway: Arc<dyn AgentGateway>,
    vcs: Box<dyn VersionControl>,
    observer: Observer,
    gate: HumanGate,
    context_bound: ContextBoundManager,
}

impl Engine {
    /// Production wiring: layered config, configured gateway backend, git.
    pub fn new(workspace: &Path, decisions: Box<dyn DecisionSource>) -> Result<Self> {
        let cfg = AppConfig::ensure(workspace)?;
        let gateway = codeteam_gateway::from_config(&cfg.gateway)?;
        let vcs = Box::new(GitCli::new(workspace));
        Self::with_parts(workspace, cfg, Arc::from(gateway), vcs, decisions)
    }

    /// Dependency-injected constructor, used by tests and the testkit.
    pub fn with_parts(
        workspace: &Path,
        cfg: AppConfig,
        gateway: Arc<dyn AgentGateway>,
        vcs: Box<dyn VersionControl>,
        decisions: Box<dyn DecisionSource>,
    ) -> Result<Self> {
        let observer = Observer::new(workspace)?;
        let gate = HumanGate::new(&runtime_dir(workspace), decisions);
        let context_bound = ContextBoundManager::new(cfg.coder.log_compact_threshold);
        Ok(Self {
            workspace: workspace.to_path_buf(),
            cfg,
            gateway,
            vcs,
            observer,
            gate,
            context_bound,
        })
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.observer.set_verbose(verbose);
    }

    fn plans_dir(&self) -> PathBuf {
        self.workspace.join(&self.cfg.plans_directory)
    }

    fn logs_dir(&self) -> PathBuf {
        runtime_dir(&self.workspace).join("logs")
    }

    fn reports_dir(&self) -> PathBuf {
        runtime_dir(&self.workspace).join("reports")
    }

    fn feedback_path(&self, task_id: &str) -> PathBuf {
        self.logs_dir().join(format!("{task_id}.feedback.md"))
    }

    fn transcript(&self, task_id: &str) -> TranscriptLog {
        TranscriptLog::new(&self.logs_dir(), task_id)
    }

    // ── Signal collection ──────────────────────────────────────────────

    /// Assemble the external-signal snapshot for one reconciliation pass.
    pub fn collect_signals(&self) -> Result<ExternalSignals> {
        let plan = load_active_plan(&self.plans_dir())?;
        let status = self.vcs.status_short()?;
        let diff = self.vcs.diff()?;
        let tree_dirty = !status.trim().is_empty();
        let digest = tree_digest(&diff, &status);

        let active_task_id = plan.as_ref().and_then(|p| {
            p.active_task()
                .map(|t| t.id.clone())
                .or_else(|| next_eligible_task(p).map(|t| t.id.clone()))
        });

        let (transcript_chars, coder_replied, report_digest, feedback_pending, decision) =
            match &active_task_id {
                Some(task_id) => {
                    let transcript = self.transcript(task_id);
                    (
                        transcript.char_len()?,
                        transcript.has_coder_reply()?,
                        load_report(&self.reports_dir(), task_id).map(|r| r.tree_digest),
                        self.feedback_path(task_id).exists(),
                        self.gate.peek(task_id),
                    )
                }
                None => (None, false, None, false, None),
            };

        Ok(ExternalSignals {
            plan,
            tree_dirty,
            tree_digest: digest,
            active_task_id,
            transcript_chars,
            coder_replied,
            report_digest,
            feedback_pending,
            decision,
        })
    }

    /// Read-only snapshot for the `status` command. Takes no lock and
    /// performs no writes.
    pub fn status(&self) -> Result<StatusReport> {
        let signals = self.collect_signals()?;
        let phase = reconcile(&signals);
        let (plan_id, completed, total) = match &signals.plan {
            Some(plan) => (
                Some(plan.plan_id.clone()),
                plan.tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Completed)
                    .count(),
                plan.tasks.len(),
            ),
            None => (None, 0, 0),
        };
        Ok(StatusReport {
            phase,
            plan_id,
            active_task: signals.active_task_id.clone(),
            tasks_completed: completed,
            tasks_total: total,
            tree_dirty: signals.tree_dirty,
        })
    }

    // ── Plan phase ─────────────────────────────────────────────────────

    /// Generate a plan from a request, persist it unaccepted, attach a
    /// review feedback file, then suspend on the acceptance gate.
    pub fn run_plan_phase(&mut self, request: &str) -> Result<PlanOutcome> {
        let _lock = RunLock::acquire(&runtime_dir(&self.workspace))?;

        let map = repo_map::render(&self.workspace);
        let reply = self
            .invoke(AgentRole::Planner, prompts::planner(request, &map), None)
            .context("planner call failed")?;

        let plans_dir = self.plans_dir();
        fs::create_dir_all(&plans_dir)?;
        let plan_id = next_plan_id(&plans_dir);
        let mut plan = planner::parse_plan_from_reply(&reply, &plan_id, request)
            .ok_or_else(|| anyhow!("planner reply contained no usable task list"))?;
        validate(&plan)?;

        let document = plan_document_path(&plans_dir, &plan.plan_id);
        save_plan(&document, &plan)?;
        self.observer.record_event(EventKind::PlanCreatedV1 {
            plan_id: plan.plan_id.clone(),
            tasks: plan.tasks.len(),
        })?;

        // Review pass is advisory: a gateway failure must not lose the plan.
        match self.invoke(
            AgentRole::PlanReviewer,
            prompts::plan_reviewer(request, &serde_json::to_string_pretty(&plan)?),
            None,
        ) {
            Ok(feedback) => {
                fs::write(document.with_file_name("FEEDBACK.md"), feedback)?;
            }
            Err(err) => self
                .observer
                .warn_log(&format!("plan review skipped: {err}")),
        }

        let decision = self.gate.suspend(
            &plan.plan_id,
            &prompts::acceptance_gate(&plan.plan_id, plan.tasks.len()),
        )?;
        self.apply_acceptance_decision(&mut plan, &document, decision)?;

        Ok(PlanOutcome {
            plan_id: plan.plan_id.clone(),
            tasks: plan.tasks.len(),
            accepted: plan.accepted,
            document,
        })
    }

    fn apply_acceptance_decision(
        &mut self,
        plan: &mut Plan,
        document: &Path,
        decision: Decision,
    ) -> Result<bool> {
        match decision {
            Decision::Accept => {
                plan.accepted = true;
                save_plan(document, plan)?;
                self.observer.record_event(EventKind::PlanAcceptedV1 {
                    plan_id: plan.plan_id.clone(),
                })?;
                Ok(true)
            }
            Decision::Reject { feedback } => {
                fs::write(document.with_file_name("USER_FEEDBACK.md"), &feedback)?;
                self.observer.warn_log(
                    "plan rejected — revise the plan document or run the plan phase again",
                );
                Ok(false)
            }
            Decision::Defer => Ok(false),
        }
    }

    // ── Code phase ─────────────────────────────────────────────────────

    /// Reconcile-and-dispatch loop. Each pass recomputes the phase from a
    /// fresh snapshot and runs its handler; terminal phases and deferred
    /// gates end the invocation.
    pub fn run_code_phase(&mut self) -> Result<RunSummary> {
        let _lock = RunLock::acquire(&runtime_dir(&self.workspace))?;
        let mut summary = RunSummary::default();

        loop {
            let signals = self.collect_signals()?;
            let phase = reconcile(&signals);
            summary.phases.push(phase);
            self.observer
                .record_event(EventKind::PhaseComputedV1 { phase })?;
            self.observer.verbose_log(&format!("phase: {phase}"));

            match phase {
                Phase::NoPlan | Phase::PlanComplete => break,
                Phase::AwaitingPlanAcceptance => {
                    if !self.handle_plan_acceptance(&signals)? {
                        break;
                    }
                }
                Phase::ReadyToStartTask => self.handle_ready_to_start(&signals)?,
                Phase::TaskInProgress => self.handle_coder(&signals)?,
                Phase::AwaitingVerification => self.handle_verification(&signals)?,
                Phase::AwaitingHumanReview => {
                    if !self.handle_review(&signals)? {
                        break;
                    }
                }
                Phase::ReadyToCommit => {
                    if let Some(commit_id) = self.handle_commit(&signals)? {
                        summary.commits.push(commit_id);
                    }
                }
            }
        }

        Ok(summary)
    }

    fn handle_plan_acceptance(&mut self, signals: &ExternalSignals) -> Result<bool> {
        let mut plan = signals.plan.clone().expect("phase implies plan");
        let document = plan_document_path(&self.plans_dir(), &plan.plan_id);
        let decision = self.gate.suspend(
            &plan.plan_id,
            &prompts::acceptance_gate(&plan.plan_id, plan.tasks.len()),
        )?;
        self.apply_acceptance_decision(&mut plan, &document, decision)
    }

    /// Arm the next task — or consume a rejection and route back to the
    /// coder with feedback.
    fn handle_ready_to_start(&mut self, signals: &ExternalSignals) -> Result<()> {
        if let Some(Decision::Reject { .. }) = &signals.decision {
            let task_id = signals
                .active_task_id
                .clone()
                .expect("decision implies active task");
            let Some(Decision::Reject { feedback }) = self.gate.consume(&task_id)? else {
                return Err(anyhow!("decision marker vanished mid-pass"));
            };
            fs::create_dir_all(self.logs_dir())?;
            fs::write(self.feedback_path(&task_id), &feedback)?;
            // The rejected report no longer stands for anything.
            delete_report(&self.reports_dir(), &task_id)?;
            self.observer.record_event(EventKind::DecisionRecordedV1 {
                task_id,
                decision: Decision::Reject { feedback },
            })?;
            return Ok(());
        }

        let plan = signals.plan.clone().expect("phase implies plan");
        let Some(task_id) = signals.active_task_id.clone() else {
            let failed: Vec<&str> = plan
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Failed)
                .map(|t| t.id.as_str())
                .collect();
            return Err(anyhow!(
                "plan is blocked: no eligible task remains (failed: [{}])",
                failed.join(", ")
            ));
        };

        let task = plan.task(&task_id).expect("scheduler returned a plan task");
        let instructions = self.invoke(AgentRole::Prompter, prompts::prompter(task), None)?;

        let mut plan = plan;
        let task_ref = plan.task_mut(&task_id).expect("task exists");
        if task_ref.status == TaskStatus::Pending {
            task_ref.status = TaskStatus::InProgress;
        }
        save_plan(&plan_document_path(&self.plans_dir(), &plan.plan_id), &plan)?;

        let transcript = self.transcript(&task_id);
        let task = plan.task(&task_id).expect("task exists");
        transcript.append("Task", &format!("{}: {}", task.id, task.description))?;
        transcript.append("Coder instructions", &instructions)?;

        self.observer
            .record_event(EventKind::TaskStartedV1 { task_id })?;
        Ok(())
    }

    /// One coder round: compact the transcript if it crossed the bound,
    /// then invoke the coder (with rejection feedback when pending).
    fn handle_coder(&mut self, signals: &ExternalSignals) -> Result<()> {
        let plan = signals.plan.as_ref().expect("phase implies plan");
        let task_id = signals
            .active_task_id
            .clone()
            .expect("phase implies active task");
        let task = plan.task(&task_id).expect("task exists").clone();
        let transcript = self.transcript(&task_id);

        let chars = signals.transcript_chars.unwrap_or(0);
        if self.context_bound.observe(chars) == ContextAction::Compact {
            let summary = self.invoke(
                AgentRole::Summarizer,
                prompts::summarizer(&transcript.read()?),
                None,
            )?;
            transcript.replace_with_summary(&summary)?;
            let new_chars = transcript.char_len()?.unwrap_or(0);
            self.context_bound.reset(new_chars);
            self.observer.record_event(EventKind::ContextCompactedV1 {
                task_id: task_id.clone(),
                from_chars: chars,
                to_chars: new_chars,
            })?;
        }

        let feedback_path = self.feedback_path(&task_id);
        let feedback = feedback_path
            .exists()
            .then(|| fs::read_to_string(&feedback_path))
            .transpose()?;

        let reply = self.invoke(
            AgentRole::Coder,
            prompts::coder(&task, feedback.as_deref()),
            Some(transcript.read()?),
        )?;
        transcript.append(transcript::CODER_REPLY_HEADING, &reply)?;
        if feedback_path.exists() {
            fs::remove_file(&feedback_path)?;
        }

        self.observer.record_event(EventKind::CoderRunV1 {
            task_id: task_id.clone(),
            transcript_chars: transcript.char_len()?.unwrap_or(0),
        })?;

        if !self.vcs.has_pending_changes()? {
            return Err(anyhow!(
                "coder finished task `{task_id}` without touching the working tree — \
                 re-run to retry, or revise the plan"
            ));
        }
        Ok(())
    }

    /// Fan out all configured verifier instances against the current diff
    /// and persist the digest-stamped report.
    fn handle_verification(&mut self, signals: &ExternalSignals) -> Result<()> {
        let plan = signals.plan.as_ref().expect("phase implies plan");
        let task_id = signals
            .active_task_id
            .clone()
            .expect("phase implies active task");
        let task = plan.task(&task_id).expect("task exists");

        let diff = self.vcs.diff()?;
        let status = self.vcs.status_short()?;

        let engine = VerificationEngine::new(
            Arc::clone(&self.gateway),
            Arc::new(PlatformShellRunner),
            &self.workspace,
            self.cfg.verifier_instances.clone(),
            self.cfg.verification.commands.clone(),
            Duration::from_secs(self.cfg.verification.timeout_seconds),
        );
        let result = engine.run(task, &diff);

        self.observer.record_event(EventKind::VerificationRunV1 {
            task_id: task_id.clone(),
            accepted: result.accepted,
            failed_categories: result
                .failed_categories()
                .iter()
                .map(|s| s.to_string())
                .collect(),
        })?;

        save_report(
            &self.reports_dir(),
            &VerificationReport {
                task_id,
                tree_digest: tree_digest(&diff, &status),
                at: Utc::now(),
                result,
            },
        )?;
        Ok(())
    }

    /// Suspend on the review gate; record the decision as a marker so the
    /// next pass derives its phase from it.
    fn handle_review(&mut self, signals: &ExternalSignals) -> Result<bool> {
        let plan = signals.plan.as_ref().expect("phase implies plan");
        let task_id = signals
            .active_task_id
            .clone()
            .expect("phase implies active task");
        let task = plan.task(&task_id).expect("task exists");

        let report = load_report(&self.reports_dir(), &task_id)
            .ok_or_else(|| anyhow!("verification report vanished mid-pass"))?;
        let decision = self
            .gate
            .suspend(&task_id, &prompts::review_gate(task, &report.result.render()))?;

        if decision == Decision::Defer {
            return Ok(false);
        }
        self.gate.record(&task_id, &decision)?;
        self.observer.record_event(EventKind::DecisionRecordedV1 {
            task_id,
            decision,
        })?;
        Ok(true)
    }

    /// Consume the accept marker, commit (unless an interrupted earlier
    /// run already did), and mark the task completed. Status mutations
    /// land only after the commit succeeded.
    fn handle_commit(&mut self, signals: &ExternalSignals) -> Result<Option<String>> {
        let mut plan = signals.plan.clone().expect("phase implies plan");
        let task_id = signals
            .active_task_id
            .clone()
            .expect("phase implies active task");
        let task = plan.task(&task_id).expect("task exists").clone();

        let Some(Decision::Accept) = self.gate.consume(&task_id)? else {
            return Err(anyhow!("accept marker vanished mid-pass"));
        };

        let commit_id = if signals.tree_dirty {
            let message = self.commit_message(&task);
            let id = self.vcs.commit(&message)?;
            self.observer.record_event(EventKind::CommitCreatedV1 {
                task_id: task_id.clone(),
                commit_id: id.to_string(),
            })?;
            Some(id.to_string())
        } else {
            // Clean tree with a recorded accept: the commit from a prior
            // interrupted run already landed.
            None
        };

        plan.task_mut(&task_id).expect("task exists").status = TaskStatus::Completed;
        save_plan(&plan_document_path(&self.plans_dir(), &plan.plan_id), &plan)?;
        self.observer.record_event(EventKind::TaskCompletedV1 {
            task_id: task_id.clone(),
        })?;

        self.transcript(&task_id).remove()?;
        delete_report(&self.reports_dir(), &task_id)?;
        let feedback = self.feedback_path(&task_id);
        if feedback.exists() {
            fs::remove_file(feedback)?;
        }

        Ok(commit_id)
    }

    fn commit_message(&self, task: &Task) -> String {
        let attribution = self.cfg.attribution.clone();
        match self.invoke(
            AgentRole::Committer,
            prompts::committer(task, &attribution),
            None,
        ) {
            Ok(reply) => {
                let message = parsing::strip_fences(&reply);
                if message.is_empty() {
                    fallback_commit_message(task, &attribution)
                } else {
                    message
                }
            }
            Err(err) => {
                self.observer
                    .warn_log(&format!("committer unavailable, using fallback: {err}"));
                fallback_commit_message(task, &attribution)
            }
        }
    }

    fn invoke(
        &self,
        role: AgentRole,
        prompt: String,
        transcript: Option<String>,
    ) -> Result<String> {
        let mut request = AgentRequest::new(role, prompt);
        if let Some(transcript) = transcript {
            request = request.with_transcript(transcript);
        }
        self.observer
            .verbose_log(&format!("invoking {} agent", role.as_str()));
        let reply = self.gateway.invoke(&request)?;
        Ok(reply.text)
    }
}

fn fallback_commit_message(task: &Task, attribution: &str) -> String {
    format!(
        "{}: {}\n\nGenerated-by: {}",
        task.id, task.description, attribution
    )
}
