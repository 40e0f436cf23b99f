//! End-to-end workflow tests: a real git repository, scripted agents, and
//! scripted gate decisions driving the reconcile loop.

use codeteam_core::{
    AgentRole, AppConfig, Decision, Phase, Plan, Task, TaskStatus,
};
use codeteam_engine::Engine;
use codeteam_gateway::{AgentReply, GatewayError};
use codeteam_plan::{plan_document_path, save_plan};
use codeteam_testkit::{ScriptedDecisions, ScriptedGateway, commit_count, init_git_workspace};
use codeteam_tools::GitCli;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn test_config() -> AppConfig {
    AppConfig {
        verifier_instances: BTreeMap::from([
            ("tests".to_string(), 1),
            ("lint".to_string(), 1),
        ]),
        ..AppConfig::default()
    }
}

fn single_task_plan() -> Plan {
    Plan {
        plan_id: "plan-0001".to_string(),
        request: "add the widget".to_string(),
        accepted: true,
        tasks: vec![Task {
            id: "T1".to_string(),
            description: "add the widget module".to_string(),
            status: TaskStatus::Pending,
            dependencies: vec![],
        }],
    }
}

fn write_plan(workspace: &Path, plan: &Plan) {
    let plans_dir = workspace.join(".codeteam/plans");
    save_plan(&plan_document_path(&plans_dir, &plan.plan_id), plan).expect("save plan");
}

/// Coder script that writes a file into the workspace, like a real coding
/// agent mutating the working tree.
fn coding_agent(workspace: PathBuf, calls: Arc<AtomicUsize>) -> ScriptedGateway {
    ScriptedGateway::new()
        .on_text(AgentRole::Prompter, "edit src/widget.rs and add the module")
        .on(AgentRole::Coder, move |req| {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            fs::write(
                workspace.join("widget.rs"),
                format!("// revision {call}\npub fn widget() {{}}\n"),
            )
            .map_err(|e| GatewayError::AgentUnavailable(e.to_string()))?;
            let _ = req;
            Ok(AgentReply {
                text: format!("wrote widget.rs (revision {call})"),
            })
        })
        .on_text(AgentRole::Verifier, "all checks passed\nVERDICT: PASS")
        .on_text(AgentRole::Committer, "feat: add widget module")
}

fn engine(
    workspace: &Path,
    cfg: AppConfig,
    gateway: ScriptedGateway,
    decisions: Vec<Decision>,
) -> Engine {
    Engine::with_parts(
        workspace,
        cfg,
        Arc::new(gateway),
        Box::new(GitCli::new(workspace)),
        Box::new(ScriptedDecisions::new(decisions)),
    )
    .expect("engine")
}

#[test]
fn single_task_accept_walks_the_full_phase_sequence_with_one_commit() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_git_workspace(temp.path()).expect("git");
    write_plan(temp.path(), &single_task_plan());

    let calls = Arc::new(AtomicUsize::new(0));
    let gateway = coding_agent(temp.path().to_path_buf(), Arc::clone(&calls));
    let mut engine = engine(temp.path(), test_config(), gateway, vec![Decision::Accept]);

    let summary = engine.run_code_phase().expect("run");
    assert_eq!(
        summary.phases,
        vec![
            Phase::ReadyToStartTask,
            Phase::TaskInProgress,
            Phase::AwaitingVerification,
            Phase::AwaitingHumanReview,
            Phase::ReadyToCommit,
            Phase::PlanComplete,
        ]
    );
    assert_eq!(summary.commits.len(), 1);
    assert_eq!(commit_count(temp.path()).expect("count"), 2); // baseline + task

    let plan = codeteam_plan::load_active_plan(&temp.path().join(".codeteam/plans"))
        .expect("load")
        .expect("plan");
    assert_eq!(plan.tasks[0].status, TaskStatus::Completed);

    // Per-task scratch state is cleaned up after completion.
    assert!(!temp.path().join(".codeteam/logs/T1.md").exists());
    assert!(!temp.path().join(".codeteam/reports/T1.json").exists());
    assert!(!temp.path().join(".codeteam/decision.json").exists());
}

#[test]
fn rejection_reinvokes_the_coder_with_feedback_then_commits_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_git_workspace(temp.path()).expect("git");
    write_plan(temp.path(), &single_task_plan());

    let calls = Arc::new(AtomicUsize::new(0));
    let seen_feedback = Arc::new(AtomicUsize::new(0));
    let workspace = temp.path().to_path_buf();
    let calls_in_handler = Arc::clone(&calls);
    let seen = Arc::clone(&seen_feedback);
    let gateway = ScriptedGateway::new()
        .on_text(AgentRole::Prompter, "edit widget.rs")
        .on(AgentRole::Coder, move |req| {
            let call = calls_in_handler.fetch_add(1, Ordering::SeqCst) + 1;
            if req.prompt.contains("use a builder instead") {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            fs::write(
                workspace.join("widget.rs"),
                format!("// revision {call}\n"),
            )
            .map_err(|e| GatewayError::AgentUnavailable(e.to_string()))?;
            Ok(AgentReply {
                text: format!("revision {call} done"),
            })
        })
        .on_text(AgentRole::Verifier, "VERDICT: PASS")
        .on_text(AgentRole::Committer, "feat: widget with builder");
    let mut engine = engine(
        temp.path(),
        test_config(),
        gateway,
        vec![
            Decision::Reject {
                feedback: "use a builder instead".to_string(),
            },
            Decision::Accept,
        ],
    );

    let summary = engine.run_code_phase().expect("run");
    assert_eq!(
        summary.phases,
        vec![
            Phase::ReadyToStartTask,
            Phase::TaskInProgress,
            Phase::AwaitingVerification,
            Phase::AwaitingHumanReview,
            Phase::ReadyToStartTask, // reject consumed, feedback recorded
            Phase::TaskInProgress,   // coder re-run with feedback
            Phase::AwaitingVerification,
            Phase::AwaitingHumanReview,
            Phase::ReadyToCommit,
            Phase::PlanComplete,
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(seen_feedback.load(Ordering::SeqCst), 1);
    assert_eq!(summary.commits.len(), 1);
    assert_eq!(commit_count(temp.path()).expect("count"), 2);
}

#[test]
fn deferred_review_suspends_and_a_later_run_resumes_exactly_there() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_git_workspace(temp.path()).expect("git");
    write_plan(temp.path(), &single_task_plan());

    let calls = Arc::new(AtomicUsize::new(0));
    let gateway = coding_agent(temp.path().to_path_buf(), Arc::clone(&calls));
    let mut first = engine(temp.path(), test_config(), gateway, vec![]);

    // No decisions scripted: the gate defers and the invocation ends.
    let summary = first.run_code_phase().expect("run");
    assert_eq!(summary.final_phase(), Some(Phase::AwaitingHumanReview));
    assert!(summary.commits.is_empty());
    drop(first);

    // A fresh process re-derives the same phase and picks up from it.
    let gateway = coding_agent(temp.path().to_path_buf(), Arc::new(AtomicUsize::new(9)));
    let mut second = engine(temp.path(), test_config(), gateway, vec![Decision::Accept]);
    let summary = second.run_code_phase().expect("run");
    assert_eq!(
        summary.phases,
        vec![
            Phase::AwaitingHumanReview,
            Phase::ReadyToCommit,
            Phase::PlanComplete,
        ]
    );
    assert_eq!(summary.commits.len(), 1);
    assert_eq!(commit_count(temp.path()).expect("count"), 2);
}

#[test]
fn gateway_outage_aborts_cleanly_and_reinvocation_recovers() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_git_workspace(temp.path()).expect("git");
    write_plan(temp.path(), &single_task_plan());

    // No coder script: the coder call fails after the task is armed.
    let broken = ScriptedGateway::new().on_text(AgentRole::Prompter, "edit widget.rs");
    let mut first = engine(temp.path(), test_config(), broken, vec![]);
    let err = first.run_code_phase().expect_err("coder outage");
    assert!(err.to_string().contains("agent unavailable"));
    drop(first);

    // Task remains armed with its transcript; no status was corrupted.
    let plan = codeteam_plan::load_active_plan(&temp.path().join(".codeteam/plans"))
        .expect("load")
        .expect("plan");
    assert_eq!(plan.tasks[0].status, TaskStatus::InProgress);
    assert!(temp.path().join(".codeteam/logs/T1.md").exists());

    let calls = Arc::new(AtomicUsize::new(0));
    let gateway = coding_agent(temp.path().to_path_buf(), Arc::clone(&calls));
    let mut second = engine(temp.path(), test_config(), gateway, vec![Decision::Accept]);
    let summary = second.run_code_phase().expect("run");
    assert_eq!(summary.phases[0], Phase::TaskInProgress); // resume coding
    assert_eq!(summary.final_phase(), Some(Phase::PlanComplete));
    assert_eq!(commit_count(temp.path()).expect("count"), 2);
}

#[test]
fn failed_verification_still_reaches_human_review_with_diagnostics() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_git_workspace(temp.path()).expect("git");
    write_plan(temp.path(), &single_task_plan());

    let workspace = temp.path().to_path_buf();
    let gateway = ScriptedGateway::new()
        .on_text(AgentRole::Prompter, "edit widget.rs")
        .on(AgentRole::Coder, move |_req| {
            fs::write(workspace.join("widget.rs"), "pub fn widget() {}\n")
                .map_err(|e| GatewayError::AgentUnavailable(e.to_string()))?;
            Ok(AgentReply {
                text: "done".to_string(),
            })
        })
        .on_text(
            AgentRole::Verifier,
            "missing error handling in widget()\nVERDICT: FAIL",
        );
    let mut engine = engine(temp.path(), test_config(), gateway, vec![]);

    let summary = engine.run_code_phase().expect("run");
    assert_eq!(summary.final_phase(), Some(Phase::AwaitingHumanReview));

    let report = codeteam_verify::load_report(&temp.path().join(".codeteam/reports"), "T1")
        .expect("report");
    assert!(!report.result.accepted);
    assert!(!report.result.failed_categories().is_empty());
}

#[test]
fn unaccepted_plan_gates_before_any_task_starts() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_git_workspace(temp.path()).expect("git");
    let mut plan = single_task_plan();
    plan.accepted = false;
    write_plan(temp.path(), &plan);

    let calls = Arc::new(AtomicUsize::new(0));
    let gateway = coding_agent(temp.path().to_path_buf(), Arc::clone(&calls));
    let mut engine = engine(
        temp.path(),
        test_config(),
        gateway,
        vec![Decision::Accept, Decision::Accept],
    );

    let summary = engine.run_code_phase().expect("run");
    assert_eq!(summary.phases[0], Phase::AwaitingPlanAcceptance);
    assert_eq!(summary.phases[1], Phase::ReadyToStartTask);
    assert_eq!(summary.final_phase(), Some(Phase::PlanComplete));
    assert_eq!(summary.commits.len(), 1);
}

#[test]
fn dependency_order_commits_tasks_sequentially() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_git_workspace(temp.path()).expect("git");
    let plan = Plan {
        plan_id: "plan-0001".to_string(),
        request: "two stages".to_string(),
        accepted: true,
        tasks: vec![
            Task {
                id: "T1".to_string(),
                description: "first stage".to_string(),
                status: TaskStatus::Pending,
                dependencies: vec![],
            },
            Task {
                id: "T2".to_string(),
                description: "second stage".to_string(),
                status: TaskStatus::Pending,
                dependencies: vec!["T1".to_string()],
            },
        ],
    };
    write_plan(temp.path(), &plan);

    let calls = Arc::new(AtomicUsize::new(0));
    let gateway = coding_agent(temp.path().to_path_buf(), Arc::clone(&calls));
    let mut engine = engine(
        temp.path(),
        test_config(),
        gateway,
        vec![Decision::Accept, Decision::Accept],
    );

    let summary = engine.run_code_phase().expect("run");
    assert_eq!(summary.final_phase(), Some(Phase::PlanComplete));
    assert_eq!(summary.commits.len(), 2);
    assert_eq!(commit_count(temp.path()).expect("count"), 3);

    let plan = codeteam_plan::load_active_plan(&temp.path().join(".codeteam/plans"))
        .expect("load")
        .expect("plan");
    assert!(plan.tasks.iter().all(|t| t.status == TaskStatus::Completed));
}

#[test]
fn oversized_transcript_is_compacted_before_the_coder_runs() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_git_workspace(temp.path()).expect("git");
    write_plan(temp.path(), &single_task_plan());

    let mut cfg = test_config();
    cfg.coder.log_compact_threshold = 200;

    let workspace = temp.path().to_path_buf();
    let gateway = ScriptedGateway::new()
        // Long instructions push the transcript over the bound immediately.
        .on_text(AgentRole::Prompter, &"step by step instructions ".repeat(40))
        .on(AgentRole::Coder, move |_req| {
            fs::write(workspace.join("widget.rs"), "pub fn widget() {}\n")
                .map_err(|e| GatewayError::AgentUnavailable(e.to_string()))?;
            Ok(AgentReply {
                text: "done".to_string(),
            })
        })
        .on_text(AgentRole::Summarizer, "condensed: implement widget.rs")
        .on_text(AgentRole::Verifier, "VERDICT: PASS");
    let mut engine = engine(temp.path(), cfg, gateway, vec![]);

    let summary = engine.run_code_phase().expect("run");
    assert_eq!(summary.final_phase(), Some(Phase::AwaitingHumanReview));

    let transcript = fs::read_to_string(temp.path().join(".codeteam/logs/T1.md"))
        .expect("transcript");
    assert!(transcript.contains("Compacted context"));
    assert!(transcript.contains("condensed: implement widget.rs"));

    let log = fs::read_to_string(temp.path().join(".codeteam/observe.log")).expect("log");
    assert!(log.contains("ContextCompactedV1"));
}

#[test]
fn plan_phase_persists_a_validated_plan_with_review_feedback() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_git_workspace(temp.path()).expect("git");

    let gateway = ScriptedGateway::new()
        .on_text(
            AgentRole::Planner,
            "```json\n{\"tasks\": [\n  {\"id\": \"T1\", \"description\": \"scaffold\", \"dependencies\": []},\n  {\"id\": \"T2\", \"description\": \"wire up\", \"dependencies\": [\"T1\"]}\n]}\n```",
        )
        .on_text(AgentRole::PlanReviewer, "The plan is sound.");
    let mut engine = engine(temp.path(), test_config(), gateway, vec![]);

    let outcome = engine.run_plan_phase("build the thing").expect("plan phase");
    assert_eq!(outcome.tasks, 2);
    assert!(!outcome.accepted); // deferred at the acceptance gate
    assert!(outcome.document.exists());
    assert!(outcome.document.with_file_name("FEEDBACK.md").exists());
}

#[test]
fn planner_reply_with_cyclic_dependencies_is_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_git_workspace(temp.path()).expect("git");

    let gateway = ScriptedGateway::new().on_text(
        AgentRole::Planner,
        "{\"tasks\": [{\"id\": \"A\", \"description\": \"a\", \"dependencies\": [\"B\"]}, {\"id\": \"B\", \"description\": \"b\", \"dependencies\": [\"A\"]}]}",
    );
    let mut engine = engine(temp.path(), test_config(), gateway, vec![]);

    let err = engine.run_plan_phase("impossible").expect_err("cycle");
    assert!(err.to_string().contains("dependency cycle"));
    // Nothing was persisted for the rejected plan.
    assert!(
        codeteam_plan::load_active_plan(&temp.path().join(".codeteam/plans"))
            .expect("load")
            .is_none()
    );
}

#[test]
fn concurrent_engines_are_excluded_by_the_run_lock() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_git_workspace(temp.path()).expect("git");
    write_plan(temp.path(), &single_task_plan());

    // Simulate a live orchestrator by holding the lock file directly.
    fs::create_dir_all(temp.path().join(".codeteam")).expect("dir");
    fs::write(temp.path().join(".codeteam/lock"), "12345").expect("lock");

    let gateway = ScriptedGateway::new();
    let mut engine = engine(temp.path(), test_config(), gateway, vec![]);
    let err = engine.run_code_phase().expect_err("locked");
    assert!(err.to_string().contains("lock"));
}
