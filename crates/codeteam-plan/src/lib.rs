//! Plan document persistence, validation, and task scheduling.
//!
//! A plan is validated once, when it is loaded or first persisted — a
//! malformed dependency graph is rejected up front so the scheduler can
//! assume a DAG and stay a pure query.

use codeteam_core::{Plan, Task, TaskStatus};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum PlanError {
    #[error("plan has no tasks")]
    EmptyPlan,
    #[error("duplicate task id `{0}`")]
    DuplicateTaskId(String),
    #[error("task `{task}` depends on unknown task `{dependency}`")]
    UnknownDependency { task: String, dependency: String },
    #[error("dependency cycle involving task `{0}`")]
    DependencyCycle(String),
    #[error("plan document i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("plan document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Reject duplicate ids, dangling dependencies, and cycles. Called at plan
/// load/accept time, never during scheduling.
pub fn validate(plan: &Plan) -> Result<(), PlanError> {
    if plan.tasks.is_empty() {
        return Err(PlanError::EmptyPlan);
    }

    let mut ids = HashSet::new();
    for task in &plan.tasks {
        if !ids.insert(task.id.as_str()) {
            return Err(PlanError::DuplicateTaskId(task.id.clone()));
        }
    }
    for task in &plan.tasks {
        for dep in &task.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(PlanError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // Three-color DFS over the dependency edges. Gray on the stack means a
    // back edge, i.e. a cycle (self-dependencies included).
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Gray,
        Black,
    }
    let deps: HashMap<&str, &[String]> = plan
        .tasks
        .iter()
        .map(|t| (t.id.as_str(), t.dependencies.as_slice()))
        .collect();
    let mut marks: HashMap<&str, Mark> = plan
        .tasks
        .iter()
        .map(|t| (t.id.as_str(), Mark::White))
        .collect();

    fn visit<'a>(
        id: &'a str,
        deps: &HashMap<&'a str, &'a [String]>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<(), PlanError> {
        match marks[id] {
            Mark::Black => return Ok(()),
            Mark::Gray => return Err(PlanError::DependencyCycle(id.to_string())),
            Mark::White => {}
        }
        marks.insert(id, Mark::Gray);
        for dep in deps[id] {
            visit(dep.as_str(), deps, marks)?;
        }
        marks.insert(id, Mark::Black);
        Ok(())
    }

    for task in &plan.tasks {
        visit(task.id.as_str(), &deps, &mut marks)?;
    }
    Ok(())
}

/// Select the next task eligible for execution: the first task in declared
/// order whose status is `pending` and whose dependencies are all
/// `completed`. Declared order is the only tie-break. Pure query.
#[must_use]
pub fn next_eligible_task(plan: &Plan) -> Option<&Task> {
    let completed: HashSet<&str> = plan
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| t.id.as_str())
        .collect();
    plan.tasks.iter().find(|t| {
        t.status == TaskStatus::Pending
            && t.dependencies.iter().all(|d| completed.contains(d.as_str()))
    })
}

pub fn load_plan(path: &Path) -> Result<Plan, PlanError> {
    let raw = fs::read_to_string(path)?;
    let plan: Plan = serde_json::from_str(&raw)?;
    validate(&plan)?;
    Ok(plan)
}

pub fn save_plan(path: &Path, plan: &Plan) -> Result<(), PlanError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(plan)?)?;
    Ok(())
}

/// Plan directories are named `plan-NNNN`; the highest sequence number is
/// the active plan.
#[must_use]
pub fn latest_plan_dir(plans_dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(plans_dir).ok()?;
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs.pop()
}

#[must_use]
pub fn next_plan_id(plans_dir: &Path) -> String {
    let count = fs::read_dir(plans_dir)
        .map(|entries| entries.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()).count())
        .unwrap_or(0);
    format!("plan-{:04}", count + 1)
}

/// Load the active plan for a workspace, if one exists.
pub fn load_active_plan(plans_dir: &Path) -> Result<Option<Plan>, PlanError> {
    let Some(dir) = latest_plan_dir(plans_dir) else {
        return Ok(None);
    };
    let path = dir.join("plan.json");
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(load_plan(&path)?))
}

pub fn plan_document_path(plans_dir: &Path, plan_id: &str) -> PathBuf {
    plans_dir.join(plan_id).join("plan.json")
}
