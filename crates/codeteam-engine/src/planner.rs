//! Turning a planner reply into a validated plan document.

use codeteam_core::{Plan, Task, TaskStatus};
use codeteam_gateway::parsing::extract_json_snippet;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct PlanLlmShape {
    tasks: Vec<PlanLlmTask>,
}

#[derive(Debug, Deserialize)]
struct PlanLlmTask {
    #[serde(default)]
    id: Option<String>,
    description: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Parse the planner's JSON reply into a plan. Tasks without an id get a
/// positional `T{n}` one; blank descriptions are dropped. Returns `None`
/// when no usable task list can be extracted — validation of the
/// dependency graph happens separately, at persist time.
#[must_use]
pub fn parse_plan_from_reply(text: &str, plan_id: &str, request: &str) -> Option<Plan> {
    let snippet = extract_json_snippet(text)?;
    let parsed: PlanLlmShape = serde_json::from_str(snippet).ok()?;

    let mut tasks = Vec::new();
    for (index, task) in parsed.tasks.into_iter().enumerate() {
        let description = task.description.trim().to_string();
        if description.is_empty() {
            continue;
        }
        let id = task
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("T{}", index + 1));
        let dependencies = task
            .dependencies
            .into_iter()
            .map(|dep| dep.trim().to_string())
            .filter(|dep| !dep.is_empty())
            .collect();
        tasks.push(Task {
            id,
            description,
            status: TaskStatus::Pending,
            dependencies,
        });
    }
    if tasks.is_empty() {
        return None;
    }

    Some(Plan {
        plan_id: plan_id.to_string(),
        request: request.to_string(),
        accepted: false,
        tasks,
    })
}
