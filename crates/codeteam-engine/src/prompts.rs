//! Prompt builders for each agent role. Rendering is deliberately plain —
//! the interesting contract is what each role must return, not the prose.

use codeteam_core::Task;

pub fn planner(request: &str, repo_map: &str) -> String {
    format!(
        "Break the following request into an ordered implementation plan.\n\
         Request: {request}\n\n\
         Repository files:\n{repo_map}\n\
         Reply with a single JSON object:\n\
         {{\"tasks\": [{{\"id\": \"T1\", \"description\": \"...\", \"dependencies\": []}}]}}\n\
         Dependencies reference task ids in the same plan and must form a DAG.\n\
         Order tasks in the sequence they should be executed."
    )
}

pub fn plan_reviewer(request: &str, plan_json: &str) -> String {
    format!(
        "Critically review this implementation plan for feasibility,\n\
         completeness, and ordering problems.\n\
         Original request: {request}\n\n\
         ```json\n{plan_json}\n```\n\n\
         List concrete issues, or state that the plan is sound."
    )
}

pub fn prompter(task: &Task) -> String {
    format!(
        "Write detailed, self-contained instructions for a coding agent.\n\
         Task `{}`: {}\n\
         Include the files likely involved, the expected behavior, and how\n\
         the change should be tested.",
        task.id, task.description
    )
}

pub fn coder(task: &Task, feedback: Option<&str>) -> String {
    let mut prompt = format!(
        "Implement task `{}` in the working tree, following the instructions\n\
         in the transcript above.\n",
        task.id
    );
    if let Some(feedback) = feedback {
        prompt.push_str(&format!(
            "\nA previous attempt was rejected with this feedback. Address it:\n{feedback}\n"
        ));
    }
    prompt.push_str("\nWhen done, summarize what you changed.");
    prompt
}

pub fn summarizer(transcript: &str) -> String {
    format!(
        "Condense this task transcript. Preserve file paths, decisions,\n\
         errors encountered, and anything the next coding step depends on.\n\
         Keep it short; drop verbatim tool output.\n\n{transcript}"
    )
}

pub fn committer(task: &Task, attribution: &str) -> String {
    format!(
        "Write a conventional commit message for the completed task.\n\
         Task `{}`: {}\n\
         First line under 72 characters, then a short body. End the body\n\
         with the trailer `Generated-by: {attribution}`.\n\
         Reply with the message only.",
        task.id, task.description
    )
}

pub fn review_gate(task: &Task, report: &str) -> String {
    format!(
        "Verification report for task `{}` ({}):\n\n{report}",
        task.id, task.description
    )
}

pub fn acceptance_gate(plan_id: &str, tasks: usize) -> String {
    format!("Plan `{plan_id}` with {tasks} task(s) awaits acceptance.")
}
