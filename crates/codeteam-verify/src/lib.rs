//! Verification engine: fans a set of verifier instances out over a
//! bounded worker pool, joins them all, and aggregates per-category
//! results with unanimous-pass semantics.
//!
//! A category's result is `fail` if any of its instances fails. A category
//! configured with 0 instances contributes nothing — it is vacuously
//! passing and never appears in reported failures. One instance failing or
//! timing out never cancels its siblings; the run always completes and
//! reports every instance's diagnostics.

mod report;

pub use report::{
    VerificationReport, delete_report, load_report, report_path, save_report, tree_digest,
};

use codeteam_core::{AgentRole, Task, VerificationCommand};
use codeteam_gateway::{AgentGateway, AgentRequest, parsing};
use codeteam_tools::ShellRunner;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const MAX_OUTPUT_CHARS: usize = 4000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceResult {
    pub category: String,
    pub instance: usize,
    pub passed: bool,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryResult {
    pub name: String,
    pub passed: bool,
    pub instances: Vec<InstanceResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResult {
    pub accepted: bool,
    pub categories: Vec<CategoryResult>,
}

impl AggregateResult {
    #[must_use]
    pub fn failed_categories(&self) -> Vec<&str> {
        self.categories
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Human-readable report body, one section per category.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for category in &self.categories {
            out.push_str(&format!(
                "## {} — {}\n\n",
                category.name,
                if category.passed { "PASS" } else { "FAIL" }
            ));
            for instance in &category.instances {
                out.push_str(&format!(
                    "### instance {} — {}\n\n{}\n\n",
                    instance.instance,
                    if instance.passed { "pass" } else { "fail" },
                    instance.output.trim()
                ));
            }
        }
        if self.categories.is_empty() {
            out.push_str("no verification categories enabled\n");
        }
        out
    }
}

#[derive(Debug, Clone)]
enum InstanceExec {
    Agent { prompt: String },
    Command { command: String },
}

#[derive(Debug, Clone)]
struct InstanceSpec {
    category: String,
    instance: usize,
    exec: InstanceExec,
}

pub struct VerificationEngine {
    gateway: Arc<dyn AgentGateway>,
    runner: Arc<dyn ShellRunner + Send + Sync>,
    workspace: PathBuf,
    instances: BTreeMap<String, usize>,
    commands: Vec<VerificationCommand>,
    command_timeout: Duration,
    max_concurrency: usize,
}

impl VerificationEngine {
    pub fn new(
        gateway: Arc<dyn AgentGateway>,
        runner: Arc<dyn ShellRunner + Send + Sync>,
        workspace: &Path,
        instances: BTreeMap<String, usize>,
        commands: Vec<VerificationCommand>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            runner,
            workspace: workspace.to_path_buf(),
            instances,
            commands,
            command_timeout,
            max_concurrency: 4,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Run every enabled verifier instance concurrently and aggregate.
    pub fn run(&self, task: &Task, diff: &str) -> AggregateResult {
        let mut specs = Vec::new();
        for (category, count) in &self.instances {
            for instance in 0..*count {
                specs.push(InstanceSpec {
                    category: category.clone(),
                    instance,
                    exec: InstanceExec::Agent {
                        prompt: verifier_prompt(category, task, diff),
                    },
                });
            }
        }
        for command in &self.commands {
            specs.push(InstanceSpec {
                category: command.name.clone(),
                instance: 0,
                exec: InstanceExec::Command {
                    command: command.command.clone(),
                },
            });
        }

        let mut order: Vec<String> = Vec::new();
        for spec in &specs {
            if !order.contains(&spec.category) {
                order.push(spec.category.clone());
            }
        }
        let results = self.run_specs(specs);
        aggregate(results, &order)
    }

    /// Bounded fan-out with a join barrier: batches of at most
    /// `max_concurrency` threads, every handle joined before the next
    /// batch starts.
    fn run_specs(&self, specs: Vec<InstanceSpec>) -> Vec<InstanceResult> {
        let mut pending = specs;
        let mut out = Vec::new();

        while !pending.is_empty() {
            let chunk_len = pending.len().min(self.max_concurrency);
            let chunk = pending.drain(0..chunk_len).collect::<Vec<_>>();
            let mut handles = Vec::new();
            for spec in chunk {
                let gateway = Arc::clone(&self.gateway);
                let runner = Arc::clone(&self.runner);
                let workspace = self.workspace.clone();
                let timeout = self.command_timeout;
                handles.push(thread::spawn(move || {
                    run_instance(spec, gateway.as_ref(), runner.as_ref(), &workspace, timeout)
                }));
            }
            for handle in handles {
                if let Ok(result) = handle.join() {
                    out.push(result);
                }
            }
        }

        out
    }
}

fn run_instance(
    spec: InstanceSpec,
    gateway: &dyn AgentGateway,
    runner: &dyn ShellRunner,
    workspace: &Path,
    timeout: Duration,
) -> InstanceResult {
    let (passed, output) = match &spec.exec {
        InstanceExec::Agent { prompt } => {
            match gateway.invoke(&AgentRequest::new(AgentRole::Verifier, prompt.clone())) {
                Ok(reply) => match parsing::parse_verdict(&reply.text) {
                    Some(verdict) => (verdict, reply.text),
                    None => (
                        false,
                        format!("no PASS/FAIL verdict in report:\n{}", reply.text),
                    ),
                },
                Err(err) => (false, format!("verifier instance error: {err}")),
            }
        }
        InstanceExec::Command { command } => {
            match runner.run(command, workspace, timeout) {
                Ok(result) => {
                    let mut output = result.combined_output();
                    if result.timed_out {
                        output = format!("`{command}` timed out\n{output}");
                    }
                    (result.success(), output)
                }
                Err(err) => (false, format!("failed to run `{command}`: {err}")),
            }
        }
    };

    InstanceResult {
        category: spec.category,
        instance: spec.instance,
        passed,
        output: truncate(&output, MAX_OUTPUT_CHARS),
    }
}

/// Group instance results by category (in first-seen order) and apply
/// unanimous-pass aggregation.
fn aggregate(results: Vec<InstanceResult>, order: &[String]) -> AggregateResult {
    let mut grouped: BTreeMap<&str, Vec<InstanceResult>> = BTreeMap::new();
    for result in &results {
        grouped
            .entry(result.category.as_str())
            .or_default()
            .push(result.clone());
    }

    let mut categories = Vec::new();
    for name in order {
        let Some(instances) = grouped.remove(name.as_str()) else {
            continue;
        };
        let passed = instances.iter().all(|i| i.passed);
        categories.push(CategoryResult {
            name: name.clone(),
            passed,
            instances,
        });
    }

    let accepted = categories.iter().all(|c| c.passed);
    AggregateResult {
        accepted,
        categories,
    }
}

fn verifier_prompt(category: &str, task: &Task, diff: &str) -> String {
    format!(
        "Review the following change for the `{category}` concern.\n\
         Task `{}`: {}\n\n\
         ```diff\n{diff}\n```\n\n\
         End your report with a line containing only `VERDICT: PASS` or `VERDICT: FAIL`.",
        task.id, task.description
    )
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &text[..end])
}
