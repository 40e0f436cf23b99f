//! Shared test harness: scripted agents, scripted decisions, and git
//! workspace scaffolding for integration tests.

use anyhow::Result;
use codeteam_core::{AgentRole, Decision};
use codeteam_engine::DecisionSource;
use codeteam_gateway::{AgentGateway, AgentReply, AgentRequest, GatewayError};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

type Handler = Box<dyn Fn(&AgentRequest) -> Result<AgentReply, GatewayError> + Send + Sync>;

/// Gateway whose replies are scripted per role. Roles without a script
/// fail with `AgentUnavailable`, which doubles as a test for the
/// re-invocation recovery path.
#[derive(Default)]
pub struct ScriptedGateway {
    handlers: HashMap<AgentRole, Handler>,
}

impl ScriptedGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on<F>(mut self, role: AgentRole, handler: F) -> Self
    where
        F: Fn(&AgentRequest) -> Result<AgentReply, GatewayError> + Send + Sync + 'static,
    {
        self.handlers.insert(role, Box::new(handler));
        self
    }

    /// Script a fixed text reply for a role.
    #[must_use]
    pub fn on_text(self, role: AgentRole, text: &str) -> Self {
        let text = text.to_string();
        self.on(role, move |_req| {
            Ok(AgentReply {
                text: text.clone(),
            })
        })
    }
}

impl AgentGateway for ScriptedGateway {
    fn invoke(&self, req: &AgentRequest) -> Result<AgentReply, GatewayError> {
        match self.handlers.get(&req.role) {
            Some(handler) => handler(req),
            None => Err(GatewayError::AgentUnavailable(format!(
                "no script for role `{}`",
                req.role.as_str()
            ))),
        }
    }
}

/// Decision source that plays back a queue; an exhausted queue defers,
/// matching how a suspended run ends.
pub struct ScriptedDecisions(Mutex<Vec<Decision>>);

impl ScriptedDecisions {
    #[must_use]
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self(Mutex::new(decisions))
    }
}

impl DecisionSource for ScriptedDecisions {
    fn decide(&mut self, _prompt: &str) -> Result<Decision> {
        let mut queue = self.0.lock().expect("lock");
        Ok(if queue.is_empty() {
            Decision::Defer
        } else {
            queue.remove(0)
        })
    }
}

/// Initialize a git repository with one baseline commit so HEAD exists.
pub fn init_git_workspace(dir: &Path) -> Result<()> {
    run_git(dir, &["init", "-q"])?;
    run_git(dir, &["config", "user.email", "test@example.com"])?;
    run_git(dir, &["config", "user.name", "Test"])?;
    std::fs::write(dir.join("README.md"), "# fixture\n")?;
    run_git(dir, &["add", "-A"])?;
    run_git(dir, &["commit", "-q", "-m", "baseline"])?;
    Ok(())
}

/// Number of commits on HEAD.
pub fn commit_count(dir: &Path) -> Result<usize> {
    let output = Command::new("git")
        .args(["rev-list", "--count", "HEAD"])
        .current_dir(dir)
        .output()?;
    anyhow::ensure!(output.status.success(), "rev-list failed");
    Ok(String::from_utf8_lossy(&output.stdout).trim().parse()?)
}

fn run_git(dir: &Path, args: &[&str]) -> Result<()> {
    let status = Command::new("git").args(args).current_dir(dir).status()?;
    anyhow::ensure!(status.success(), "git {args:?} failed");
    Ok(())
}
