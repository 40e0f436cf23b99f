//! Process-backed gateway: pipes the prompt through a local agent CLI.
//! The configured command receives the prompt on stdin and prints its
//! reply to stdout; a non-zero exit or deadline overrun fails the call.

use crate::{AgentGateway, AgentReply, AgentRequest, GatewayError, render_body};
use codeteam_core::GatewayConfig;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

#[derive(Debug, Clone)]
pub struct ProcessGateway {
    cfg: GatewayConfig,
}

impl ProcessGateway {
    pub fn new(cfg: GatewayConfig) -> Self {
        Self { cfg }
    }

    fn spawn(&self) -> Result<std::process::Child, GatewayError> {
        let mut command = shell_command(&self.cfg.agent_command);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command
            .spawn()
            .map_err(|e| GatewayError::AgentUnavailable(format!(
                "failed to spawn `{}`: {e}",
                self.cfg.agent_command
            )))
    }
}

impl AgentGateway for ProcessGateway {
    fn invoke(&self, req: &AgentRequest) -> Result<AgentReply, GatewayError> {
        let body = render_body(req);
        let mut child = self.spawn()?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| GatewayError::AgentUnavailable("no stdin pipe".to_string()))?;
            stdin
                .write_all(body.as_bytes())
                .map_err(|e| GatewayError::AgentUnavailable(format!("stdin write: {e}")))?;
            // Dropping the handle closes the pipe so the child sees EOF.
        }

        let timeout = Duration::from_secs(self.cfg.timeout_seconds);
        let status = child
            .wait_timeout(timeout)
            .map_err(|e| GatewayError::AgentUnavailable(format!("wait: {e}")))?;
        if status.is_none() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(GatewayError::AgentTimeout(self.cfg.timeout_seconds));
        }

        let output = child
            .wait_with_output()
            .map_err(|e| GatewayError::AgentUnavailable(format!("collect output: {e}")))?;
        if !output.status.success() {
            return Err(GatewayError::AgentUnavailable(format!(
                "agent command exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(GatewayError::MalformedReply(
                "agent produced no output".to_string(),
            ));
        }
        Ok(AgentReply { text })
    }
}

#[cfg(target_os = "windows")]
fn shell_command(cmd: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(cmd);
    command
}

#[cfg(not(target_os = "windows"))]
fn shell_command(cmd: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-lc").arg(cmd);
    command
}
