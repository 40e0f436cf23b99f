//! Gateway to external collaborative agents.
//!
//! Every agent role goes through the one [`AgentGateway`] interface; the
//! orchestrator never cares which backend answered. Calls are blocking
//! round trips — an interrupted call is simply re-issued on the next run.

pub mod parsing;
mod process;
mod http;

pub use http::HttpGateway;
pub use process::ProcessGateway;

use codeteam_core::{AgentRole, GatewayConfig};

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub role: AgentRole,
    pub prompt: String,
    /// Running transcript for the task, prepended as context when present.
    pub transcript: Option<String>,
}

impl AgentRequest {
    pub fn new(role: AgentRole, prompt: impl Into<String>) -> Self {
        Self {
            role,
            prompt: prompt.into(),
            transcript: None,
        }
    }

    #[must_use]
    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct AgentReply {
    pub text: String,
}

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("agent unavailable: {0}")]
    AgentUnavailable(String),
    #[error("agent call timed out after {0}s")]
    AgentTimeout(u64),
    #[error("agent reply was malformed: {0}")]
    MalformedReply(String),
}

pub trait AgentGateway: Send + Sync {
    fn invoke(&self, req: &AgentRequest) -> Result<AgentReply, GatewayError>;
}

/// Construct the configured gateway backend.
pub fn from_config(cfg: &GatewayConfig) -> Result<Box<dyn AgentGateway>, GatewayError> {
    match cfg.provider.as_str() {
        "process" => Ok(Box::new(ProcessGateway::new(cfg.clone()))),
        "http" => Ok(Box::new(HttpGateway::new(cfg.clone())?)),
        other => Err(GatewayError::AgentUnavailable(format!(
            "unknown gateway provider `{other}`"
        ))),
    }
}

/// Assemble the full prompt body sent to a backend: role header, prior
/// transcript (when any), then the instruction.
pub(crate) fn render_body(req: &AgentRequest) -> String {
    let mut body = format!("[role: {}]\n\n", req.role.as_str());
    if let Some(transcript) = &req.transcript
        && !transcript.trim().is_empty()
    {
        body.push_str("## Prior transcript\n\n");
        body.push_str(transcript);
        body.push_str("\n\n## Instruction\n\n");
    }
    body.push_str(&req.prompt);
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_body_includes_transcript_section_when_present() {
        let req = AgentRequest::new(AgentRole::Coder, "do the thing")
            .with_transcript("earlier context");
        let body = render_body(&req);
        assert!(body.starts_with("[role: coder]"));
        assert!(body.contains("## Prior transcript"));
        assert!(body.contains("earlier context"));
        assert!(body.ends_with("do the thing"));
    }

    #[test]
    fn render_body_skips_empty_transcript() {
        let req = AgentRequest::new(AgentRole::Planner, "plan it").with_transcript("  ");
        let body = render_body(&req);
        assert!(!body.contains("## Prior transcript"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let cfg = GatewayConfig {
            provider: "carrier-pigeon".to_string(),
            ..GatewayConfig::default()
        };
        assert!(matches!(
            from_config(&cfg),
            Err(GatewayError::AgentUnavailable(_))
        ));
    }
}
