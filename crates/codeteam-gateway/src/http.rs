//! HTTP-backed gateway for chat-completions style endpoints.

use crate::{AgentGateway, AgentReply, AgentRequest, GatewayError, render_body};
use codeteam_core::GatewayConfig;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::thread;
use std::time::Duration;

pub struct HttpGateway {
    cfg: GatewayConfig,
    client: Client,
}

impl HttpGateway {
    pub fn new(cfg: GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()
            .map_err(|e| GatewayError::AgentUnavailable(e.to_string()))?;
        Ok(Self { cfg, client })
    }

    fn api_key(&self) -> Result<String, GatewayError> {
        std::env::var(&self.cfg.api_key_env).map_err(|_| {
            GatewayError::AgentUnavailable(format!(
                "api key env `{}` is not set",
                self.cfg.api_key_env
            ))
        })
    }

    fn payload(&self, req: &AgentRequest) -> Value {
        json!({
            "model": self.cfg.model,
            "max_tokens": 8192,
            "messages": [
                {"role": "system", "content": format!("You are the {} agent of a code-change workflow.", req.role.as_str())},
                {"role": "user", "content": render_body(req)},
            ],
        })
    }
}

impl AgentGateway for HttpGateway {
    fn invoke(&self, req: &AgentRequest) -> Result<AgentReply, GatewayError> {
        let api_key = self.api_key()?;
        let payload = self.payload(req);

        let mut last_err: Option<GatewayError> = None;
        let mut attempt: u8 = 0;
        while attempt <= self.cfg.max_retries {
            let response = self
                .client
                .post(&self.cfg.endpoint)
                .bearer_auth(&api_key)
                .json(&payload)
                .send();

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp
                        .text()
                        .map_err(|e| GatewayError::AgentUnavailable(e.to_string()))?;
                    if status.is_success() {
                        let text = extract_reply_text(&body)?;
                        return Ok(AgentReply { text });
                    }
                    last_err = Some(GatewayError::AgentUnavailable(format!(
                        "endpoint returned {status}: {}",
                        truncate(&body, 400)
                    )));
                    if should_retry_status(status) && attempt < self.cfg.max_retries {
                        thread::sleep(backoff(self.cfg.retry_base_ms, attempt));
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                    break;
                }
                Err(e) => {
                    last_err = Some(if e.is_timeout() {
                        GatewayError::AgentTimeout(self.cfg.timeout_seconds)
                    } else {
                        GatewayError::AgentUnavailable(e.to_string())
                    });
                    if attempt < self.cfg.max_retries {
                        thread::sleep(backoff(self.cfg.retry_base_ms, attempt));
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                    break;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| GatewayError::AgentUnavailable("request never sent".to_string())))
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff(base_ms: u64, attempt: u8) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(1 << attempt.min(6)))
}

/// Pull the assistant text out of a chat-completions reply. Supports the
/// OpenAI-compatible `choices[0].message.content` shape and the Anthropic
/// `content[0].text` shape.
fn extract_reply_text(body: &str) -> Result<String, GatewayError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| GatewayError::MalformedReply(format!("invalid json: {e}")))?;

    let text = value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .or_else(|| value.pointer("/content/0/text").and_then(Value::as_str));

    match text {
        Some(t) if !t.trim().is_empty() => Ok(t.trim().to_string()),
        _ => Err(GatewayError::MalformedReply(format!(
            "no assistant text in reply: {}",
            truncate(body, 200)
        ))),
    }
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
