//! Human gate: suspension points that need an explicit external decision.
//!
//! A decision is either read from an unconsumed marker file or obtained
//! from the configured [`DecisionSource`]. Markers are consumed exactly
//! once — reading one deletes it, so a stale decision can never be
//! reapplied by a later reconciliation pass.

use anyhow::Result;
use codeteam_core::Decision;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DecisionMarker {
    subject: String,
    #[serde(flatten)]
    decision: Decision,
}

pub trait DecisionSource: Send {
    fn decide(&mut self, prompt: &str) -> Result<Decision>;
}

/// Interactive source: `/accept`, `/reject <feedback>`, `/defer`.
pub struct StdinDecisions;

impl DecisionSource for StdinDecisions {
    fn decide(&mut self, prompt: &str) -> Result<Decision> {
        println!("{prompt}");
        println!("Type /accept, /reject <feedback>, or /defer to stop here.");
        loop {
            print!("> ");
            io::stdout().flush()?;
            let mut line = String::new();
            if io::stdin().lock().read_line(&mut line)? == 0 {
                // EOF: treat as defer so a piped run suspends cleanly.
                return Ok(Decision::Defer);
            }
            let line = line.trim();
            if line == "/accept" {
                return Ok(Decision::Accept);
            }
            if line == "/defer" {
                return Ok(Decision::Defer);
            }
            if let Some(feedback) = line.strip_prefix("/reject") {
                return Ok(Decision::Reject {
                    feedback: feedback.trim().to_string(),
                });
            }
            println!("Invalid command.");
        }
    }
}

/// Non-interactive source: always defers, preserving exact resumability.
pub struct AutoDefer;

impl DecisionSource for AutoDefer {
    fn decide(&mut self, _prompt: &str) -> Result<Decision> {
        Ok(Decision::Defer)
    }
}

pub struct HumanGate {
    marker_path: PathBuf,
    source: Box<dyn DecisionSource>,
}

impl HumanGate {
    pub fn new(runtime_dir: &Path, source: Box<dyn DecisionSource>) -> Self {
        Self {
            marker_path: runtime_dir.join("decision.json"),
            source,
        }
    }

    /// Read the pending decision for `subject` without consuming it.
    /// Markers for other subjects are ignored.
    pub fn peek(&self, subject: &str) -> Option<Decision> {
        let raw = fs::read_to_string(&self.marker_path).ok()?;
        let marker: DecisionMarker = serde_json::from_str(&raw).ok()?;
        (marker.subject == subject).then_some(marker.decision)
    }

    /// Consume the pending decision for `subject`, clearing the marker.
    pub fn consume(&self, subject: &str) -> Result<Option<Decision>> {
        let Some(decision) = self.peek(subject) else {
            return Ok(None);
        };
        fs::remove_file(&self.marker_path)?;
        Ok(Some(decision))
    }

    /// Record a decision marker. Defer is never persisted — it only ends
    /// the current invocation.
    pub fn record(&self, subject: &str, decision: &Decision) -> Result<()> {
        if matches!(decision, Decision::Defer) {
            return Ok(());
        }
        if let Some(parent) = self.marker_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let marker = DecisionMarker {
            subject: subject.to_string(),
            decision: decision.clone(),
        };
        fs::write(&self.marker_path, serde_json::to_vec_pretty(&marker)?)?;
        Ok(())
    }

    /// Suspend on a decision point: an unconsumed marker wins, otherwise
    /// the source is asked.
    pub fn suspend(&mut self, subject: &str, prompt: &str) -> Result<Decision> {
        if let Some(decision) = self.consume(subject)? {
            return Ok(decision);
        }
        self.source.decide(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(Vec<Decision>);
    impl DecisionSource for Scripted {
        fn decide(&mut self, _prompt: &str) -> Result<Decision> {
            Ok(if self.0.is_empty() {
                Decision::Defer
            } else {
                self.0.remove(0)
            })
        }
    }

    #[test]
    fn marker_is_consumed_exactly_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = HumanGate::new(temp.path(), Box::new(AutoDefer));
        gate.record("T1", &Decision::Accept).expect("record");

        assert_eq!(gate.peek("T1"), Some(Decision::Accept));
        assert_eq!(gate.consume("T1").expect("consume"), Some(Decision::Accept));
        // Cleared: a second pass must not see the stale decision.
        assert_eq!(gate.peek("T1"), None);
        assert_eq!(gate.consume("T1").expect("consume"), None);
    }

    #[test]
    fn marker_for_other_subject_is_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = HumanGate::new(temp.path(), Box::new(AutoDefer));
        gate.record(
            "T1",
            &Decision::Reject {
                feedback: "nope".to_string(),
            },
        )
        .expect("record");
        assert_eq!(gate.peek("T2"), None);
    }

    #[test]
    fn defer_is_never_persisted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = HumanGate::new(temp.path(), Box::new(AutoDefer));
        gate.record("T1", &Decision::Defer).expect("record");
        assert_eq!(gate.peek("T1"), None);
    }

    #[test]
    fn suspend_prefers_marker_over_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut gate = HumanGate::new(temp.path(), Box::new(Scripted(vec![Decision::Accept])));
        gate.record(
            "T1",
            &Decision::Reject {
                feedback: "fix lint".to_string(),
            },
        )
        .expect("record");
        let decision = gate.suspend("T1", "review?").expect("suspend");
        assert_eq!(
            decision,
            Decision::Reject {
                feedback: "fix lint".to_string()
            }
        );
        // Marker consumed; the scripted source answers the next suspension.
        assert_eq!(gate.suspend("T1", "review?").expect("suspend"), Decision::Accept);
    }
}
