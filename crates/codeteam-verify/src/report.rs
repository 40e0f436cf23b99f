//! Persisted verification reports.
//!
//! A report is stamped with a digest of the working tree it verified.
//! At reconciliation time the report counts only if its digest still
//! matches the tree — any edit after verification invalidates it.

use crate::AggregateResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub task_id: String,
    pub tree_digest: String,
    pub at: DateTime<Utc>,
    pub result: AggregateResult,
}

/// SHA-256 over the diff and short status of the working tree.
#[must_use]
pub fn tree_digest(diff: &str, status_short: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(diff.as_bytes());
    hasher.update(b"\x00");
    hasher.update(status_short.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn report_path(reports_dir: &Path, task_id: &str) -> PathBuf {
    reports_dir.join(format!("{task_id}.json"))
}

pub fn save_report(reports_dir: &Path, report: &VerificationReport) -> anyhow::Result<()> {
    fs::create_dir_all(reports_dir)?;
    let path = report_path(reports_dir, &report.task_id);
    fs::write(path, serde_json::to_vec_pretty(report)?)?;
    Ok(())
}

pub fn load_report(reports_dir: &Path, task_id: &str) -> Option<VerificationReport> {
    let raw = fs::read_to_string(report_path(reports_dir, task_id)).ok()?;
    serde_json::from_str(&raw).ok()
}

pub fn delete_report(reports_dir: &Path, task_id: &str) -> anyhow::Result<()> {
    let path = report_path(reports_dir, task_id);
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CategoryResult, InstanceResult};

    fn sample_report() -> VerificationReport {
        VerificationReport {
            task_id: "T1".to_string(),
            tree_digest: tree_digest("diff body", " M src/lib.rs"),
            at: Utc::now(),
            result: AggregateResult {
                accepted: true,
                categories: vec![CategoryResult {
                    name: "tests".to_string(),
                    passed: true,
                    instances: vec![InstanceResult {
                        category: "tests".to_string(),
                        instance: 0,
                        passed: true,
                        output: "ok".to_string(),
                    }],
                }],
            },
        }
    }

    #[test]
    fn digest_changes_with_tree_state() {
        let a = tree_digest("diff one", "status");
        let b = tree_digest("diff two", "status");
        let c = tree_digest("diff one", "status");
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn save_load_delete_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let reports = temp.path().join("reports");
        let report = sample_report();
        save_report(&reports, &report).expect("save");

        let loaded = load_report(&reports, "T1").expect("load");
        assert_eq!(loaded.tree_digest, report.tree_digest);
        assert!(loaded.result.accepted);

        delete_report(&reports, "T1").expect("delete");
        assert!(load_report(&reports, "T1").is_none());
    }

    #[test]
    fn missing_report_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load_report(temp.path(), "nope").is_none());
    }
}
