//! Append-only transcript for the task in progress. Compaction replaces
//! the file content with a condensed summary; everything else appends.

use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Section heading appended after every completed coder round. Its
/// presence is the externally observable fact that the coder has run at
/// least once for this task.
pub const CODER_REPLY_HEADING: &str = "Coder reply";

#[derive(Debug, Clone)]
pub struct TranscriptLog {
    path: PathBuf,
}

impl TranscriptLog {
    pub fn new(logs_dir: &Path, task_id: &str) -> Self {
        Self {
            path: logs_dir.join(format!("{task_id}.md")),
        }
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Transcript length in characters; `None` when no transcript exists.
    pub fn char_len(&self) -> Result<Option<u64>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(Some(content.chars().count() as u64))
    }

    pub fn read(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.path)?)
    }

    /// Whether a coder round has completed for this task.
    pub fn has_coder_reply(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        Ok(self
            .read()?
            .contains(&format!("## {CODER_REPLY_HEADING}")))
    }

    pub fn append(&self, heading: &str, text: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "## {heading}\n\n{}\n", text.trim_end())?;
        Ok(())
    }

    /// Substitute the condensed summary for the full history.
    pub fn replace_with_summary(&self, summary: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(
            &self.path,
            format!("## Compacted context\n\n{}\n", summary.trim_end()),
        )?;
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_grows_and_replace_shrinks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = TranscriptLog::new(temp.path(), "T1");
        assert!(!log.exists());
        assert_eq!(log.char_len().expect("len"), None);

        log.append("Coder instructions", "do the thing").expect("append");
        log.append(CODER_REPLY_HEADING, &"x".repeat(500)).expect("append");
        let before = log.char_len().expect("len").expect("exists");
        assert!(before > 500);

        log.replace_with_summary("short summary").expect("replace");
        let after = log.char_len().expect("len").expect("exists");
        assert!(after < before);
        assert!(log.read().expect("read").contains("Compacted context"));

        log.remove().expect("remove");
        assert!(!log.exists());
    }

    #[test]
    fn coder_reply_marker_tracks_completed_rounds() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = TranscriptLog::new(temp.path(), "T1");
        assert!(!log.has_coder_reply().expect("check"));

        log.append("Coder instructions", "do the thing").expect("append");
        assert!(!log.has_coder_reply().expect("check"));

        log.append(CODER_REPLY_HEADING, "done").expect("append");
        assert!(log.has_coder_reply().expect("check"));
    }
}
