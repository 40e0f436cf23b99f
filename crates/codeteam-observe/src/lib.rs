use anyhow::Result;
use chrono::Utc;
use codeteam_core::{EventEnvelope, EventKind, runtime_dir};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Append-only event and diagnostics log for one workspace. The log is an
/// audit trail, never an input to phase computation.
pub struct Observer {
    log_path: PathBuf,
    run_id: Uuid,
    seq_no: AtomicU64,
    verbose: bool,
}

impl Observer {
    pub fn new(workspace: &Path) -> Result<Self> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            log_path: dir.join("observe.log"),
            run_id: Uuid::now_v7(),
            seq_no: AtomicU64::new(0),
            verbose: false,
        })
    }

    /// Enable or disable verbose logging to stderr.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn record_event(&self, kind: EventKind) -> Result<()> {
        let envelope = EventEnvelope {
            seq_no: self.seq_no.fetch_add(1, Ordering::SeqCst),
            at: Utc::now(),
            run_id: self.run_id,
            kind,
        };
        self.append_log_line(&format!(
            "{} EVENT {}",
            envelope.at.to_rfc3339(),
            serde_json::to_string(&envelope)?
        ))
    }

    /// Log a message to stderr with `[codeteam]` prefix when verbose mode is on.
    pub fn verbose_log(&self, msg: &str) {
        if self.verbose {
            eprintln!("[codeteam] {msg}");
        }
    }

    /// Log a warning — always written to the log file, and to stderr.
    pub fn warn_log(&self, msg: &str) {
        eprintln!("[codeteam WARN] {msg}");
        let _ = self.append_log_line(&format!("{} WARN {msg}", Utc::now().to_rfc3339()));
    }

    fn append_log_line(&self, line: &str) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}
