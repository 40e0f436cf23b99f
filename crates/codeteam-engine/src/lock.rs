//! Single-orchestrator exclusivity. Two engines reconciling the same plan
//! concurrently is undefined behavior, so a lock file guards the runtime
//! directory for the lifetime of an invocation.

use anyhow::{Result, anyhow};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(runtime_dir: &Path) -> Result<Self> {
        fs::create_dir_all(runtime_dir)?;
        let path = runtime_dir.join("lock");
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut f) => {
                let _ = writeln!(f, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(anyhow!(
                "another orchestrator holds the lock at {} — remove it if that run is dead",
                path.display()
            )),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
