//! Workspace file map handed to the planner so it can ground task
//! breakdowns in the actual repository layout.

use ignore::WalkBuilder;
use std::path::Path;

const MAX_ENTRIES: usize = 400;

/// Render a gitignore-respecting file listing, one path per line, relative
/// to the workspace root. Truncated past `MAX_ENTRIES` so a large monorepo
/// cannot blow up the planner prompt.
#[must_use]
pub fn render(workspace: &Path) -> String {
    let mut builder = WalkBuilder::new(workspace);
    builder.require_git(false);
    builder.hidden(true);

    let mut paths: Vec<String> = builder
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .filter_map(|entry| {
            let rel = entry.path().strip_prefix(workspace).ok()?;
            if rel.components().any(is_internal_component) {
                return None;
            }
            Some(rel.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    paths.sort();

    let total = paths.len();
    let mut out = String::new();
    for path in paths.into_iter().take(MAX_ENTRIES) {
        out.push_str(&path);
        out.push('\n');
    }
    if total > MAX_ENTRIES {
        out.push_str(&format!("... and {} more files\n", total - MAX_ENTRIES));
    }
    out
}

fn is_internal_component(c: std::path::Component<'_>) -> bool {
    c.as_os_str() == ".git" || c.as_os_str() == ".codeteam" || c.as_os_str() == "target"
}
