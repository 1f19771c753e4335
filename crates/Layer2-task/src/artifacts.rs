//! Run log directories and per-command artifacts
//!
//! Each finished command on a task with an artifact directory leaves:
//! - `<seq>.cmd`    command text
//! - `<seq>.out`    captured output
//! - `<seq>.status` exit code
//! - `<seq>.json`   snapshot (status, timestamps, channel error)

use crate::command::CommandHandle;
use ncluster_foundation::Result;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Pick `<root>/<name>`, or the first free `<root>/<name>.NN`
pub fn dedupe_logdir(root: &Path, name: &str) -> PathBuf {
    let candidate = root.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let mut counter = 1u32;
    loop {
        let candidate = root.join(format!("{}.{:02}", name, counter));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Write the artifacts of a terminal command
pub async fn write_record(dir: &Path, handle: &CommandHandle) -> Result<()> {
    fs::create_dir_all(dir).await?;

    let seq = handle.seq();
    fs::write(dir.join(format!("{}.cmd", seq)), handle.command()).await?;
    fs::write(dir.join(format!("{}.out", seq)), handle.output()).await?;

    let status = match handle.exit_code() {
        Some(code) => format!("{}\n", code),
        None => String::new(),
    };
    fs::write(dir.join(format!("{}.status", seq)), status).await?;

    let snapshot = serde_json::to_string_pretty(&handle.snapshot())?;
    fs::write(dir.join(format!("{}.json", seq)), snapshot).await?;
    Ok(())
}
