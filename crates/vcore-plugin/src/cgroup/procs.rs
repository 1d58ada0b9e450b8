use std::path::Path;
use std::time::Duration;

use tokio::fs;
use tokio::time;
use tracing::debug;
use tracing::warn;

/// Name of the process list file inside a cgroup directory.
pub const PROCS_FILE: &str = "cgroup.procs";

/// Reads the process IDs listed in a cgroup process file.
#[derive(Debug, Clone, Copy)]
pub struct ProcessEnumerator {
    read_timeout: Duration,
}

impl ProcessEnumerator {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }

    /// Returns the PIDs in `procs_file`, in file order.
    ///
    /// A missing, unreadable or slow file yields an empty list. Callers that
    /// need to tell "no processes" from "no cgroup" must check existence
    /// themselves.
    pub async fn list_processes(&self, procs_file: &Path) -> Vec<u32> {
        let content = match time::timeout(self.read_timeout, fs::read_to_string(procs_file)).await
        {
            Ok(Ok(content)) => content,
            Ok(Err(e)) => {
                warn!("can't read {}: {e}", procs_file.display());
                return Vec::new();
            }
            Err(_) => {
                warn!(
                    "reading {} timed out after {:?}",
                    procs_file.display(),
                    self.read_timeout
                );
                return Vec::new();
            }
        };

        let pids = parse_procs(&content);
        debug!(file = %procs_file.display(), ?pids, "read cgroup processes");
        pids
    }
}

/// Parses one PID per line, skipping anything that is not a number.
pub fn parse_procs(content: &str) -> Vec<u32> {
    content
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}
