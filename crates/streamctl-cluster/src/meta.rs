//! Control connection to a cluster's meta node.
//!
//! Backups and snapshot deletion go through the cluster's own control
//! tool (`metactl`), invoked as a subprocess with the meta address in its
//! environment. The traits keep the executors testable without a live
//! cluster.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use regex::Regex;
use tracing::debug;

/// One established control connection.
pub trait MetaClient: Send + Sync {
    /// Trigger a meta backup and return the snapshot id the cluster
    /// assigned to it.
    fn meta_backup(&self, timeout: Duration) -> anyhow::Result<i64>;

    /// Delete a meta snapshot on the cluster side.
    fn delete_snapshot(&self, snapshot_id: i64, timeout: Duration) -> anyhow::Result<()>;
}

/// Opens control connections. `version` is the cluster's reported
/// release, recorded for diagnostics; the tool itself negotiates
/// compatibility with the meta node.
pub trait MetaClientManager: Send + Sync {
    fn connect(&self, version: &str, host: &str, port: u16) -> anyhow::Result<Box<dyn MetaClient>>;
}

pub struct CommandMetaManager {
    tool_path: PathBuf,
}

impl CommandMetaManager {
    pub fn new(tool_path: impl Into<PathBuf>) -> Self {
        Self {
            tool_path: tool_path.into(),
        }
    }
}

impl MetaClientManager for CommandMetaManager {
    fn connect(&self, version: &str, host: &str, port: u16) -> anyhow::Result<Box<dyn MetaClient>> {
        Ok(Box::new(CommandMetaClient {
            tool_path: self.tool_path.clone(),
            endpoint: format!("{host}:{port}"),
            version: version.to_string(),
        }))
    }
}

pub struct CommandMetaClient {
    tool_path: PathBuf,
    endpoint: String,
    version: String,
}

impl CommandMetaClient {
    /// Run the tool to completion, killing it at the deadline. Output is
    /// read only after exit; these commands print a few lines at most.
    fn run(&self, timeout: Duration, args: &[&str]) -> anyhow::Result<String> {
        debug!(
            endpoint = %self.endpoint,
            version = %self.version,
            ?args,
            "running meta control command"
        );
        let mut child = Command::new(&self.tool_path)
            .args(args)
            .env("META_ADDR", &self.endpoint)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.tool_path.display()))?;

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                bail!(
                    "meta control command timed out after {}s: {args:?}",
                    timeout.as_secs()
                );
            }
            std::thread::sleep(Duration::from_millis(50));
        };

        let output = child.wait_with_output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !status.success() {
            bail!(
                "meta control command failed (exit {:?}): {args:?}, stdout: {stdout}, stderr: {stderr}",
                status.code()
            );
        }
        Ok(format!("{stdout}{stderr}"))
    }
}

impl MetaClient for CommandMetaClient {
    fn meta_backup(&self, timeout: Duration) -> anyhow::Result<i64> {
        let out = self.run(timeout, &["meta", "backup-meta"])?;
        extract_backup_job_id(&out)
    }

    fn delete_snapshot(&self, snapshot_id: i64, timeout: Duration) -> anyhow::Result<()> {
        self.run(
            timeout,
            &[
                "meta",
                "delete-meta-snapshots",
                "--snapshot-ids",
                &snapshot_id.to_string(),
            ],
        )?;
        Ok(())
    }
}

// sample: backup job succeeded: job 1
fn extract_backup_job_id(output: &str) -> anyhow::Result<i64> {
    let re = Regex::new(r"backup job succeeded: job (\d+)").unwrap();
    let captures = re
        .captures(output)
        .with_context(|| format!("no backup job id in output: {output}"))?;
    captures[1]
        .parse()
        .with_context(|| format!("bad backup job id in output: {output}"))
}
