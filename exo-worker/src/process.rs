//! Abstracts the out-of-process runner child (spec.md §1: "the inference
//! runner itself ... [is] deliberately out of scope"). `RunnerProcess`
//! is the interface the supervisor drives; a real deployment launches
//! an external binary speaking [`crate::wire::RunnerFrame`] over TCP.

use {
  crate::channel::{ChannelError, RunnerChannel},
  async_trait::async_trait,
  exo_primitives::{Host, ShardMetadata},
  std::path::PathBuf,
  tokio::{net::TcpStream, process::{Child, Command}},
};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
  #[error("failed to spawn runner process: {0}")]
  Spawn(#[from] std::io::Error),

  #[error("runner never announced a listening port")]
  NoAnnouncedPort,

  #[error("channel error: {0}")]
  Channel(#[from] ChannelError),
}

/// A spawned child and the framed channel connected to it. Keeping
/// `handle` alive for the channel's lifetime is the caller's
/// responsibility; dropping it may terminate the child (see
/// `kill_on_drop` on [`ChildProcessRunner`]).
pub struct SpawnedRunner {
  pub handle: Option<Child>,
  pub channel: RunnerChannel<TcpStream>,
}

/// Spawns a connected runner child for one shard.
#[async_trait]
pub trait RunnerProcess: Send + Sync {
  async fn spawn(
    &self,
    shard_dir: &PathBuf,
    shard: &ShardMetadata,
    hosts: &[Host],
    device_rank: u32,
  ) -> Result<SpawnedRunner, ProcessError>;
}

/// Launches the runner binary named by `EXO_RUNNER_PATH` (default
/// `exo-runner` on `$PATH`), which is expected to print its listening
/// TCP port as a single line on stdout before serving the wire protocol.
pub struct ChildProcessRunner {
  runner_path: String,
}

impl ChildProcessRunner {
  pub fn new() -> Self {
    Self {
      runner_path: std::env::var("EXO_RUNNER_PATH").unwrap_or_else(|_| "exo-runner".to_string()),
    }
  }
}

impl Default for ChildProcessRunner {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl RunnerProcess for ChildProcessRunner {
  async fn spawn(
    &self,
    shard_dir: &PathBuf,
    shard: &ShardMetadata,
    hosts: &[Host],
    device_rank: u32,
  ) -> Result<SpawnedRunner, ProcessError> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let hosts_json = serde_json::to_string(hosts).unwrap_or_default();
    let shard_json = serde_json::to_string(shard).unwrap_or_default();

    let mut child = Command::new(&self.runner_path)
      .arg("--shard-dir")
      .arg(shard_dir)
      .arg("--shard")
      .arg(shard_json)
      .arg("--hosts")
      .arg(hosts_json)
      .arg("--device-rank")
      .arg(device_rank.to_string())
      .stdout(std::process::Stdio::piped())
      .kill_on_drop(true)
      .spawn()?;

    let stdout = child.stdout.take().ok_or(ProcessError::NoAnnouncedPort)?;
    let mut lines = BufReader::new(stdout).lines();
    let port_line = lines
      .next_line()
      .await?
      .ok_or(ProcessError::NoAnnouncedPort)?;
    let port: u16 = port_line
      .trim()
      .parse()
      .map_err(|_| ProcessError::NoAnnouncedPort)?;

    let stream = TcpStream::connect(("127.0.0.1", port)).await?;
    Ok(SpawnedRunner {
      handle: Some(child),
      channel: RunnerChannel::new(stream),
    })
  }
}
