//! Advisory download progress (spec.md §4.5). Correctness never depends
//! on these values; they exist to drive a UI or log line.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
  InProgress,
  Complete,
  Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct DownloadProgress {
  pub completed_files: u32,
  pub total_files: u32,
  pub downloaded_bytes: u64,
  pub downloaded_bytes_this_session: u64,
  pub total_bytes: u64,
  pub overall_speed: u64,
  pub overall_eta: Duration,
  pub status: DownloadStatus,
}

impl DownloadProgress {
  pub fn complete(total_files: u32, total_bytes: u64) -> Self {
    Self {
      completed_files: total_files,
      total_files,
      downloaded_bytes: total_bytes,
      downloaded_bytes_this_session: 0,
      total_bytes,
      overall_speed: 0,
      overall_eta: Duration::ZERO,
      status: DownloadStatus::Complete,
    }
  }
}

/// Invoked with the shard the progress belongs to.
pub type ProgressCallback =
  std::sync::Arc<dyn Fn(&exo_primitives::ShardMetadata, &DownloadProgress) + Send + Sync>;
