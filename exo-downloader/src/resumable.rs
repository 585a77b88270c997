//! The innermost layer of the `Singleton(Cached(Resumable))` stack: does
//! the actual file fetching, with per-file retry and resumption.

use {
  crate::{
    progress::{DownloadProgress, DownloadStatus, ProgressCallback},
    registry::ModelRegistry,
    traits::ShardDownloader,
    Error,
  },
  async_trait::async_trait,
  exo_network::Backoff,
  exo_primitives::ShardMetadata,
  futures::stream::{self, StreamExt},
  parking_lot::Mutex,
  std::{
    path::{Path, PathBuf},
    sync::{
      atomic::{AtomicU32, AtomicU64, Ordering},
      Arc,
    },
    time::Duration,
  },
  tokio::io::AsyncWriteExt,
  tracing::{info, warn},
};

const MAX_RETRIES: u32 = 5;
const RETRY_BASE: Duration = Duration::from_millis(200);
const RETRY_CAP: Duration = Duration::from_secs(10);

/// Confirms the byte stream delivered exactly what the registry advertised
/// before the caller commits the partial file with an atomic rename.
/// Registries that omit a size (`remote.size == None`) are trusted as-is.
fn verify_size(remote: &crate::registry::RemoteFile, written: u64) -> Result<(), Error> {
  match remote.size {
    Some(expected) if expected != written => Err(Error::SizeMismatch {
      file: remote.filename.clone(),
      expected,
      actual: written,
    }),
    _ => Ok(()),
  }
}

pub struct ResumableDownloader {
  registry: Arc<dyn ModelRegistry>,
  client: reqwest::Client,
  models_dir: PathBuf,
  max_parallel_downloads: usize,
  callbacks: Mutex<Vec<ProgressCallback>>,
}

impl ResumableDownloader {
  pub fn new(
    registry: Arc<dyn ModelRegistry>,
    client: reqwest::Client,
    models_dir: PathBuf,
    max_parallel_downloads: usize,
  ) -> Self {
    Self {
      registry,
      client,
      models_dir,
      max_parallel_downloads,
      callbacks: Mutex::new(Vec::new()),
    }
  }

  fn emit(&self, shard: &ShardMetadata, progress: &DownloadProgress) {
    for callback in self.callbacks.lock().iter() {
      callback(shard, progress);
    }
  }

  async fn fetch_one(&self, target_dir: &Path, remote: &crate::registry::RemoteFile) -> Result<u64, Error> {
    let final_path = target_dir.join(&remote.filename);
    let mut partial_name = final_path.clone().into_os_string();
    partial_name.push(".partial");
    let partial_path = PathBuf::from(partial_name);

    if let Some(parent) = final_path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    if final_path.exists() {
      return Ok(tokio::fs::metadata(&final_path).await?.len());
    }

    let mut backoff = Backoff::new(RETRY_BASE, RETRY_CAP);
    let mut last_error = None;
    for attempt in 0..MAX_RETRIES {
      match self.fetch_with_resume(&partial_path, remote).await {
        Ok(bytes) => match verify_size(remote, bytes) {
          Ok(()) => {
            tokio::fs::rename(&partial_path, &final_path).await?;
            return Ok(bytes);
          }
          Err(err) => {
            warn!(file = %remote.filename, attempt, "download attempt failed: {err}");
            last_error = Some(err);
            tokio::time::sleep(backoff.next_delay()).await;
          }
        },
        Err(err) => {
          warn!(file = %remote.filename, attempt, "download attempt failed: {err}");
          last_error = Some(err);
          tokio::time::sleep(backoff.next_delay()).await;
        }
      }
    }
    Err(Error::DownloadFailed {
      file: remote.filename.clone(),
      cause: last_error.map(|e| e.to_string()).unwrap_or_default(),
    })
  }

  async fn fetch_with_resume(
    &self,
    partial_path: &Path,
    remote: &crate::registry::RemoteFile,
  ) -> Result<u64, Error> {
    let resume_from = tokio::fs::metadata(partial_path).await.map(|m| m.len()).unwrap_or(0);

    let mut request = self.client.get(&remote.url);
    if resume_from > 0 {
      request = request.header("Range", format!("bytes={resume_from}-"));
    }
    let response = request.send().await?.error_for_status()?;

    let mut file = tokio::fs::OpenOptions::new()
      .create(true)
      .append(resume_from > 0)
      .write(true)
      .truncate(resume_from == 0)
      .open(partial_path)
      .await?;

    let mut stream = response.bytes_stream();
    let mut written = resume_from;
    while let Some(chunk) = stream.next().await {
      let chunk = chunk?;
      file.write_all(&chunk).await?;
      written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
  }
}

#[async_trait]
impl ShardDownloader for ResumableDownloader {
  async fn ensure_shard(&self, shard: &ShardMetadata, config_only: bool) -> Result<PathBuf, Error> {
    let model_id = &shard.model_meta.model_id;
    let target_dir = self.models_dir.join(model_id.slug());
    tokio::fs::create_dir_all(&target_dir).await?;

    let allow_patterns = config_only.then_some(["config.json"]);
    let files = self
      .registry
      .list_files(model_id.as_str(), allow_patterns.as_ref().map(|p| p.as_slice()))
      .await?;

    let total_files = files.len() as u32;
    let completed = Arc::new(AtomicU32::new(0));
    let downloaded = Arc::new(AtomicU64::new(0));

    info!(model_id = %model_id, total_files, "starting shard download");

    let results: Vec<Result<u64, Error>> = stream::iter(files.iter())
      .map(|remote| {
        let completed = completed.clone();
        let downloaded = downloaded.clone();
        async move {
          let bytes = self.fetch_one(&target_dir, remote).await?;
          let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
          let total_bytes = downloaded.fetch_add(bytes, Ordering::SeqCst) + bytes;
          self.emit(
            shard,
            &DownloadProgress {
              completed_files: done,
              total_files,
              downloaded_bytes: total_bytes,
              downloaded_bytes_this_session: total_bytes,
              total_bytes,
              overall_speed: 0,
              overall_eta: Duration::ZERO,
              status: if done == total_files {
                DownloadStatus::Complete
              } else {
                DownloadStatus::InProgress
              },
            },
          );
          Ok(bytes)
        }
      })
      .buffer_unordered(self.max_parallel_downloads.max(1))
      .collect()
      .await;

    for result in results {
      result?;
    }

    Ok(target_dir)
  }

  fn on_progress(&self, callback: ProgressCallback) {
    self.callbacks.lock().push(callback);
  }
}
