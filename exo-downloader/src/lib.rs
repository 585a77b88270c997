mod cached;
mod error;
mod model_meta;
mod progress;
mod registry;
mod resumable;
mod singleton;
mod traits;

pub use {
  cached::CachedShardDownloader,
  error::Error,
  model_meta::{CachedModelMetaResolver, ModelMetaResolver, RegistryModelMetaResolver},
  progress::{DownloadProgress, DownloadStatus, ProgressCallback},
  registry::{HuggingFaceRegistry, ModelRegistry, RemoteFile},
  resumable::ResumableDownloader,
  singleton::SingletonShardDownloader,
  traits::ShardDownloader,
};

use std::{path::PathBuf, sync::Arc};

const DEFAULT_MAX_PARALLEL_DOWNLOADS: usize = 8;

/// Builds the standard `Singleton(Cached(Resumable))` stack backed by
/// the public Hugging Face Hub, rooted at `models_dir`.
pub fn exo_shard_downloader(
  models_dir: PathBuf,
) -> SingletonShardDownloader<CachedShardDownloader<ResumableDownloader>> {
  let client = reqwest::Client::new();
  let registry: Arc<dyn ModelRegistry> = Arc::new(HuggingFaceRegistry::new(client.clone()));
  let resumable = ResumableDownloader::new(
    registry,
    client,
    models_dir,
    DEFAULT_MAX_PARALLEL_DOWNLOADS,
  );
  SingletonShardDownloader::new(CachedShardDownloader::new(resumable))
}

/// `<home>/.exo/models`, matching `ensure_models_dir()`'s layout.
pub fn default_models_dir() -> PathBuf {
  let home = std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."));
  home.join(".exo").join("models")
}

#[cfg(test)]
mod tests {
  use {
    super::*,
    async_trait::async_trait,
    exo_primitives::{Memory, ModelId, ModelMetadata, ShardMetadata},
    std::sync::atomic::{AtomicU32, Ordering},
  };

  struct CountingDownloader {
    calls: AtomicU32,
  }

  #[async_trait]
  impl ShardDownloader for CountingDownloader {
    async fn ensure_shard(&self, shard: &ShardMetadata, _config_only: bool) -> Result<PathBuf, Error> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(std::time::Duration::from_millis(20)).await;
      Ok(PathBuf::from(shard.model_meta.model_id.slug()))
    }

    fn on_progress(&self, _callback: ProgressCallback) {}
  }

  fn shard() -> ShardMetadata {
    ShardMetadata::new(
      ModelMetadata {
        model_id: ModelId::new("meta-llama/Llama-3-8B"),
        pretty_name: "Llama 3 8B".to_string(),
        storage_size: Memory::from_gb(16),
        n_layers: 32,
      },
      0,
      1,
      0,
      32,
      32,
    )
    .unwrap()
  }

  #[tokio::test]
  async fn concurrent_callers_trigger_one_physical_fetch() {
    let inner = Arc::new(CountingDownloader {
      calls: AtomicU32::new(0),
    });
    let singleton = Arc::new(SingletonShardDownloader::new(CountingDownloaderHandle(inner.clone())));

    let shard = shard();
    let (a, b) = tokio::join!(
      singleton.ensure_shard(&shard, false),
      singleton.ensure_shard(&shard, false)
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
  }

  struct CountingDownloaderHandle(Arc<CountingDownloader>);

  #[async_trait]
  impl ShardDownloader for CountingDownloaderHandle {
    async fn ensure_shard(&self, shard: &ShardMetadata, config_only: bool) -> Result<PathBuf, Error> {
      self.0.ensure_shard(shard, config_only).await
    }

    fn on_progress(&self, callback: ProgressCallback) {
      self.0.on_progress(callback);
    }
  }

  #[tokio::test]
  async fn cached_layer_skips_inner_on_second_call() {
    let inner = CountingDownloader {
      calls: AtomicU32::new(0),
    };
    let cached = CachedShardDownloader::new(inner);

    let shard = shard();
    cached.ensure_shard(&shard, false).await.unwrap();
    cached.ensure_shard(&shard, false).await.unwrap();
    assert_eq!(cached.inner_calls(), 1);
  }

  impl CachedShardDownloader<CountingDownloader> {
    fn inner_calls(&self) -> u32 {
      self.inner().calls.load(Ordering::SeqCst)
    }
  }
}
