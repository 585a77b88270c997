use {
  crate::{progress::ProgressCallback, Error},
  async_trait::async_trait,
  exo_primitives::ShardMetadata,
  std::path::PathBuf,
};

#[async_trait]
pub trait ShardDownloader: Send + Sync {
  /// Ensures `shard`'s files are present on disk, returning the shard's
  /// directory. `config_only` restricts the fetch to `config.json`.
  async fn ensure_shard(&self, shard: &ShardMetadata, config_only: bool) -> Result<PathBuf, Error>;

  fn on_progress(&self, callback: ProgressCallback);
}
