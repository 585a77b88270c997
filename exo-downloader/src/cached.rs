//! In-memory `(model_id, shard) -> Path` cache in front of an inner
//! downloader. A cache hit never touches the inner layer.

use {
  crate::{progress::ProgressCallback, traits::ShardDownloader, Error},
  async_trait::async_trait,
  exo_primitives::{ModelId, ShardMetadata},
  parking_lot::Mutex,
  std::{collections::HashMap, path::PathBuf},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ShardKey {
  model_id: ModelId,
  device_rank: u32,
  world_size: u32,
  start_layer: u32,
  end_layer: u32,
}

impl From<&ShardMetadata> for ShardKey {
  fn from(shard: &ShardMetadata) -> Self {
    Self {
      model_id: shard.model_meta.model_id.clone(),
      device_rank: shard.device_rank,
      world_size: shard.world_size,
      start_layer: shard.start_layer,
      end_layer: shard.end_layer,
    }
  }
}

pub struct CachedShardDownloader<D> {
  inner: D,
  cache: Mutex<HashMap<ShardKey, PathBuf>>,
}

impl<D: ShardDownloader> CachedShardDownloader<D> {
  pub fn new(inner: D) -> Self {
    Self {
      inner,
      cache: Mutex::new(HashMap::new()),
    }
  }

  pub fn inner(&self) -> &D {
    &self.inner
  }
}

#[async_trait]
impl<D: ShardDownloader> ShardDownloader for CachedShardDownloader<D> {
  async fn ensure_shard(&self, shard: &ShardMetadata, config_only: bool) -> Result<PathBuf, Error> {
    let key = ShardKey::from(shard);
    if let Some(path) = self.cache.lock().get(&key).cloned() {
      return Ok(path);
    }
    let path = self.inner.ensure_shard(shard, config_only).await?;
    self.cache.lock().insert(key, path.clone());
    Ok(path)
  }

  fn on_progress(&self, callback: ProgressCallback) {
    self.inner.on_progress(callback);
  }
}
