//! Outermost decorator: guarantees exactly one physical fetch per shard
//! across concurrent requesters by piggybacking on the in-flight future.

use {
  crate::{progress::ProgressCallback, traits::ShardDownloader, Error},
  async_trait::async_trait,
  exo_primitives::ShardMetadata,
  parking_lot::Mutex,
  std::{collections::HashMap, path::PathBuf, sync::Arc},
  tokio::sync::broadcast,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ShardKey(String);

impl From<&ShardMetadata> for ShardKey {
  fn from(shard: &ShardMetadata) -> Self {
    ShardKey(format!(
      "{}:{}:{}:{}:{}",
      shard.model_meta.model_id, shard.device_rank, shard.world_size, shard.start_layer, shard.end_layer
    ))
  }
}

type Outcome = Result<PathBuf, String>;

pub struct SingletonShardDownloader<D> {
  inner: Arc<D>,
  active: Arc<Mutex<HashMap<ShardKey, broadcast::Sender<Outcome>>>>,
}

impl<D: ShardDownloader + 'static> SingletonShardDownloader<D> {
  pub fn new(inner: D) -> Self {
    Self {
      inner: Arc::new(inner),
      active: Arc::new(Mutex::new(HashMap::new())),
    }
  }
}

#[async_trait]
impl<D: ShardDownloader + 'static> ShardDownloader for SingletonShardDownloader<D> {
  async fn ensure_shard(&self, shard: &ShardMetadata, config_only: bool) -> Result<PathBuf, Error> {
    let key = ShardKey::from(shard);

    let mut receiver = {
      let mut active = self.active.lock();
      if let Some(tx) = active.get(&key) {
        tx.subscribe()
      } else {
        let (tx, rx) = broadcast::channel(1);
        active.insert(key.clone(), tx.clone());
        drop(active);

        let inner = self.inner.clone();
        let shard = shard.clone();
        let active_table = self.active.clone();
        let key_for_cleanup = key.clone();
        tokio::spawn(async move {
          let outcome = inner
            .ensure_shard(&shard, config_only)
            .await
            .map_err(|err| err.to_string());
          let _ = tx.send(outcome);
          active_table.lock().remove(&key_for_cleanup);
        });
        rx
      }
    };

    receiver
      .recv()
      .await
      .map_err(|_| Error::DownloadFailed {
        file: key.0.clone(),
        cause: "in-flight download task was dropped".to_string(),
      })?
      .map_err(|cause| Error::DownloadFailed {
        file: key.0,
        cause,
      })
  }

  fn on_progress(&self, callback: ProgressCallback) {
    self.inner.on_progress(callback);
  }
}
