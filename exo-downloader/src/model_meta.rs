//! Resolves `ModelMetadata` (layer count, storage size) from a registry,
//! cached process-globally by `model_id` (spec.md §9 "Global caches").

use {
  crate::{registry::ModelRegistry, Error},
  async_trait::async_trait,
  exo_primitives::{Memory, ModelId, ModelMetadata},
  once_cell::sync::Lazy,
  parking_lot::Mutex,
  serde::Deserialize,
  std::{collections::HashMap, sync::Arc},
};

/// Mirrors a model's `config.json`, tolerating unknown fields. Layer
/// count is read from the first of these field names that is present,
/// matching the variety of names different model architectures use.
#[derive(Debug, Deserialize, Default)]
struct ConfigData {
  num_hidden_layers: Option<u32>,
  num_layers: Option<u32>,
  n_layer: Option<u32>,
  n_layers: Option<u32>,
  num_decoder_layers: Option<u32>,
  decoder_layers: Option<u32>,
}

impl ConfigData {
  fn layer_count(&self) -> Option<u32> {
    self
      .num_hidden_layers
      .or(self.num_layers)
      .or(self.n_layer)
      .or(self.n_layers)
      .or(self.num_decoder_layers)
      .or(self.decoder_layers)
  }
}

#[derive(Debug, Deserialize)]
struct SafetensorsIndex {
  metadata: Option<SafetensorsIndexMetadata>,
}

#[derive(Debug, Deserialize)]
struct SafetensorsIndexMetadata {
  total_size: u64,
}

#[async_trait]
pub trait ModelMetaResolver: Send + Sync {
  async fn resolve(&self, model_id: &ModelId) -> Result<ModelMetadata, Error>;
}

/// Downloads `config.json` and `model.safetensors.index.json` through a
/// [`ModelRegistry`] to build a model's metadata.
pub struct RegistryModelMetaResolver {
  registry: Arc<dyn ModelRegistry>,
  client: reqwest::Client,
}

impl RegistryModelMetaResolver {
  pub fn new(registry: Arc<dyn ModelRegistry>, client: reqwest::Client) -> Self {
    Self { registry, client }
  }

  async fn fetch_json<T: serde::de::DeserializeOwned>(
    &self,
    model_id: &ModelId,
    filename: &str,
  ) -> Result<T, Error> {
    let files = self
      .registry
      .list_files(model_id.as_str(), Some(&[filename]))
      .await?;
    let file = files
      .into_iter()
      .find(|f| f.filename == filename)
      .ok_or_else(|| Error::ModelMetadataUnavailable(model_id.clone()))?;
    let bytes = self.client.get(&file.url).send().await?.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| Error::MalformedConfig {
      model_id: model_id.clone(),
      reason: err.to_string(),
    })
  }
}

#[async_trait]
impl ModelMetaResolver for RegistryModelMetaResolver {
  async fn resolve(&self, model_id: &ModelId) -> Result<ModelMetadata, Error> {
    let config: ConfigData = self.fetch_json(model_id, "config.json").await?;
    let n_layers = config.layer_count().ok_or_else(|| Error::MalformedConfig {
      model_id: model_id.clone(),
      reason: "no recognised layer-count field in config.json".to_string(),
    })?;

    let storage_size = match self
      .fetch_json::<SafetensorsIndex>(model_id, "model.safetensors.index.json")
      .await
    {
      Ok(index) => match index.metadata {
        Some(meta) => Memory::from_bytes(meta.total_size),
        None => return Err(Error::ModelMetadataUnavailable(model_id.clone())),
      },
      Err(_) => return Err(Error::ModelMetadataUnavailable(model_id.clone())),
    };

    Ok(ModelMetadata {
      model_id: model_id.clone(),
      pretty_name: model_id.as_str().to_string(),
      storage_size,
      n_layers,
    })
  }
}

static MODEL_META_CACHE: Lazy<Mutex<HashMap<ModelId, ModelMetadata>>> =
  Lazy::new(|| Mutex::new(HashMap::new()));

/// Never-evicted process-wide cache in front of any [`ModelMetaResolver`].
pub struct CachedModelMetaResolver<R> {
  inner: R,
}

impl<R: ModelMetaResolver> CachedModelMetaResolver<R> {
  pub fn new(inner: R) -> Self {
    Self { inner }
  }
}

#[async_trait]
impl<R: ModelMetaResolver> ModelMetaResolver for CachedModelMetaResolver<R> {
  async fn resolve(&self, model_id: &ModelId) -> Result<ModelMetadata, Error> {
    if let Some(meta) = MODEL_META_CACHE.lock().get(model_id) {
      return Ok(meta.clone());
    }
    let meta = self.inner.resolve(model_id).await?;
    MODEL_META_CACHE.lock().insert(model_id.clone(), meta.clone());
    Ok(meta)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn layer_count_prefers_first_present_field() {
    let config = ConfigData {
      num_hidden_layers: None,
      num_layers: Some(24),
      n_layer: Some(99),
      ..Default::default()
    };
    assert_eq!(config.layer_count(), Some(24));
  }

  #[test]
  fn layer_count_is_none_when_no_field_present() {
    assert_eq!(ConfigData::default().layer_count(), None);
  }
}
