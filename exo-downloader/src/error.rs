use exo_primitives::ModelId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("failed to download {file} after all retries: {cause}")]
  DownloadFailed { file: String, cause: String },

  #[error("model metadata unavailable for {0}")]
  ModelMetadataUnavailable(ModelId),

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("malformed config.json for {model_id}: {reason}")]
  MalformedConfig { model_id: ModelId, reason: String },

  #[error("size mismatch for {file}: expected {expected} bytes, got {actual}")]
  SizeMismatch {
    file: String,
    expected: u64,
    actual: u64,
  },
}
