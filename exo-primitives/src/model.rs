use {
  crate::memory::Memory,
  serde::{Deserialize, Serialize},
};

/// Registry-qualified model name, e.g. `"meta-llama/Llama-3-8B"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(String);

impl ModelId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Filesystem-safe slug used for the on-disk model directory, e.g.
  /// `<home>/.exo/models/<slug>/`.
  pub fn slug(&self) -> String {
    self.0.replace('/', "--")
  }
}

impl std::fmt::Display for ModelId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Resolved registry metadata for a model, cached process-globally by
/// `model_id` (never evicted — see Downloader's model registry cache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
  pub model_id: ModelId,
  pub pretty_name: String,
  pub storage_size: Memory,
  pub n_layers: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionTaskParams {
  pub messages: Vec<ChatMessage>,
  pub max_tokens: Option<u32>,
  pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
  pub role: String,
  pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
  Stop,
  Length,
  Error,
  Cancelled,
}

impl std::fmt::Display for FinishReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      FinishReason::Stop => "stop",
      FinishReason::Length => "length",
      FinishReason::Error => "error",
      FinishReason::Cancelled => "cancelled",
    };
    write!(f, "{s}")
  }
}
