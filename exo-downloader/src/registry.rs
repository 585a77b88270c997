//! Abstracts the remote model registry (Hugging Face Hub) behind a small
//! trait so the download pipeline can be tested without the network.

use {
  async_trait::async_trait,
  serde::Deserialize,
  std::fmt,
};

#[derive(Debug, Clone)]
pub struct RemoteFile {
  pub filename: String,
  pub url: String,
  pub size: Option<u64>,
}

#[async_trait]
pub trait ModelRegistry: Send + Sync {
  /// Lists the files making up `model_id`, optionally narrowed by
  /// `allow_patterns` (e.g. `["config.json"]`).
  async fn list_files(
    &self,
    model_id: &str,
    allow_patterns: Option<&[&str]>,
  ) -> Result<Vec<RemoteFile>, crate::Error>;
}

/// Talks to the public Hugging Face Hub resolve/siblings API.
pub struct HuggingFaceRegistry {
  client: reqwest::Client,
  revision: String,
}

impl HuggingFaceRegistry {
  pub fn new(client: reqwest::Client) -> Self {
    Self {
      client,
      revision: "main".to_string(),
    }
  }
}

#[derive(Deserialize)]
struct RepoInfo {
  siblings: Vec<Sibling>,
}

#[derive(Deserialize)]
struct Sibling {
  rfilename: String,
  size: Option<u64>,
}

#[async_trait]
impl ModelRegistry for HuggingFaceRegistry {
  async fn list_files(
    &self,
    model_id: &str,
    allow_patterns: Option<&[&str]>,
  ) -> Result<Vec<RemoteFile>, crate::Error> {
    // `blobs=true` asks the Hub to include each sibling's byte size so the
    // downloader can verify completion before the atomic rename.
    let api_url = format!("https://huggingface.co/api/models/{model_id}?blobs=true");
    let info: RepoInfo = self.client.get(api_url).send().await?.json().await?;

    let files = info
      .siblings
      .into_iter()
      .filter(|s| matches(&s.rfilename, allow_patterns))
      .map(|sibling| {
        let url = format!(
          "https://huggingface.co/{model_id}/resolve/{}/{}",
          self.revision, sibling.rfilename
        );
        RemoteFile {
          filename: sibling.rfilename,
          url,
          size: sibling.size,
        }
      })
      .collect();
    Ok(files)
  }
}

fn matches(filename: &str, allow_patterns: Option<&[&str]>) -> bool {
  match allow_patterns {
    None => true,
    Some(patterns) => patterns.iter().any(|p| *p == filename),
  }
}

impl fmt::Debug for HuggingFaceRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HuggingFaceRegistry")
      .field("revision", &self.revision)
      .finish()
  }
}
