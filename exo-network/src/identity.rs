//! Node identity: an Ed25519 keypair persisted to disk on first launch
//! and reused forever, named on the wire by the base58 of its public key.

use {
  ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey},
  exo_primitives::NodeId,
  rand::rngs::OsRng,
  std::path::Path,
  tracing::info,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("io error reading/writing identity key: {0}")]
  Io(#[from] std::io::Error),

  #[error("malformed identity key file")]
  Malformed,
}

/// Holds the local node's signing key and derived [`NodeId`].
pub struct Identity {
  signing_key: SigningKey,
  node_id: NodeId,
}

impl Identity {
  pub fn node_id(&self) -> NodeId {
    self.node_id
  }

  pub fn sign(&self, bytes: &[u8]) -> Signature {
    self.signing_key.sign(bytes)
  }

  pub fn verify(key: &VerifyingKey, bytes: &[u8], sig: &Signature) -> bool {
    key.verify(bytes, sig).is_ok()
  }

  pub fn verifying_key(&self) -> VerifyingKey {
    self.signing_key.verifying_key()
  }

  pub fn generate() -> Self {
    let signing_key = SigningKey::generate(&mut OsRng);
    let node_id = NodeId::from_public_key(signing_key.verifying_key());
    Self {
      signing_key,
      node_id,
    }
  }

  /// Loads the identity key from `path`, generating and persisting a new
  /// one if the file doesn't exist yet. Matches
  /// `<home>/.exo/identity.key` in spec.md §6.
  pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self, Error> {
    let path = path.as_ref();
    if path.exists() {
      let bytes = std::fs::read(path)?;
      let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| Error::Malformed)?;
      let signing_key = SigningKey::from_bytes(&bytes);
      let node_id = NodeId::from_public_key(signing_key.verifying_key());
      info!("loaded identity {node_id} from {}", path.display());
      return Ok(Self {
        signing_key,
        node_id,
      });
    }

    let identity = Self::generate();
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, identity.signing_key.to_bytes())?;
    set_owner_only_permissions(path)?;
    info!(
      "generated new identity {} at {}",
      identity.node_id,
      path.display()
    );
    Ok(identity)
  }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> std::io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  let mut perms = std::fs::metadata(path)?.permissions();
  perms.set_mode(0o600);
  std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> std::io::Result<()> {
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn persisted_identity_is_reused() {
    let dir = tempfile_dir();
    let path = dir.join("identity.key");

    let first = Identity::load_or_generate(&path).unwrap();
    let second = Identity::load_or_generate(&path).unwrap();
    assert_eq!(first.node_id(), second.node_id());

    std::fs::remove_dir_all(dir).ok();
  }

  fn tempfile_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("exo-identity-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }
}
