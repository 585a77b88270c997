//! Node identity and the family of opaque ids minted by their creators.
//!
//! `NodeId` is the base58 encoding of a peer's Ed25519 public key, following
//! the same `ToBase58String` convention the rest of this codebase's ancestry
//! uses for content-addressed identifiers.

use {
  ed25519_dalek::VerifyingKey,
  serde::{Deserialize, Serialize},
  std::fmt,
  uuid::Uuid,
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(#[serde(with = "serde_verifying_key")] VerifyingKey);

impl NodeId {
  pub fn from_public_key(key: VerifyingKey) -> Self {
    Self(key)
  }

  pub fn as_bytes(&self) -> [u8; 32] {
    self.0.to_bytes()
  }

  pub fn verifying_key(&self) -> VerifyingKey {
    self.0
  }

  pub fn to_base58(&self) -> String {
    bs58::encode(self.as_bytes()).into_string()
  }

  pub fn from_base58(s: &str) -> Result<Self, NodeIdError> {
    let bytes = bs58::decode(s).into_vec().map_err(|_| NodeIdError::Malformed)?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|_| NodeIdError::Malformed)?;
    let key = VerifyingKey::from_bytes(&bytes).map_err(|_| NodeIdError::Malformed)?;
    Ok(Self(key))
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_base58())
  }
}

impl fmt::Debug for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "NodeId({})", self.to_base58())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NodeIdError {
  #[error("malformed node id")]
  Malformed,
}

mod serde_verifying_key {
  use {
    ed25519_dalek::VerifyingKey,
    serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer},
  };

  pub fn serialize<S: Serializer>(
    key: &VerifyingKey,
    serializer: S,
  ) -> Result<S::Ok, S::Error> {
    key.to_bytes().serialize(serializer)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<VerifyingKey, D::Error> {
    let bytes = <[u8; 32]>::deserialize(deserializer)?;
    VerifyingKey::from_bytes(&bytes).map_err(D::Error::custom)
  }
}

/// Defines an opaque, UUID-backed identifier minted by its creator.
/// Equality is bitwise; ordering follows UUID byte order so these
/// can be used as stable map keys.
macro_rules! opaque_id {
  ($name:ident) => {
    #[derive(
      Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    )]
    pub struct $name(Uuid);

    impl $name {
      pub fn new() -> Self {
        Self(Uuid::new_v4())
      }
    }

    impl Default for $name {
      fn default() -> Self {
        Self::new()
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
      }
    }

    impl fmt::Debug for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", stringify!($name), self.0)
      }
    }
  };
}

opaque_id!(InstanceId);
opaque_id!(RunnerId);
opaque_id!(TaskId);
opaque_id!(CommandId);
opaque_id!(EventId);
