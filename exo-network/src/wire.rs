//! Envelope-framed wire message: `{topic, origin, seq, payload}`, signed
//! by the sender's Ed25519 key (spec.md §6).

use {
  ed25519_dalek::{Signature, VerifyingKey},
  exo_primitives::NodeId,
  serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
  pub topic: String,
  pub origin: NodeId,
  pub seq: u64,
  pub payload: Vec<u8>,
  #[serde(with = "serde_signature")]
  pub signature: Signature,
}

impl Message {
  pub fn signed_bytes(&self) -> Vec<u8> {
    // Signature covers topic + origin + seq + payload, deterministically.
    let mut buf = Vec::with_capacity(self.payload.len() + self.topic.len() + 40);
    buf.extend_from_slice(self.topic.as_bytes());
    buf.extend_from_slice(&self.origin.as_bytes());
    buf.extend_from_slice(&self.seq.to_be_bytes());
    buf.extend_from_slice(&self.payload);
    buf
  }

  /// Verifies the embedded signature against the claimed origin's public
  /// key. Messages failing this check are a `BadMessage` (spec.md §7).
  pub fn verify(&self, key: &VerifyingKey) -> bool {
    let bytes = self.signed_bytes();
    crate::identity::Identity::verify(key, &bytes, &self.signature)
  }
}

mod serde_signature {
  use {
    ed25519_dalek::Signature,
    serde::{de::Error, Deserialize, Deserializer, Serializer},
  };

  pub fn serialize<S: Serializer>(
    sig: &Signature,
    serializer: S,
  ) -> Result<S::Ok, S::Error> {
    serializer.serialize_bytes(&sig.to_bytes())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<Signature, D::Error> {
    let bytes = Vec::<u8>::deserialize(deserializer)?;
    let bytes: [u8; 64] = bytes.try_into().map_err(|_| D::Error::custom("bad signature length"))?;
    Ok(Signature::from_bytes(&bytes))
  }
}
