//! Message de-duplication by `(origin, seq)`, windowed on a lifespan.
//!
//! Adapted from the HyParView gossip history: a time-bucketed map allows
//! pruning expired entries without scanning the whole set.

use {
  exo_primitives::NodeId,
  std::collections::{btree_map::Entry, BTreeMap, HashMap, HashSet},
  std::time::{Duration, Instant},
};

type Key = (String, NodeId, u64);

pub struct History {
  lifespan: Duration,
  by_time: BTreeMap<Instant, HashSet<Key>>,
  by_key: HashMap<Key, Instant>,
}

impl History {
  pub fn new(lifespan: Duration) -> Self {
    Self {
      lifespan,
      by_time: BTreeMap::new(),
      by_key: HashMap::new(),
    }
  }

  /// Returns `true` if `(topic, origin, seq)` was already seen within the
  /// lifespan window (a duplicate to be dropped), `false` if it is new.
  pub fn insert(&mut self, topic: &str, origin: NodeId, seq: u64) -> bool {
    let now = Instant::now();
    let key = (topic.to_string(), origin, seq);

    if let Some(timestamp) = self.by_key.get(&key) {
      if now.duration_since(*timestamp) > self.lifespan {
        if let Some(bucket) = self.by_time.get_mut(timestamp) {
          bucket.remove(&key);
          if bucket.is_empty() {
            self.by_time.remove(timestamp);
          }
        }
        self.insert_at(now, key);
        return false;
      }
      return true;
    }

    self.insert_at(now, key);
    false
  }

  fn insert_at(&mut self, now: Instant, key: Key) {
    match self.by_time.entry(now) {
      Entry::Vacant(v) => {
        v.insert([key].into_iter().collect());
      }
      Entry::Occupied(mut o) => {
        o.get_mut().insert(key);
      }
    }
    self.by_key.insert(key, now);
  }

  pub fn prune(&mut self) {
    let cutoff = Instant::now() - self.lifespan;
    let expired: Vec<Instant> = self.by_time.range(..cutoff).map(|(t, _)| *t).collect();
    for timestamp in expired {
      if let Some(keys) = self.by_time.remove(&timestamp) {
        for key in keys {
          self.by_key.remove(&key);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn node() -> NodeId {
    use {ed25519_dalek::SigningKey, rand::rngs::OsRng};
    NodeId::from_public_key(SigningKey::generate(&mut OsRng).verifying_key())
  }

  #[test]
  fn duplicate_within_window_is_suppressed() {
    let mut history = History::new(Duration::from_secs(30));
    let origin = node();
    assert!(!history.insert("t", origin, 1));
    assert!(history.insert("t", origin, 1));
    assert!(!history.insert("t", origin, 2));
  }
}
