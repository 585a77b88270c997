//! The periodic gossip message every node multicasts on `ELECTION_MESSAGES`.

use {
  exo_primitives::NodeId,
  serde::{Deserialize, Serialize},
  std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
  },
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ElectionVote {
  pub node_id: NodeId,
  pub seniority: u64,
  pub tie_break: u64,
}

impl ElectionVote {
  pub fn new(node_id: NodeId, seniority: u64) -> Self {
    Self {
      node_id,
      seniority,
      tie_break: tie_break(&node_id),
    }
  }

  /// `(-seniority, tie_break)`, smallest wins: highest seniority first,
  /// `tie_break` as tiebreaker among equally senior peers.
  fn rank(&self) -> (std::cmp::Reverse<u64>, u64) {
    (std::cmp::Reverse(self.seniority), self.tie_break)
  }
}

impl PartialEq for ElectionVote {
  fn eq(&self, other: &Self) -> bool {
    self.node_id == other.node_id && self.seniority == other.seniority
  }
}

impl Eq for ElectionVote {}

impl PartialOrd for ElectionVote {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for ElectionVote {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    self.rank().cmp(&other.rank())
  }
}

fn tie_break(node_id: &NodeId) -> u64 {
  let mut hasher = DefaultHasher::new();
  node_id.hash(&mut hasher);
  hasher.finish()
}
