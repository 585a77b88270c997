//! Launch-time tuning knobs, in the same flat-record style as the
//! router's `ShuffleConfig`.

use std::time::Duration;

/// Seniority assigned to a node launched with `force_master=true`.
/// Dominates any peer not similarly forced.
pub const FORCED_MASTER_SENIORITY: u64 = 1_000_000;

/// Consecutive missed gossip intervals after which a peer is considered
/// absent and dropped from the candidate set.
pub const ABSENT_AFTER_MISSED_INTERVALS: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct ElectionConfig {
  pub gossip_interval: Duration,
  pub seniority: u64,
}

impl ElectionConfig {
  pub fn new(seniority: u64) -> Self {
    Self {
      gossip_interval: Duration::from_secs(2),
      seniority,
    }
  }

  pub fn forced_master() -> Self {
    Self::new(FORCED_MASTER_SENIORITY)
  }
}

impl Default for ElectionConfig {
  fn default() -> Self {
    Self::new(0)
  }
}
