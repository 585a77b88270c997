//! The hello exchanged on `CONNECTION_MESSAGES`: enough for a freshly
//! promoted master to reconstruct topology and profiles without replaying
//! the whole event log.

use {
  crate::{NodeId, NodePerformanceProfile, TopologySnapshot},
  serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionHello {
  pub node_id: NodeId,
  pub profile: NodePerformanceProfile,
  pub topology: TopologySnapshot,
}
