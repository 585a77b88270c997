use {
  crate::{
    ids::{InstanceId, NodeId, RunnerId, TaskId},
    memory::Memory,
    shard::Instance,
    task::{RunnerStatus, Task},
    topology::{Topology, TopologySnapshot},
  },
  serde::{Deserialize, Serialize},
  std::collections::BTreeMap,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
  Online,
  Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodePerformanceProfile {
  pub node_id: NodeId,
  pub ram_available: Memory,
  pub ram_total: Memory,
}

/// The master's authoritative view of the cluster.
///
/// Invariants: every referenced runner belongs to exactly one instance;
/// every task references an existing instance; `last_event_applied_idx`
/// is monotonically non-decreasing.
#[derive(Debug, Clone, Default)]
pub struct State {
  pub node_status: BTreeMap<NodeId, WorkerStatus>,
  pub instances: BTreeMap<InstanceId, Instance>,
  pub runners: BTreeMap<RunnerId, RunnerStatus>,
  pub tasks: BTreeMap<TaskId, Task>,
  pub node_profiles: BTreeMap<NodeId, NodePerformanceProfile>,
  pub topology: Topology,
  pub history: Vec<TopologySnapshot>,
  pub last_event_applied_idx: i64,
}

impl State {
  pub fn new() -> Self {
    Self {
      last_event_applied_idx: -1,
      ..Default::default()
    }
  }
}
