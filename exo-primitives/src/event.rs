use {
  crate::{
    ids::{InstanceId, NodeId, RunnerId, TaskId},
    model::FinishReason,
    shard::Instance,
    state::NodePerformanceProfile,
    task::{RunnerStatus, Task, TokenChunk},
    topology::TopologySnapshot,
  },
  serde::{Deserialize, Serialize},
};

/// Events appended to `GLOBAL_EVENTS` by the master, or to `LOCAL_EVENTS`
/// by workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Event {
  InstanceCreated {
    instance: Instance,
  },
  InstanceDeleted {
    instance_id: InstanceId,
  },
  RunnerStatusUpdated {
    runner_id: RunnerId,
    runner_status: RunnerStatus,
  },
  TaskCreated {
    task: Task,
  },
  ChunkGenerated {
    task_id: TaskId,
    chunk: TokenChunk,
  },
  TaskFinished {
    task_id: TaskId,
    finish_reason: FinishReason,
    error: Option<String>,
  },
  NodeProfileUpdated {
    node_id: NodeId,
    profile: NodePerformanceProfile,
  },
  TopologyUpdated {
    snapshot: TopologySnapshot,
  },
}

/// One entry in a topic's ordered log.
///
/// For `GLOBAL_EVENTS`, `seq` is the master-owned, strictly increasing
/// sequence number. For other topics `seq` is per-origin and used only
/// for (origin, seq) deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
  pub origin: NodeId,
  pub seq: u64,
  pub event: Event,
}
