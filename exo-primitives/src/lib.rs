mod command;
mod connection;
mod event;
mod ids;
mod memory;
mod model;
mod shard;
mod state;
mod task;
mod topology;

pub use {
  command::Command,
  connection::ConnectionHello,
  event::{Event, EventEnvelope},
  ids::{CommandId, EventId, InstanceId, NodeId, RunnerId, TaskId},
  memory::Memory,
  model::{ChatCompletionTaskParams, FinishReason, ModelId, ModelMetadata},
  shard::{Host, Instance, InstanceStatus, PartitionStrategy, ShardAssignments, ShardMetadata},
  state::{NodePerformanceProfile, State, WorkerStatus},
  task::{RunnerStatus, Task, TaskStatus, TaskType, TokenChunk},
  topology::{Edge, LinkKind, Topology, TopologyError, TopologySnapshot},
};
