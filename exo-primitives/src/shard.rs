use {
  crate::{
    ids::{InstanceId, NodeId, RunnerId},
    model::ModelMetadata,
  },
  serde::{Deserialize, Serialize},
  std::{collections::BTreeMap, net::IpAddr},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
  Pipeline,
}

/// Immutable record describing one runner's contiguous layer range of a
/// model. Invariants: `0 <= start_layer < end_layer <= n_layers`; within
/// one instance, the per-rank shards tile `[0, n_layers)` exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardMetadata {
  pub model_meta: ModelMetadata,
  pub partition_strategy: PartitionStrategy,
  pub device_rank: u32,
  pub world_size: u32,
  pub start_layer: u32,
  pub end_layer: u32,
  pub n_layers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ShardMetadataError {
  #[error("start_layer {start} must be < end_layer {end}")]
  EmptyRange { start: u32, end: u32 },
  #[error("end_layer {end} must be <= n_layers {n_layers}")]
  EndLayerOutOfBounds { end: u32, n_layers: u32 },
}

impl ShardMetadata {
  pub fn new(
    model_meta: ModelMetadata,
    device_rank: u32,
    world_size: u32,
    start_layer: u32,
    end_layer: u32,
    n_layers: u32,
  ) -> Result<Self, ShardMetadataError> {
    if start_layer >= end_layer {
      return Err(ShardMetadataError::EmptyRange {
        start: start_layer,
        end: end_layer,
      });
    }
    if end_layer > n_layers {
      return Err(ShardMetadataError::EndLayerOutOfBounds { end: end_layer, n_layers });
    }
    Ok(Self {
      model_meta,
      partition_strategy: PartitionStrategy::Pipeline,
      device_rank,
      world_size,
      start_layer,
      end_layer,
      n_layers,
    })
  }
}

/// Assignment of model layers to the runners of one instance.
///
/// Invariants: `runner_to_shard` and `node_to_runner` agree on the set
/// of runners; `world_size` equals the number of runners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardAssignments {
  pub model_id: crate::model::ModelId,
  pub runner_to_shard: BTreeMap<RunnerId, ShardMetadata>,
  pub node_to_runner: BTreeMap<NodeId, RunnerId>,
}

impl ShardAssignments {
  pub fn world_size(&self) -> usize {
    self.runner_to_shard.len()
  }

  /// Checks the tiling invariant: the union of assigned `[start, end)`
  /// ranges equals `[0, n_layers)` with no overlap.
  pub fn tiles_exactly(&self, n_layers: u32) -> bool {
    let mut ranges: Vec<(u32, u32)> = self
      .runner_to_shard
      .values()
      .map(|s| (s.start_layer, s.end_layer))
      .collect();
    ranges.sort();
    let mut cursor = 0u32;
    for (start, end) in ranges {
      if start != cursor {
        return false;
      }
      cursor = end;
    }
    cursor == n_layers
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
  pub ip: IpAddr,
  pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
  Active,
}

/// A running deployment of one model across a ring of runners.
/// The host list is positionally aligned with ring order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
  pub instance_id: InstanceId,
  pub status: InstanceStatus,
  pub shard_assignments: ShardAssignments,
  pub hosts: Vec<Host>,
}
