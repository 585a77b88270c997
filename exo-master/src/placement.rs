//! Placement algorithm for `CreateInstance` (spec.md §4.3 steps 1-8),
//! grounded on `original_source/src/exo/master/placement.py`.

use {
  exo_primitives::{
    Host, Memory, ModelMetadata, NodeId, NodePerformanceProfile, RunnerId, ShardAssignments,
    ShardMetadata, Topology,
  },
  rand::Rng,
  std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr},
  },
};

const EPHEMERAL_PORT_RANGE: std::ops::RangeInclusive<u16> = 49152..=65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
  #[error("no cycle found with sufficient memory")]
  NoFeasiblePlacement,
}

/// All simple directed cycles, plus every node as a singleton ring.
pub fn candidate_rings(topology: &Topology) -> Vec<Vec<NodeId>> {
  let mut candidates = topology.simple_cycles();
  candidates.extend(topology.list_nodes().map(|node| vec![node]));
  candidates
}

fn ram_available(profiles: &BTreeMap<NodeId, NodePerformanceProfile>, node: NodeId) -> Memory {
  profiles.get(&node).map(|p| p.ram_available).unwrap_or(Memory::ZERO)
}

fn total_ram_available(profiles: &BTreeMap<NodeId, NodePerformanceProfile>, ring: &[NodeId]) -> Memory {
  ring.iter().map(|&node| ram_available(profiles, node)).sum()
}

pub fn filter_cycles_by_memory(
  cycles: Vec<Vec<NodeId>>,
  profiles: &BTreeMap<NodeId, NodePerformanceProfile>,
  required: Memory,
) -> Vec<Vec<NodeId>> {
  cycles
    .into_iter()
    .filter(|cycle| total_ram_available(profiles, cycle) >= required)
    .collect()
}

pub fn smallest_cycles(cycles: Vec<Vec<NodeId>>) -> Vec<Vec<NodeId>> {
  let Some(min_len) = cycles.iter().map(Vec::len).min() else {
    return Vec::new();
  };
  cycles.into_iter().filter(|c| c.len() == min_len).collect()
}

/// Runs the full selection: candidate rings -> memory filter -> smallest
/// -> thunderbolt narrowing -> tie-break by summed `ram_available`, then
/// by ascending node-id order.
pub fn select_ring(
  topology: &Topology,
  profiles: &BTreeMap<NodeId, NodePerformanceProfile>,
  storage_size: Memory,
  tb_only: bool,
) -> Result<Vec<NodeId>, PlacementError> {
  let feasible = filter_cycles_by_memory(candidate_rings(topology), profiles, storage_size);
  if feasible.is_empty() {
    return Err(PlacementError::NoFeasiblePlacement);
  }

  let mut rings = smallest_cycles(feasible);

  let thunderbolt: Vec<Vec<NodeId>> = rings
    .iter()
    .filter(|ring| topology.subgraph(ring).is_thunderbolt_cycle(ring))
    .cloned()
    .collect();

  if tb_only && thunderbolt.is_empty() {
    return Err(PlacementError::NoFeasiblePlacement);
  }
  if !thunderbolt.is_empty() {
    rings = thunderbolt;
  }

  rings.sort();
  let winning_ram = rings
    .iter()
    .map(|ring| total_ram_available(profiles, ring))
    .max()
    .ok_or(PlacementError::NoFeasiblePlacement)?;
  rings
    .into_iter()
    .find(|ring| total_ram_available(profiles, ring) == winning_ram)
    .ok_or(PlacementError::NoFeasiblePlacement)
}

/// Splits `[0, n_layers)` into `ring.len()` contiguous pipeline shards of
/// near-equal size; the final shard absorbs the remainder.
pub fn shard_assignments(model_meta: &ModelMetadata, ring: &[NodeId]) -> ShardAssignments {
  let world_size = ring.len() as u32;
  let n_layers = model_meta.n_layers;
  let base = n_layers / world_size;
  let remainder = n_layers % world_size;

  let mut runner_to_shard = BTreeMap::new();
  let mut node_to_runner = BTreeMap::new();
  let mut cursor = 0u32;

  for (rank, &node) in ring.iter().enumerate() {
    let rank = rank as u32;
    let len = if rank == world_size - 1 { base + remainder } else { base };
    let start = cursor;
    let end = start + len;
    cursor = end;

    let shard = ShardMetadata::new(model_meta.clone(), rank, world_size, start, end, n_layers)
      .expect("placement always produces a contiguous, in-bounds tiling");
    let runner_id = RunnerId::new();
    runner_to_shard.insert(runner_id, shard);
    node_to_runner.insert(node, runner_id);
  }

  ShardAssignments {
    model_id: model_meta.model_id.clone(),
    runner_to_shard,
    node_to_runner,
  }
}

/// Mints one ephemeral port per ring position; ports are authoritative
/// cluster-wide once assigned (non-conflict-checked, spec.md §9).
pub fn hosts_from_ring(topology: &Topology, ring: &[NodeId]) -> Vec<Host> {
  let mut rng = rand::thread_rng();
  ring
    .iter()
    .map(|node| Host {
      ip: topology.node_address(node).unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
      port: rng.gen_range(EPHEMERAL_PORT_RANGE),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use {
    super::*,
    ed25519_dalek::SigningKey,
    exo_primitives::{Edge, LinkKind, ModelId},
    rand::rngs::OsRng,
  };

  fn node() -> NodeId {
    let key = SigningKey::generate(&mut OsRng);
    NodeId::from_public_key(key.verifying_key())
  }

  fn profile(node_id: NodeId, ram_gb: u64) -> NodePerformanceProfile {
    NodePerformanceProfile {
      node_id,
      ram_available: Memory::from_gb(ram_gb),
      ram_total: Memory::from_gb(ram_gb),
    }
  }

  #[test]
  fn rejects_when_no_cycle_has_enough_memory() {
    let a = node();
    let mut topology = Topology::new();
    topology.add_node(a, None);
    let mut profiles = BTreeMap::new();
    profiles.insert(a, profile(a, 4));

    let result = select_ring(&topology, &profiles, Memory::from_gb(16), false);
    assert_eq!(result, Err(PlacementError::NoFeasiblePlacement));
  }

  #[test]
  fn prefers_smallest_feasible_ring_then_more_memory() {
    let (a, b, c) = (node(), node(), node());
    let mut topology = Topology::new();
    let edge = Edge { kind: LinkKind::Ethernet, bandwidth_bps: 1_000_000 };
    topology.add_edge(a, b, edge);
    topology.add_edge(b, a, edge);
    topology.add_node(c, None);

    let mut profiles = BTreeMap::new();
    profiles.insert(a, profile(a, 16));
    profiles.insert(b, profile(b, 16));
    profiles.insert(c, profile(c, 64));

    // Singleton [c] and the two-cycle [a, b] both have enough memory;
    // the singleton is smaller so it wins regardless of c's larger RAM.
    let ring = select_ring(&topology, &profiles, Memory::from_gb(16), false).unwrap();
    assert_eq!(ring, vec![c]);
  }

  #[test]
  fn tb_only_rejects_non_thunderbolt_rings() {
    let (a, b) = (node(), node());
    let mut topology = Topology::new();
    let edge = Edge { kind: LinkKind::Ethernet, bandwidth_bps: 1 };
    topology.add_edge(a, b, edge);
    topology.add_edge(b, a, edge);
    let mut profiles = BTreeMap::new();
    profiles.insert(a, profile(a, 16));
    profiles.insert(b, profile(b, 16));

    let result = select_ring(&topology, &profiles, Memory::from_gb(8), true);
    assert_eq!(result, Err(PlacementError::NoFeasiblePlacement));
  }

  #[test]
  fn shard_assignments_tile_the_full_layer_range() {
    let (a, b, c) = (node(), node(), node());
    let model_meta = ModelMetadata {
      model_id: ModelId::new("meta-llama/Llama-3-8B"),
      pretty_name: "Llama 3 8B".to_string(),
      storage_size: Memory::from_gb(16),
      n_layers: 32,
    };
    let assignments = shard_assignments(&model_meta, &[a, b, c]);
    assert_eq!(assignments.world_size(), 3);
    assert!(assignments.tiles_exactly(32));
  }
}
