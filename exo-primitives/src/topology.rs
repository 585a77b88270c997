//! Directed topology graph over [`NodeId`], edge-labelled by link kind and
//! measured bandwidth. Backs the placement engine's cycle search.

use {
  crate::ids::NodeId,
  serde::{Deserialize, Serialize},
  std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
  },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
  Thunderbolt,
  Ethernet,
  Wifi,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
  pub kind: LinkKind,
  /// Measured bandwidth in bytes/sec.
  pub bandwidth_bps: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
  pub node_id: NodeId,
  pub address: Option<IpAddr>,
}

/// Immutable, serialisable form of a [`Topology`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
  pub nodes: Vec<NodeRecord>,
  pub edges: Vec<(NodeId, NodeId, Edge)>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TopologyError {
  #[error("edge references node {0:?} which is not present as a vertex")]
  DanglingEdge(NodeId),
}

/// Live topology graph.
///
/// Invariant: every node referenced by any edge is also present as a
/// vertex (enforced on every mutation).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
  nodes: BTreeMap<NodeId, Option<IpAddr>>,
  edges: BTreeMap<NodeId, BTreeMap<NodeId, Edge>>,
}

impl Topology {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_node(&mut self, node_id: NodeId, address: Option<IpAddr>) {
    self.nodes.entry(node_id).or_insert(address);
    if address.is_some() {
      self.nodes.insert(node_id, address);
    }
  }

  pub fn add_edge(&mut self, from: NodeId, to: NodeId, edge: Edge) {
    self.add_node(from, None);
    self.add_node(to, None);
    self.edges.entry(from).or_default().insert(to, edge);
  }

  pub fn list_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
    self.nodes.keys().copied()
  }

  pub fn node_address(&self, node_id: &NodeId) -> Option<IpAddr> {
    self.nodes.get(node_id).copied().flatten()
  }

  pub fn edge(&self, from: &NodeId, to: &NodeId) -> Option<Edge> {
    self.edges.get(from).and_then(|m| m.get(to)).copied()
  }

  pub fn neighbours(&self, node_id: &NodeId) -> impl Iterator<Item = NodeId> + '_ {
    self
      .edges
      .get(node_id)
      .into_iter()
      .flat_map(|m| m.keys().copied())
  }

  pub fn to_snapshot(&self) -> TopologySnapshot {
    let nodes = self
      .nodes
      .iter()
      .map(|(id, addr)| NodeRecord {
        node_id: *id,
        address: *addr,
      })
      .collect();
    let mut edges = vec![];
    for (from, tos) in &self.edges {
      for (to, edge) in tos {
        edges.push((*from, *to, *edge));
      }
    }
    TopologySnapshot { nodes, edges }
  }

  pub fn from_snapshot(snapshot: TopologySnapshot) -> Result<Self, TopologyError> {
    let mut topo = Topology::new();
    for node in &snapshot.nodes {
      topo.add_node(node.node_id, node.address);
    }
    for (from, to, edge) in snapshot.edges {
      if !topo.nodes.contains_key(&from) {
        return Err(TopologyError::DanglingEdge(from));
      }
      if !topo.nodes.contains_key(&to) {
        return Err(TopologyError::DanglingEdge(to));
      }
      topo.add_edge(from, to, edge);
    }
    Ok(topo)
  }

  /// Returns the induced subgraph over exactly `nodes`, keeping only
  /// edges whose endpoints are both members of the set.
  pub fn subgraph(&self, nodes: &[NodeId]) -> Topology {
    let set: BTreeSet<NodeId> = nodes.iter().copied().collect();
    let mut sub = Topology::new();
    for n in nodes {
      sub.add_node(*n, self.node_address(n));
    }
    for (from, tos) in &self.edges {
      if !set.contains(from) {
        continue;
      }
      for (to, edge) in tos {
        if set.contains(to) {
          sub.add_edge(*from, *to, *edge);
        }
      }
    }
    sub
  }

  /// True iff every edge along the ring `cycle` (including the closing
  /// edge back to the first node) is of link-kind [`LinkKind::Thunderbolt`].
  ///
  /// A singleton cycle (one node, no self-edge) is vacuously true.
  pub fn is_thunderbolt_cycle(&self, cycle: &[NodeId]) -> bool {
    if cycle.len() < 2 {
      return true;
    }
    cycle.windows(2).all(|pair| {
      self
        .edge(&pair[0], &pair[1])
        .map(|e| e.kind == LinkKind::Thunderbolt)
        .unwrap_or(false)
    }) && self
      .edge(&cycle[cycle.len() - 1], &cycle[0])
      .map(|e| e.kind == LinkKind::Thunderbolt)
      .unwrap_or(false)
  }

  /// Enumerates all simple directed cycles of length >= 2 in the graph.
  ///
  /// Implemented as a bounded DFS rooted at each node in ascending id
  /// order, only exploring successors with id >= the root to avoid
  /// reporting the same cycle from multiple starting points. Topologies
  /// in this domain are small (tens of devices), so this straightforward
  /// approach is preferred over Johnson's algorithm for clarity.
  pub fn simple_cycles(&self) -> Vec<Vec<NodeId>> {
    let mut roots: Vec<NodeId> = self.nodes.keys().copied().collect();
    roots.sort();

    let mut cycles = vec![];
    for (i, &root) in roots.iter().enumerate() {
      let allowed: BTreeSet<NodeId> = roots[i..].iter().copied().collect();
      let mut path = vec![root];
      let mut visited = BTreeSet::new();
      visited.insert(root);
      self.dfs_cycles(root, root, &allowed, &mut path, &mut visited, &mut cycles);
    }
    cycles
  }

  #[allow(clippy::too_many_arguments)]
  fn dfs_cycles(
    &self,
    root: NodeId,
    current: NodeId,
    allowed: &BTreeSet<NodeId>,
    path: &mut Vec<NodeId>,
    visited: &mut BTreeSet<NodeId>,
    out: &mut Vec<Vec<NodeId>>,
  ) {
    for next in self.neighbours(&current) {
      if !allowed.contains(&next) {
        continue;
      }
      if next == root && path.len() >= 2 {
        out.push(path.clone());
        continue;
      }
      if visited.contains(&next) {
        continue;
      }
      visited.insert(next);
      path.push(next);
      self.dfs_cycles(root, next, allowed, path, visited, out);
      path.pop();
      visited.remove(&next);
    }
  }
}

#[cfg(test)]
mod tests {
  use {super::*, ed25519_dalek::SigningKey, rand::rngs::OsRng};

  fn node() -> NodeId {
    let key = SigningKey::generate(&mut OsRng);
    NodeId::from_public_key(key.verifying_key())
  }

  #[test]
  fn snapshot_roundtrip_is_structurally_equal() {
    let (a, b, c) = (node(), node(), node());
    let mut topo = Topology::new();
    topo.add_edge(
      a,
      b,
      Edge {
        kind: LinkKind::Thunderbolt,
        bandwidth_bps: 1_000_000,
      },
    );
    topo.add_edge(
      b,
      c,
      Edge {
        kind: LinkKind::Ethernet,
        bandwidth_bps: 100_000,
      },
    );

    let snapshot = topo.to_snapshot();
    let restored = Topology::from_snapshot(snapshot.clone()).unwrap();
    assert_eq!(restored.to_snapshot(), snapshot);
  }

  #[test]
  fn finds_two_cycle() {
    let (a, b) = (node(), node());
    let mut topo = Topology::new();
    let edge = Edge {
      kind: LinkKind::Thunderbolt,
      bandwidth_bps: 1,
    };
    topo.add_edge(a, b, edge);
    topo.add_edge(b, a, edge);
    let cycles = topo.simple_cycles();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].len(), 2);
  }

  #[test]
  fn dangling_edge_is_rejected() {
    let (a, b) = (node(), node());
    let snapshot = TopologySnapshot {
      nodes: vec![NodeRecord {
        node_id: a,
        address: None,
      }],
      edges: vec![(
        a,
        b,
        Edge {
          kind: LinkKind::Ethernet,
          bandwidth_bps: 1,
        },
      )],
    };
    assert_eq!(
      Topology::from_snapshot(snapshot),
      Err(TopologyError::DanglingEdge(b))
    );
  }
}
