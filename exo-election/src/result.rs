//! Emitted to the node's local result channel each time the elected
//! master changes (spec.md §4.2).

use exo_primitives::{ConnectionHello, NodeId};

#[derive(Debug, Clone)]
pub struct ElectionResult {
  pub node_id: NodeId,
  pub is_new_master: bool,
  pub historic_messages: Vec<ConnectionHello>,
}
