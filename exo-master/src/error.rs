use exo_primitives::InstanceId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("no cycle in the current topology has sufficient aggregate memory for this model")]
  NoFeasiblePlacement,

  #[error("instance not found: {0:?}")]
  InstanceNotFound(Option<InstanceId>),
}
