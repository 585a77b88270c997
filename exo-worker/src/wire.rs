//! Length-prefixed frame protocol spoken between a `RunnerSupervisor`
//! and its runner child process.

use {
  exo_primitives::{ChatCompletionTaskParams, FinishReason, ShardMetadata, TaskId},
  serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RunnerFrame {
  LoadRequest {
    shard: ShardMetadata,
  },
  Loaded,
  Infer {
    task_id: TaskId,
    params: ChatCompletionTaskParams,
  },
  TokenChunk {
    task_id: TaskId,
    text: String,
    finish_reason: Option<FinishReason>,
  },
  Error {
    task_id: TaskId,
    message: String,
  },
  Stop,
}
