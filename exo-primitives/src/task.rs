use {
  crate::{
    ids::{CommandId, InstanceId, TaskId},
    model::{ChatCompletionTaskParams, FinishReason},
  },
  serde::{Deserialize, Serialize},
};

/// Tagged variant describing a runner's lifecycle progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunnerStatus {
  Spawning,
  Loaded { progress: f32 },
  Ready,
  Failed { reason: String },
  Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
  ChatCompletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Pending,
  Running,
  Complete,
  Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub task_id: TaskId,
  pub command_id: CommandId,
  pub instance_id: InstanceId,
  pub task_type: TaskType,
  pub status: TaskStatus,
  pub params: ChatCompletionTaskParams,
  pub error: Option<String>,
}

/// One chunk of a streamed chat-completion response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenChunk {
  pub text: String,
  pub finish_reason: Option<FinishReason>,
}
