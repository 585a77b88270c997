use {
  crate::{
    ids::{CommandId, InstanceId},
    model::{ChatCompletionTaskParams, ModelMetadata},
  },
  serde::{Deserialize, Serialize},
};

/// Commands accepted on the `COMMANDS` topic. Only the master acts on
/// these; every other node just relays them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Command {
  ChatCompletion {
    command_id: CommandId,
    request_params: ChatCompletionTaskParams,
  },
  CreateInstance {
    command_id: CommandId,
    model_meta: ModelMetadata,
  },
  SpinUpInstance {
    command_id: CommandId,
    instance_id: InstanceId,
  },
  DeleteInstance {
    command_id: CommandId,
    instance_id: InstanceId,
  },
  TaskFinished {
    command_id: CommandId,
    finished_command_id: CommandId,
  },
  RequestEventLog {
    command_id: CommandId,
    since_idx: u64,
  },
}

impl Command {
  pub fn command_id(&self) -> CommandId {
    match self {
      Command::ChatCompletion { command_id, .. }
      | Command::CreateInstance { command_id, .. }
      | Command::SpinUpInstance { command_id, .. }
      | Command::DeleteInstance { command_id, .. }
      | Command::TaskFinished { command_id, .. }
      | Command::RequestEventLog { command_id, .. } => *command_id,
    }
  }
}
