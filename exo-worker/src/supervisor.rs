//! Owns exactly one inference child process (spec.md §4.4). Provides
//! `stream_response`/`astop`; on child exit for any reason, outstanding
//! streams fail with [`SupervisorError::RunnerLost`].

use {
  crate::{
    process::{ProcessError, RunnerProcess, SpawnedRunner},
    wire::RunnerFrame,
  },
  exo_primitives::{ChatCompletionTaskParams, Host, ShardMetadata, TaskId, TokenChunk},
  std::{path::PathBuf, sync::Arc},
  tokio::sync::{mpsc, watch},
  tracing::warn,
};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
  #[error("runner process was lost")]
  RunnerLost,

  #[error("runner reported an error: {0}")]
  RunnerError(String),

  #[error(transparent)]
  Process(#[from] ProcessError),
}

enum ActorCommand {
  Infer {
    task_id: TaskId,
    params: ChatCompletionTaskParams,
    replies: mpsc::UnboundedSender<Result<TokenChunk, SupervisorError>>,
  },
  Stop,
}

pub struct RunnerSupervisor {
  to_actor: mpsc::UnboundedSender<ActorCommand>,
  lost: watch::Receiver<bool>,
}

impl RunnerSupervisor {
  pub async fn create(
    process: Arc<dyn RunnerProcess>,
    shard_dir: PathBuf,
    shard: ShardMetadata,
    hosts: Vec<Host>,
    device_rank: u32,
  ) -> Result<Self, SupervisorError> {
    let mut spawned = process.spawn(&shard_dir, &shard, &hosts, device_rank).await?;
    spawned.channel.send(&RunnerFrame::LoadRequest { shard }).await.map_err(|_| SupervisorError::RunnerLost)?;
    match spawned.channel.recv().await {
      Ok(RunnerFrame::Loaded) => {}
      _ => return Err(SupervisorError::RunnerLost),
    }

    let (to_actor, mut from_supervisor) = mpsc::unbounded_channel();
    let (lost_tx, lost_rx) = watch::channel(false);

    tokio::spawn(async move {
      let mut spawned = spawned;
      while let Some(command) = from_supervisor.recv().await {
        match command {
          ActorCommand::Stop => {
            let _ = spawned.channel.send(&RunnerFrame::Stop).await;
            if let Some(mut child) = spawned.handle.take() {
              let _ = child.kill().await;
            }
            break;
          }
          ActorCommand::Infer {
            task_id,
            params,
            replies,
          } => {
            if spawned
              .channel
              .send(&RunnerFrame::Infer { task_id, params })
              .await
              .is_err()
            {
              let _ = lost_tx.send(true);
              let _ = replies.send(Err(SupervisorError::RunnerLost));
              break;
            }
            loop {
              match spawned.channel.recv().await {
                Ok(RunnerFrame::TokenChunk {
                  task_id: chunk_task,
                  text,
                  finish_reason,
                }) if chunk_task == task_id => {
                  let done = finish_reason.is_some();
                  let _ = replies.send(Ok(TokenChunk { text, finish_reason }));
                  if done {
                    break;
                  }
                }
                Ok(RunnerFrame::Error { task_id: err_task, message }) if err_task == task_id => {
                  let _ = replies.send(Err(SupervisorError::RunnerError(message)));
                  break;
                }
                Ok(_) => continue,
                Err(err) => {
                  warn!("runner channel lost mid-inference: {err}");
                  let _ = lost_tx.send(true);
                  let _ = replies.send(Err(SupervisorError::RunnerLost));
                  break;
                }
              }
            }
          }
        }
      }
    });

    Ok(Self {
      to_actor,
      lost: lost_rx,
    })
  }

  pub fn is_lost(&self) -> bool {
    *self.lost.borrow()
  }

  /// Streams chunks for one inference task. The stream ends either on
  /// `finish_reason.is_some()` or on a [`SupervisorError`].
  pub fn stream_response(
    &self,
    task_id: TaskId,
    params: ChatCompletionTaskParams,
  ) -> mpsc::UnboundedReceiver<Result<TokenChunk, SupervisorError>> {
    let (replies_tx, replies_rx) = mpsc::unbounded_channel();
    if self
      .to_actor
      .send(ActorCommand::Infer {
        task_id,
        params,
        replies: replies_tx.clone(),
      })
      .is_err()
    {
      let _ = replies_tx.send(Err(SupervisorError::RunnerLost));
    }
    replies_rx
  }

  pub async fn astop(&self) {
    let _ = self.to_actor.send(ActorCommand::Stop);
  }
}

#[cfg(test)]
mod tests {
  use {
    super::*,
    async_trait::async_trait,
    exo_primitives::{ChatMessage, FinishReason, Memory, ModelId, ModelMetadata},
    tokio::net::{TcpListener, TcpStream},
  };

  enum Script {
    /// Answers "what is the capital of France" with a fixed phrase.
    ParisChat,
    /// Counts up from 1, truncating at `max_tokens` with `Length`.
    Counting,
    /// Closes the connection right after `Loaded`, simulating the
    /// runner process dying underneath the supervisor.
    DieAfterLoad,
  }

  struct ScriptedRunnerProcess {
    script: Script,
  }

  #[async_trait]
  impl RunnerProcess for ScriptedRunnerProcess {
    async fn spawn(
      &self,
      _shard_dir: &PathBuf,
      _shard: &ShardMetadata,
      _hosts: &[Host],
      _device_rank: u32,
    ) -> Result<SpawnedRunner, ProcessError> {
      let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
      let addr = listener.local_addr()?;
      let client = TcpStream::connect(addr).await?;
      let (server, _) = listener.accept().await?;

      let script = match self.script {
        Script::ParisChat => Script::ParisChat,
        Script::Counting => Script::Counting,
        Script::DieAfterLoad => Script::DieAfterLoad,
      };
      tokio::spawn(run_script(server, script));

      Ok(SpawnedRunner {
        handle: None,
        channel: RunnerChannel::new(client),
      })
    }
  }

  async fn run_script(stream: TcpStream, script: Script) {
    let mut channel = RunnerChannel::new(stream);
    loop {
      match channel.recv().await {
        Ok(RunnerFrame::LoadRequest { .. }) => {
          if channel.send(&RunnerFrame::Loaded).await.is_err() {
            return;
          }
          if matches!(script, Script::DieAfterLoad) {
            return;
          }
        }
        Ok(RunnerFrame::Infer { task_id, params }) => match script {
          Script::ParisChat => {
            for word in ["The", "capital", "of", "France", "is", "Paris", "."] {
              let last = word == ".";
              let frame = RunnerFrame::TokenChunk {
                task_id,
                text: format!("{word} "),
                finish_reason: last.then_some(FinishReason::Stop),
              };
              if channel.send(&frame).await.is_err() {
                return;
              }
            }
          }
          Script::Counting => {
            let max_tokens = params.max_tokens.unwrap_or(100) as u64;
            for n in 1..=100u64 {
              let truncated = n == max_tokens + 1;
              let frame = RunnerFrame::TokenChunk {
                task_id,
                text: format!("{n} "),
                finish_reason: truncated.then_some(FinishReason::Length),
              };
              if channel.send(&frame).await.is_err() {
                return;
              }
              if truncated {
                break;
              }
            }
          }
          Script::DieAfterLoad => return,
        },
        Ok(RunnerFrame::Stop) | Err(_) => return,
        Ok(_) => {}
      }
    }
  }

  fn shard() -> ShardMetadata {
    ShardMetadata::new(
      ModelMetadata {
        model_id: ModelId::new("meta-llama/Llama-3-8B"),
        pretty_name: "Llama 3 8B".to_string(),
        storage_size: Memory::from_gb(16),
        n_layers: 32,
      },
      0,
      1,
      0,
      32,
      32,
    )
    .unwrap()
  }

  fn chat_params(content: &str, max_tokens: Option<u32>) -> ChatCompletionTaskParams {
    ChatCompletionTaskParams {
      messages: vec![ChatMessage { role: "user".to_string(), content: content.to_string() }],
      max_tokens,
      temperature: None,
    }
  }

  async fn collect(
    mut chunks: mpsc::UnboundedReceiver<Result<TokenChunk, SupervisorError>>,
  ) -> (String, Option<FinishReason>, usize) {
    let mut text = String::new();
    let mut finish_reason = None;
    let mut count = 0;
    while let Some(chunk) = chunks.recv().await {
      match chunk {
        Ok(chunk) => {
          count += 1;
          text.push_str(&chunk.text);
          if chunk.finish_reason.is_some() {
            finish_reason = chunk.finish_reason;
            break;
          }
        }
        Err(_) => break,
      }
    }
    (text, finish_reason, count)
  }

  #[tokio::test]
  async fn single_node_response_mentions_paris_and_stops() {
    let process: Arc<dyn RunnerProcess> = Arc::new(ScriptedRunnerProcess { script: Script::ParisChat });
    let supervisor = RunnerSupervisor::create(process, PathBuf::from("/tmp/shard"), shard(), vec![], 0)
      .await
      .unwrap();

    let chunks = supervisor.stream_response(
      TaskId::new(),
      chat_params("What is the capital of France?", None),
    );
    let (text, finish_reason, _count) = collect(chunks).await;

    assert!(text.to_lowercase().contains("paris"), "expected Paris in response, got: {text}");
    assert_eq!(finish_reason, Some(FinishReason::Stop));

    supervisor.astop().await;
  }

  #[tokio::test]
  async fn response_truncates_at_max_tokens_with_length_reason() {
    let process: Arc<dyn RunnerProcess> = Arc::new(ScriptedRunnerProcess { script: Script::Counting });
    let supervisor = RunnerSupervisor::create(process, PathBuf::from("/tmp/shard"), shard(), vec![], 0)
      .await
      .unwrap();

    let chunks = supervisor.stream_response(
      TaskId::new(),
      chat_params("Please count from 1 to 100", Some(50)),
    );
    let (text, finish_reason, count) = collect(chunks).await;

    assert_eq!(count, 51);
    assert!(text.contains('7'));
    assert!(!text.contains("99"));
    assert_eq!(finish_reason, Some(FinishReason::Length));

    supervisor.astop().await;
  }

  #[tokio::test]
  async fn runner_dying_mid_flight_surfaces_as_runner_lost() {
    let process: Arc<dyn RunnerProcess> = Arc::new(ScriptedRunnerProcess { script: Script::DieAfterLoad });
    let supervisor = RunnerSupervisor::create(process, PathBuf::from("/tmp/shard"), shard(), vec![], 0)
      .await
      .unwrap();

    let mut chunks = supervisor.stream_response(TaskId::new(), chat_params("hello", None));
    let first = chunks.recv().await.expect("channel open");
    assert!(matches!(first, Err(SupervisorError::RunnerLost)));

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(supervisor.is_lost());
  }

  #[tokio::test]
  async fn astop_is_a_clean_shutdown_not_a_loss() {
    let process: Arc<dyn RunnerProcess> = Arc::new(ScriptedRunnerProcess { script: Script::ParisChat });
    let supervisor = RunnerSupervisor::create(process, PathBuf::from("/tmp/shard"), shard(), vec![], 0)
      .await
      .unwrap();

    supervisor.astop().await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!supervisor.is_lost());
  }
}
