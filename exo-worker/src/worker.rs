//! Event-driven reconciler: keeps the set of locally-hosted runners in
//! sync with `GLOBAL_EVENTS` (spec.md §4.4). Grounded on
//! `original_source/src/exo/worker/common.py`'s `AssignedRunner`
//! bookkeeping.

use {
  crate::{
    process::RunnerProcess,
    supervisor::RunnerSupervisor,
  },
  exo_downloader::ShardDownloader,
  exo_network::{topics, Router},
  exo_primitives::{
    Command, CommandId, Event, EventEnvelope, FinishReason, Host, Instance, InstanceId, NodeId,
    RunnerId, RunnerStatus, ShardMetadata, Task,
  },
  std::{
    collections::HashMap,
    path::PathBuf,
    sync::{atomic::{AtomicU64, Ordering}, Arc},
    time::{Duration, Instant},
  },
  tokio::sync::Mutex,
  tracing::warn,
};

const MAX_RESPAWNS: usize = 3;
const RESPAWN_WINDOW: Duration = Duration::from_secs(60);

struct AssignedRunner {
  instance_id: InstanceId,
  shard: ShardMetadata,
  hosts: Vec<Host>,
  device_rank: u32,
  supervisor: Option<Arc<RunnerSupervisor>>,
  failures: Vec<Instant>,
}

/// Owns the locally-hosted runner set and drives it to match the
/// master's view of the world.
pub struct Worker {
  inner: Arc<Inner>,
}

struct Inner {
  node_id: NodeId,
  downloader: Arc<dyn ShardDownloader>,
  runner_process: Arc<dyn RunnerProcess>,
  local_events: exo_network::Sender<EventEnvelope>,
  commands: exo_network::Sender<Command>,
  assigned: Mutex<HashMap<RunnerId, AssignedRunner>>,
  local_seq: AtomicU64,
}

impl Worker {
  pub fn new(
    router: &Router,
    downloader: Arc<dyn ShardDownloader>,
    runner_process: Arc<dyn RunnerProcess>,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        node_id: router.node_id(),
        downloader,
        runner_process,
        local_events: router.sender(topics::LOCAL_EVENTS),
        commands: router.sender(topics::COMMANDS),
        assigned: Mutex::new(HashMap::new()),
        local_seq: AtomicU64::new(0),
      }),
    }
  }

  /// Consumes `GLOBAL_EVENTS` until the channel closes (router dropped).
  pub async fn run(self, router: Router) {
    let mut global_events = router.receiver::<EventEnvelope>(topics::GLOBAL_EVENTS);
    while let Some((_origin, _seq, envelope)) = global_events.recv().await {
      let inner = self.inner.clone();
      tokio::spawn(async move { inner.handle_event(envelope.event).await });
    }
  }
}

impl Inner {
  async fn publish_local(&self, event: Event) {
    let seq = self.local_seq.fetch_add(1, Ordering::SeqCst);
    let envelope = EventEnvelope { origin: self.node_id, seq, event };
    if let Err(err) = self.local_events.send(&envelope) {
      warn!("failed to publish local event: {err}");
    }
  }

  async fn publish_status(&self, runner_id: RunnerId, runner_status: RunnerStatus) {
    self
      .publish_local(Event::RunnerStatusUpdated { runner_id, runner_status })
      .await;
  }

  async fn handle_event(self: Arc<Self>, event: Event) {
    match event {
      Event::InstanceCreated { instance } => self.on_instance_created(instance).await,
      Event::InstanceDeleted { instance_id } => self.on_instance_deleted(instance_id).await,
      Event::TaskCreated { task } => self.on_task_created(task).await,
      Event::TopologyUpdated { .. } | Event::NodeProfileUpdated { .. } => {
        // Local cache only; placement and topology state live on the master.
      }
      _ => {}
    }
  }

  fn my_runner_id(&self, instance: &Instance) -> Option<RunnerId> {
    instance.shard_assignments.node_to_runner.get(&self.node_id).copied()
  }

  async fn on_instance_created(self: Arc<Self>, instance: Instance) {
    let Some(runner_id) = self.my_runner_id(&instance) else {
      return;
    };
    let Some(shard) = instance.shard_assignments.runner_to_shard.get(&runner_id).cloned() else {
      return;
    };

    {
      let mut assigned = self.assigned.lock().await;
      let device_rank = shard.device_rank;
      assigned.insert(
        runner_id,
        AssignedRunner {
          instance_id: instance.instance_id,
          shard,
          hosts: instance.hosts.clone(),
          device_rank,
          supervisor: None,
          failures: Vec::new(),
        },
      );
    }
    self.spawn_runner(runner_id).await;
  }

  async fn on_instance_deleted(self: Arc<Self>, instance_id: InstanceId) {
    let runner_ids: Vec<RunnerId> = {
      let assigned = self.assigned.lock().await;
      assigned
        .iter()
        .filter(|(_, a)| a.instance_id == instance_id)
        .map(|(id, _)| *id)
        .collect()
    };
    for runner_id in runner_ids {
      let supervisor = {
        let mut assigned = self.assigned.lock().await;
        assigned.remove(&runner_id).and_then(|a| a.supervisor)
      };
      if let Some(supervisor) = supervisor {
        supervisor.astop().await;
      }
      self.publish_status(runner_id, RunnerStatus::Stopped).await;
    }
  }

  async fn on_task_created(self: Arc<Self>, task: Task) {
    let rank0_runner = {
      let assigned = self.assigned.lock().await;
      assigned
        .iter()
        .find(|(_, a)| a.instance_id == task.instance_id && a.device_rank == 0)
        .map(|(id, a)| (*id, a.supervisor.clone()))
    };
    let Some((_runner_id, Some(supervisor))) = rank0_runner else {
      return;
    };

    let mut replies = supervisor.stream_response(task.task_id, task.params.clone());
    let mut final_reason = FinishReason::Error;
    let mut error_body = None;
    while let Some(reply) = replies.recv().await {
      match reply {
        Ok(chunk) => {
          if let Some(reason) = chunk.finish_reason {
            final_reason = reason;
          }
          self
            .publish_local(Event::ChunkGenerated { task_id: task.task_id, chunk })
            .await;
        }
        Err(err) => {
          error_body = Some(err.to_string());
          break;
        }
      }
    }

    self
      .publish_local(Event::TaskFinished {
        task_id: task.task_id,
        finish_reason: final_reason,
        error: error_body,
      })
      .await;
    self
      .commands
      .send(&Command::TaskFinished {
        command_id: CommandId::new(),
        finished_command_id: task.command_id,
      })
      .ok();
  }

  async fn spawn_runner(self: Arc<Self>, runner_id: RunnerId) {
    self.publish_status(runner_id, RunnerStatus::Spawning).await;

    let (shard, hosts, device_rank) = {
      let assigned = self.assigned.lock().await;
      match assigned.get(&runner_id) {
        Some(a) => (a.shard.clone(), a.hosts.clone(), a.device_rank),
        None => return,
      }
    };

    let shard_dir = match self.downloader.ensure_shard(&shard, false).await {
      Ok(dir) => dir,
      Err(err) => {
        self
          .publish_status(runner_id, RunnerStatus::Failed { reason: err.to_string() })
          .await;
        return;
      }
    };

    self
      .publish_status(runner_id, RunnerStatus::Loaded { progress: 1.0 })
      .await;

    self.bring_up_supervisor(runner_id, shard_dir, shard, hosts, device_rank).await;
  }

  async fn bring_up_supervisor(
    self: Arc<Self>,
    runner_id: RunnerId,
    shard_dir: PathBuf,
    shard: ShardMetadata,
    hosts: Vec<Host>,
    device_rank: u32,
  ) {
    match RunnerSupervisor::create(self.runner_process.clone(), shard_dir, shard, hosts, device_rank).await {
      Ok(supervisor) => {
        {
          let mut assigned = self.assigned.lock().await;
          if let Some(a) = assigned.get_mut(&runner_id) {
            a.supervisor = Some(Arc::new(supervisor));
          } else {
            return;
          }
        }
        self.publish_status(runner_id, RunnerStatus::Ready).await;
      }
      Err(err) => self.record_failure_and_maybe_respawn(runner_id, err.to_string()).await,
    }
  }

  async fn record_failure_and_maybe_respawn(self: Arc<Self>, runner_id: RunnerId, reason: String) {
    let should_respawn = {
      let mut assigned = self.assigned.lock().await;
      let Some(a) = assigned.get_mut(&runner_id) else {
        return;
      };
      let now = Instant::now();
      a.failures.retain(|at| now.duration_since(*at) < RESPAWN_WINDOW);
      a.failures.push(now);
      a.failures.len() <= MAX_RESPAWNS
    };

    if should_respawn {
      warn!(%runner_id, reason, "runner failed, respawning");
      self.spawn_runner(runner_id).await;
    } else {
      warn!(%runner_id, reason, "runner exceeded respawn budget, giving up");
      self
        .publish_status(runner_id, RunnerStatus::Failed { reason })
        .await;
    }
  }
}

#[cfg(test)]
mod tests {
  use {
    super::*,
    crate::process::{ProcessError, SpawnedRunner},
    async_trait::async_trait,
    exo_network::{Identity, LocalMesh, Router},
    exo_primitives::{
      InstanceId, InstanceStatus, Memory, ModelId, ModelMetadata, ShardAssignments,
    },
    std::{net::{IpAddr, Ipv4Addr}, sync::atomic::AtomicU32},
  };

  struct StubDownloader;

  #[async_trait]
  impl ShardDownloader for StubDownloader {
    async fn ensure_shard(&self, _shard: &ShardMetadata, _config_only: bool) -> Result<PathBuf, exo_downloader::Error> {
      Ok(PathBuf::from("/tmp/exo-test-shard"))
    }
    fn on_progress(&self, _callback: exo_downloader::ProgressCallback) {}
  }

  struct FailingProcess {
    attempts: AtomicU32,
  }

  #[async_trait]
  impl RunnerProcess for FailingProcess {
    async fn spawn(
      &self,
      _shard_dir: &PathBuf,
      _shard: &ShardMetadata,
      _hosts: &[Host],
      _device_rank: u32,
    ) -> Result<SpawnedRunner, ProcessError> {
      self.attempts.fetch_add(1, Ordering::SeqCst);
      Err(ProcessError::NoAnnouncedPort)
    }
  }

  fn model_meta() -> ModelMetadata {
    ModelMetadata {
      model_id: ModelId::new("meta-llama/Llama-3-8B"),
      pretty_name: "Llama 3 8B".to_string(),
      storage_size: Memory::from_gb(16),
      n_layers: 32,
    }
  }

  fn make_router() -> Router {
    let identity = Identity::generate();
    let mesh = LocalMesh::new();
    let transport: Arc<dyn exo_network::Transport> = Arc::new(mesh.attach());
    Router::new(identity, transport)
  }

  #[tokio::test]
  async fn unrecoverable_spawn_failure_gives_up_after_three_respawns() {
    let router = make_router();
    router.register_topic(topics::GLOBAL_EVENTS).unwrap();
    router.register_topic(topics::LOCAL_EVENTS).unwrap();
    router.register_topic(topics::COMMANDS).unwrap();

    let process = Arc::new(FailingProcess { attempts: AtomicU32::new(0) });
    let worker = Worker::new(&router, Arc::new(StubDownloader), process.clone());
    let mut statuses = router.receiver::<EventEnvelope>(topics::LOCAL_EVENTS);

    let node_id = router.node_id();
    let runner_id = RunnerId::new();
    let instance_id = InstanceId::new();
    let shard = ShardMetadata::new(model_meta(), 0, 1, 0, 32, 32).unwrap();
    let mut node_to_runner = std::collections::BTreeMap::new();
    node_to_runner.insert(node_id, runner_id);
    let mut runner_to_shard = std::collections::BTreeMap::new();
    runner_to_shard.insert(runner_id, shard);

    let instance = Instance {
      instance_id,
      status: InstanceStatus::Active,
      shard_assignments: ShardAssignments {
        model_id: model_meta().model_id,
        runner_to_shard,
        node_to_runner,
      },
      hosts: vec![Host { ip: IpAddr::V4(Ipv4Addr::LOCALHOST), port: 9000 }],
    };

    worker.inner.clone().on_instance_created(instance).await;

    let mut saw_failed = false;
    for _ in 0..64 {
      let Some((_, _, envelope)) = statuses.recv().await else { break };
      if let Event::RunnerStatusUpdated { runner_status: RunnerStatus::Failed { .. }, .. } = envelope.event {
        saw_failed = true;
        break;
      }
    }
    assert!(saw_failed, "expected a terminal Failed status after the respawn budget was exhausted");
    assert!(process.attempts.load(Ordering::SeqCst) as usize >= MAX_RESPAWNS + 1);
  }
}
