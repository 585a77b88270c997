//! Single-threaded deterministic reconciliation loop (spec.md §4.3):
//! `(State, Command) -> (State', [Event])`, replayable given the same
//! command sequence.

use {
  crate::{
    error::Error,
    placement::{hosts_from_ring, select_ring, shard_assignments},
  },
  exo_network::{topics, Router},
  exo_primitives::{
    ChatCompletionTaskParams, Command, CommandId, ConnectionHello, Event, EventEnvelope, Instance,
    InstanceId, InstanceStatus, ModelMetadata, NodeId, State, Task, TaskId, TaskStatus, TaskType,
    Topology,
  },
  tracing::warn,
};

pub struct Master {
  node_id: NodeId,
  tb_only: bool,
  state: State,
  event_log: Vec<EventEnvelope>,
  global_events: exo_network::Sender<EventEnvelope>,
}

impl Master {
  pub fn new(router: &Router, tb_only: bool) -> Self {
    Self {
      node_id: router.node_id(),
      tb_only,
      state: State::new(),
      event_log: Vec::new(),
      global_events: router.sender(topics::GLOBAL_EVENTS),
    }
  }

  pub fn state(&self) -> &State {
    &self.state
  }

  pub fn event_log(&self) -> &[EventEnvelope] {
    &self.event_log
  }

  /// Reconstructs topology and node profiles from a promotion handoff's
  /// connection hellos, folding each peer's profile and its own view of
  /// the topology into local state before any command is accepted.
  pub fn seed_from_hellos(&mut self, hellos: &[ConnectionHello]) {
    let mut topology = self.state.topology.clone();
    for hello in hellos {
      self.apply_locally(&Event::NodeProfileUpdated {
        node_id: hello.node_id,
        profile: hello.profile,
      });
      for node in &hello.topology.nodes {
        topology.add_node(node.node_id, node.address);
      }
      for (from, to, edge) in &hello.topology.edges {
        topology.add_edge(*from, *to, *edge);
      }
    }
    self.apply_locally(&Event::TopologyUpdated { snapshot: topology.to_snapshot() });
  }

  /// Consumes `COMMANDS` and `LOCAL_EVENTS` until both channels close
  /// (router dropped). `LOCAL_EVENTS` carries the `NodeProfileUpdated` and
  /// `TopologyUpdated` events published by the worker-side profiler and
  /// folds them back into global state (spec.md §2, §4.3); `COMMANDS`
  /// carries the operator/API-facing requests this loop is built around.
  pub async fn run(mut self, router: Router) {
    let mut commands = router.receiver::<Command>(topics::COMMANDS);
    let mut local_events = router.receiver::<EventEnvelope>(topics::LOCAL_EVENTS);
    loop {
      tokio::select! {
        Some((_origin, _seq, command)) = commands.recv() => {
          if let Err(err) = self.apply(command) {
            warn!("command rejected: {err}");
          }
        }
        Some((_origin, _seq, envelope)) = local_events.recv() => {
          self.apply_locally(&envelope.event);
        }
        else => break,
      }
    }
  }

  pub fn apply(&mut self, command: Command) -> Result<(), Error> {
    match command {
      Command::CreateInstance { model_meta, .. } => self.create_instance(model_meta),
      Command::DeleteInstance { instance_id, .. } => self.delete_instance(instance_id),
      Command::ChatCompletion { command_id, request_params } => {
        self.chat_completion(command_id, request_params)
      }
      // Instances today only materialise via CreateInstance; this command
      // is reserved for future decoupling (spec.md §4.3) and is a no-op.
      Command::SpinUpInstance { .. } => Ok(()),
      Command::TaskFinished { finished_command_id, .. } => self.task_finished(finished_command_id),
      Command::RequestEventLog { since_idx, .. } => self.replay(since_idx),
    }
  }

  fn create_instance(&mut self, model_meta: ModelMetadata) -> Result<(), Error> {
    let ring = select_ring(
      &self.state.topology,
      &self.state.node_profiles,
      model_meta.storage_size,
      self.tb_only,
    )
    .map_err(|_| Error::NoFeasiblePlacement)?;

    let shard_assignments = shard_assignments(&model_meta, &ring);
    let hosts = hosts_from_ring(&self.state.topology, &ring);
    let instance = Instance {
      instance_id: InstanceId::new(),
      status: InstanceStatus::Active,
      shard_assignments,
      hosts,
    };
    self.emit(Event::InstanceCreated { instance });
    Ok(())
  }

  fn delete_instance(&mut self, instance_id: InstanceId) -> Result<(), Error> {
    if !self.state.instances.contains_key(&instance_id) {
      return Err(Error::InstanceNotFound(Some(instance_id)));
    }
    self.emit(Event::InstanceDeleted { instance_id });
    Ok(())
  }

  /// There is currently no per-request instance routing in the command
  /// wire type; chat completions land on whichever instance exists
  /// (the system serves one model at a time in this design).
  fn chat_completion(&mut self, command_id: CommandId, request_params: ChatCompletionTaskParams) -> Result<(), Error> {
    let instance = self
      .state
      .instances
      .values()
      .next()
      .cloned()
      .ok_or(Error::InstanceNotFound(None))?;

    let task = Task {
      task_id: TaskId::new(),
      command_id,
      instance_id: instance.instance_id,
      task_type: TaskType::ChatCompletion,
      status: TaskStatus::Pending,
      params: request_params,
      error: None,
    };
    self.emit(Event::TaskCreated { task });
    Ok(())
  }

  fn task_finished(&mut self, finished_command_id: CommandId) -> Result<(), Error> {
    if let Some(task) = self
      .state
      .tasks
      .values_mut()
      .find(|t| t.command_id == finished_command_id)
    {
      task.status = TaskStatus::Complete;
    }
    Ok(())
  }

  /// Re-publishes the master's own log from `since_idx` onward, verbatim
  /// (same domain `seq`), satisfying replay soundness (spec.md §8.6).
  fn replay(&mut self, since_idx: u64) -> Result<(), Error> {
    for envelope in self.event_log.iter().skip(since_idx as usize) {
      if let Err(err) = self.global_events.send(envelope) {
        warn!("failed to republish event during replay: {err}");
      }
    }
    Ok(())
  }

  fn emit(&mut self, event: Event) {
    self.apply_locally(&event);
    let seq = self.event_log.len() as u64;
    let envelope = EventEnvelope { origin: self.node_id, seq, event };
    if let Err(err) = self.global_events.send(&envelope) {
      warn!("failed to publish global event: {err}");
    }
    self.event_log.push(envelope);
  }

  fn apply_locally(&mut self, event: &Event) {
    match event {
      Event::InstanceCreated { instance } => {
        self.state.instances.insert(instance.instance_id, instance.clone());
      }
      Event::InstanceDeleted { instance_id } => {
        self.state.instances.remove(instance_id);
      }
      Event::TaskCreated { task } => {
        self.state.tasks.insert(task.task_id, task.clone());
      }
      Event::NodeProfileUpdated { node_id, profile } => {
        self.state.node_profiles.insert(*node_id, *profile);
      }
      Event::TopologyUpdated { snapshot } => {
        if let Ok(topology) = Topology::from_snapshot(snapshot.clone()) {
          self.state.topology = topology;
        }
      }
      Event::RunnerStatusUpdated { .. } | Event::ChunkGenerated { .. } | Event::TaskFinished { .. } => {}
    }
    self.state.last_event_applied_idx += 1;
  }
}

#[cfg(test)]
mod tests {
  use {
    super::*,
    exo_network::{Identity, LocalMesh, Transport},
    exo_primitives::{ChatMessage, Memory, ModelId, NodePerformanceProfile},
    std::sync::Arc,
  };

  fn make_router() -> Router {
    let identity = Identity::generate();
    let transport: Arc<dyn Transport> = Arc::new(LocalMesh::new().attach());
    Router::new(identity, transport)
  }

  fn model_meta() -> ModelMetadata {
    ModelMetadata {
      model_id: ModelId::new("meta-llama/Llama-3-8B"),
      pretty_name: "Llama 3 8B".to_string(),
      storage_size: Memory::from_gb(16),
      n_layers: 32,
    }
  }

  #[test]
  fn create_instance_without_topology_is_infeasible() {
    let router = make_router();
    router.register_topic(topics::GLOBAL_EVENTS).unwrap();
    let mut master = Master::new(&router, false);

    let result = master.apply(Command::CreateInstance {
      command_id: CommandId::new(),
      model_meta: model_meta(),
    });
    assert!(matches!(result, Err(Error::NoFeasiblePlacement)));
  }

  #[test]
  fn delete_unknown_instance_is_not_found() {
    let router = make_router();
    router.register_topic(topics::GLOBAL_EVENTS).unwrap();
    let mut master = Master::new(&router, false);

    let result = master.apply(Command::DeleteInstance {
      command_id: CommandId::new(),
      instance_id: InstanceId::new(),
    });
    assert!(matches!(result, Err(Error::InstanceNotFound(Some(_)))));
  }

  #[test]
  fn chat_completion_without_instance_fails() {
    let router = make_router();
    router.register_topic(topics::GLOBAL_EVENTS).unwrap();
    let mut master = Master::new(&router, false);

    let result = master.apply(Command::ChatCompletion {
      command_id: CommandId::new(),
      request_params: ChatCompletionTaskParams {
        messages: vec![ChatMessage { role: "user".to_string(), content: "hi".to_string() }],
        max_tokens: None,
        temperature: None,
      },
    });
    assert!(matches!(result, Err(Error::InstanceNotFound(None))));
  }

  #[test]
  fn single_node_placement_creates_a_one_shard_instance_and_routes_chat() {
    let router = make_router();
    router.register_topic(topics::GLOBAL_EVENTS).unwrap();
    let node_id = router.node_id();
    let mut master = Master::new(&router, false);

    // Seed this node into the topology so a singleton ring is feasible.
    let mut topology = Topology::new();
    topology.add_node(node_id, None);
    master.apply_locally(&Event::TopologyUpdated { snapshot: topology.to_snapshot() });

    // Seed enough RAM that the singleton ring passes the memory filter.
    master.apply_locally(&Event::NodeProfileUpdated {
      node_id,
      profile: NodePerformanceProfile {
        node_id,
        ram_available: Memory::from_gb(32),
        ram_total: Memory::from_gb(32),
      },
    });

    master
      .apply(Command::CreateInstance {
        command_id: CommandId::new(),
        model_meta: model_meta(),
      })
      .unwrap();
    assert_eq!(master.state().instances.len(), 1);
    assert_eq!(master.event_log().len(), 1);

    master
      .apply(Command::ChatCompletion {
        command_id: CommandId::new(),
        request_params: ChatCompletionTaskParams {
          messages: vec![ChatMessage { role: "user".to_string(), content: "What is the capital of France?".to_string() }],
          max_tokens: None,
          temperature: None,
        },
      })
      .unwrap();
    assert_eq!(master.state().tasks.len(), 1);
  }
}
