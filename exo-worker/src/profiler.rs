//! Periodic local-resource sampling. Publishes `NodeProfileUpdated` on
//! `LOCAL_EVENTS` and, since it already gathers the per-node state a
//! `ConnectionHello` carries, also publishes hellos on
//! `CONNECTION_MESSAGES` (spec.md's election section is silent on who
//! publishes hellos; this is the natural periodic per-node publisher).

use {
  exo_network::{topics, Router},
  exo_primitives::{
    ConnectionHello, Event, EventEnvelope, Memory, NodeId, NodePerformanceProfile, Topology,
  },
  std::time::Duration,
  sysinfo::{RefreshKind, System, SystemExt},
  tokio::time::interval,
};

const DEFAULT_PROFILE_INTERVAL: Duration = Duration::from_secs(5);

pub struct NodeProfiler {
  node_id: NodeId,
  interval: Duration,
  local_events: exo_network::Sender<EventEnvelope>,
  hellos: exo_network::Sender<ConnectionHello>,
  local_seq: std::sync::atomic::AtomicU64,
}

impl NodeProfiler {
  pub fn new(router: Router) -> Self {
    Self::with_interval(router, DEFAULT_PROFILE_INTERVAL)
  }

  pub fn with_interval(router: Router, interval: Duration) -> Self {
    let node_id = router.node_id();
    let local_events = router.sender(topics::LOCAL_EVENTS);
    let hellos = router.sender(topics::CONNECTION_MESSAGES);
    Self {
      node_id,
      interval,
      local_events,
      hellos,
      local_seq: std::sync::atomic::AtomicU64::new(0),
    }
  }

  fn sample(&self) -> NodePerformanceProfile {
    let mut system = System::new_with_specifics(RefreshKind::new().with_memory());
    system.refresh_memory();
    NodePerformanceProfile {
      node_id: self.node_id,
      ram_available: Memory::from_bytes(system.available_memory()),
      ram_total: Memory::from_bytes(system.total_memory()),
    }
  }

  pub async fn run(self) {
    let mut ticker = interval(self.interval);
    loop {
      ticker.tick().await;
      let profile = self.sample();

      let seq = self.local_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
      let envelope = EventEnvelope {
        origin: self.node_id,
        seq,
        event: Event::NodeProfileUpdated {
          node_id: self.node_id,
          profile,
        },
      };
      if let Err(err) = self.local_events.send(&envelope) {
        tracing::warn!("failed to publish node profile: {err}");
      }

      let hello = ConnectionHello {
        node_id: self.node_id,
        profile,
        topology: Topology::default().to_snapshot(),
      };
      if let Err(err) = self.hellos.send(&hello) {
        tracing::warn!("failed to publish connection hello: {err}");
      }
    }
  }
}
