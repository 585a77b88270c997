//! Continuous gossip-based leader election (spec.md §4.2).

use {
  crate::{
    config::{ElectionConfig, ABSENT_AFTER_MISSED_INTERVALS},
    result::ElectionResult,
    vote::ElectionVote,
  },
  exo_network::Router,
  exo_primitives::{ConnectionHello, NodeId},
  std::collections::HashMap,
  tokio::sync::mpsc,
  tracing::{debug, info},
};

struct PeerVote {
  vote: ElectionVote,
  missed_intervals: u32,
}

/// Per-node view of "who is master". No terminal state; `Leader` and
/// `Follower` transition freely into one another as the winner changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
  Bootstrapping,
  Leader,
  Follower(NodeId),
}

/// Runs on every node. Drive with [`Election::run`]; observe outcomes
/// on the channel returned by [`Election::results`].
pub struct Election {
  node_id: NodeId,
  config: ElectionConfig,
  router: Router,
  votes: HashMap<NodeId, PeerVote>,
  hellos: HashMap<NodeId, ConnectionHello>,
  state: ElectionState,
  results_tx: mpsc::UnboundedSender<ElectionResult>,
}

impl Election {
  pub fn new(router: Router, config: ElectionConfig) -> (Self, mpsc::UnboundedReceiver<ElectionResult>) {
    let (results_tx, results_rx) = mpsc::unbounded_channel();
    let node_id = router.node_id();
    (
      Self {
        node_id,
        config,
        router,
        votes: HashMap::new(),
        hellos: HashMap::new(),
        state: ElectionState::Bootstrapping,
        results_tx,
      },
      results_rx,
    )
  }

  pub fn state(&self) -> ElectionState {
    self.state
  }

  /// Drives the gossip loop until the router's topics are torn down.
  /// Never returns in normal operation; intended to run as a background
  /// task for the lifetime of the node.
  pub async fn run(mut self) {
    let vote_sender = self.router.sender::<ElectionVote>(exo_network::topics::ELECTION_MESSAGES);
    let mut vote_receiver = self.router.receiver::<ElectionVote>(exo_network::topics::ELECTION_MESSAGES);
    let mut hello_receiver = self
      .router
      .receiver::<ConnectionHello>(exo_network::topics::CONNECTION_MESSAGES);

    let own_vote = ElectionVote::new(self.node_id, self.config.seniority);
    self.votes.insert(
      self.node_id,
      PeerVote {
        vote: own_vote,
        missed_intervals: 0,
      },
    );

    let mut ticker = tokio::time::interval(self.config.gossip_interval);
    let mut previous_winner: Option<NodeId> = None;

    loop {
      tokio::select! {
        _ = ticker.tick() => {
          let _ = vote_sender.send(&own_vote);
          self.age_peers();
          self.recompute(&mut previous_winner);
        }
        Some((origin, _seq, vote)) = vote_receiver.recv() => {
          self.votes.insert(
            origin,
            PeerVote { vote, missed_intervals: 0 },
          );
        }
        Some((origin, _seq, hello)) = hello_receiver.recv() => {
          debug!(node_id = %origin, "retained connection hello");
          self.hellos.insert(origin, hello);
        }
        else => break,
      }
    }
  }

  fn age_peers(&mut self) {
    let node_id = self.node_id;
    self.votes.retain(|id, peer| {
      if *id == node_id {
        return true;
      }
      peer.missed_intervals += 1;
      peer.missed_intervals < ABSENT_AFTER_MISSED_INTERVALS
    });
  }

  fn winner(&self) -> NodeId {
    self
      .votes
      .values()
      .map(|peer| peer.vote)
      .min()
      .map(|vote| vote.node_id)
      .unwrap_or(self.node_id)
  }

  fn recompute(&mut self, previous_winner: &mut Option<NodeId>) {
    let winner = self.winner();
    self.state = if winner == self.node_id {
      ElectionState::Leader
    } else {
      ElectionState::Follower(winner)
    };

    if *previous_winner == Some(winner) {
      return;
    }
    let is_new_master = true;
    info!(winner = %winner, "election winner changed");
    *previous_winner = Some(winner);

    let historic_messages = self.hellos.values().cloned().collect();
    let _ = self.results_tx.send(ElectionResult {
      node_id: winner,
      is_new_master,
      historic_messages,
    });
  }
}

#[cfg(test)]
mod tests {
  use {
    super::*,
    crate::FORCED_MASTER_SENIORITY,
    exo_network::{Identity, LocalMesh},
    std::time::Duration,
  };

  fn router_on(mesh: &LocalMesh) -> Router {
    let router = Router::new(Identity::generate(), std::sync::Arc::new(mesh.attach()));
    router.register_topic(exo_network::topics::ELECTION_MESSAGES).unwrap();
    router.register_topic(exo_network::topics::CONNECTION_MESSAGES).unwrap();
    router
  }

  fn fast_config(seniority: u64) -> ElectionConfig {
    ElectionConfig {
      gossip_interval: Duration::from_millis(20),
      seniority,
    }
  }

  #[tokio::test]
  async fn most_senior_peer_wins() {
    let mesh = LocalMesh::new();
    let senior_router = router_on(&mesh);
    let junior_router = router_on(&mesh);
    let senior_id = senior_router.node_id();

    let (senior, _senior_results) = Election::new(senior_router, fast_config(100));
    let (junior, mut junior_results) = Election::new(junior_router, fast_config(1));

    tokio::spawn(senior.run());
    tokio::spawn(junior.run());

    let result = tokio::time::timeout(Duration::from_secs(2), junior_results.recv())
      .await
      .expect("election should converge")
      .expect("channel open");
    assert_eq!(result.node_id, senior_id);
    assert!(result.is_new_master);
  }

  #[tokio::test]
  async fn forced_master_dominates() {
    let mesh = LocalMesh::new();
    let forced_router = router_on(&mesh);
    let other_router = router_on(&mesh);
    let forced_id = forced_router.node_id();

    let (forced, _forced_results) = Election::new(forced_router, {
      let mut cfg = fast_config(FORCED_MASTER_SENIORITY);
      cfg.gossip_interval = Duration::from_millis(20);
      cfg
    });
    let (other, mut other_results) = Election::new(other_router, fast_config(5));

    tokio::spawn(forced.run());
    tokio::spawn(other.run());

    let result = tokio::time::timeout(Duration::from_secs(2), other_results.recv())
      .await
      .expect("election should converge")
      .expect("channel open");
    assert_eq!(result.node_id, forced_id);
  }
}
