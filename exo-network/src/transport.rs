//! Pluggable message transport.
//!
//! The raw peer-to-peer transport library is an external collaborator
//! (spec.md §1 Non-goals); this crate only specifies the interface the
//! control plane consumes. [`LocalTransport`] is the in-process loopback
//! mesh used for single-node deployments and multi-node tests; a real
//! networked implementation plugs in behind the same [`Transport`] trait.

use {
  crate::wire::Message,
  parking_lot::Mutex,
  std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  },
  tokio::sync::mpsc,
};

/// Delivers signed [`Message`]s to peers and receives ones sent by them.
pub trait Transport: Send + Sync {
  fn publish(&self, msg: Message);

  /// Takes ownership of the stream of messages originated by other
  /// peers. May only be called once per transport instance.
  fn subscribe(&self) -> mpsc::UnboundedReceiver<Message>;
}

/// A shared in-process hub that [`LocalTransport`] handles attach to.
/// Publishing on one handle fans the message out to every other
/// attached handle, simulating a fully-connected mesh without sockets.
#[derive(Clone, Default)]
pub struct LocalMesh {
  peers: Arc<Mutex<Vec<(u64, mpsc::UnboundedSender<Message>)>>>,
  next_id: Arc<AtomicU64>,
}

impl LocalMesh {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn attach(&self) -> LocalTransport {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::unbounded_channel();
    self.peers.lock().push((id, tx));
    LocalTransport {
      id,
      mesh: self.peers.clone(),
      inbox: Mutex::new(Some(rx)),
    }
  }
}

pub struct LocalTransport {
  id: u64,
  mesh: Arc<Mutex<Vec<(u64, mpsc::UnboundedSender<Message>)>>>,
  inbox: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
}

impl LocalTransport {
  /// A single-node transport with no peers; publishes go nowhere.
  pub fn standalone() -> Self {
    LocalMesh::new().attach()
  }
}

impl Transport for LocalTransport {
  fn publish(&self, msg: Message) {
    let peers = self.mesh.lock();
    for (id, tx) in peers.iter() {
      if *id != self.id {
        let _ = tx.send(msg.clone());
      }
    }
  }

  fn subscribe(&self) -> mpsc::UnboundedReceiver<Message> {
    self
      .inbox
      .lock()
      .take()
      .expect("LocalTransport::subscribe called more than once")
  }
}
