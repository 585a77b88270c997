mod backoff;
mod history;
mod identity;
mod router;
mod transport;
pub mod wire;

pub mod topics;

pub use {
  backoff::Backoff,
  identity::Identity,
  router::{Error, Receiver, Router, Sender},
  transport::{LocalMesh, LocalTransport, Transport},
};
