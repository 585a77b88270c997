//! Frames [`RunnerFrame`]s over any bidirectional byte stream using a
//! length-delimited codec, matching the ecosystem's standard framing
//! idiom for hand-rolled binary protocols.

use {
  crate::wire::RunnerFrame,
  futures::{SinkExt, StreamExt},
  tokio::io::{AsyncRead, AsyncWrite},
  tokio_util::codec::{Framed, LengthDelimitedCodec},
};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
  #[error("runner connection closed")]
  Closed,

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to encode frame: {0}")]
  Encode(#[from] rmp_serde::encode::Error),

  #[error("failed to decode frame: {0}")]
  Decode(#[from] rmp_serde::decode::Error),
}

pub struct RunnerChannel<T> {
  framed: Framed<T, LengthDelimitedCodec>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> RunnerChannel<T> {
  pub fn new(io: T) -> Self {
    Self {
      framed: Framed::new(io, LengthDelimitedCodec::new()),
    }
  }

  pub async fn send(&mut self, frame: &RunnerFrame) -> Result<(), ChannelError> {
    let bytes = rmp_serde::to_vec(frame)?;
    self.framed.send(bytes.into()).await?;
    Ok(())
  }

  pub async fn recv(&mut self) -> Result<RunnerFrame, ChannelError> {
    let bytes = self.framed.next().await.ok_or(ChannelError::Closed)??;
    Ok(rmp_serde::from_slice(&bytes)?)
  }
}
