//! Exponential backoff with full jitter, shared by transport retry and
//! (via `exo-downloader`) per-file download retry.

use {rand::Rng, std::time::Duration};

pub struct Backoff {
  base: Duration,
  cap: Duration,
  attempt: u32,
}

impl Backoff {
  pub fn new(base: Duration, cap: Duration) -> Self {
    Self {
      base,
      cap,
      attempt: 0,
    }
  }

  /// Returns the next delay and advances the internal attempt counter.
  /// Full jitter: a uniform random value in `[0, min(cap, base * 2^attempt))`.
  pub fn next_delay(&mut self) -> Duration {
    let exp = self.base.as_millis().saturating_mul(1u128 << self.attempt.min(20));
    let capped = exp.min(self.cap.as_millis());
    self.attempt += 1;
    let jittered = rand::thread_rng().gen_range(0..=capped.max(1));
    Duration::from_millis(jittered as u64)
  }

  pub fn reset(&mut self) {
    self.attempt = 0;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn delays_never_exceed_cap() {
    let mut backoff = Backoff::new(Duration::from_millis(200), Duration::from_secs(5));
    for _ in 0..20 {
      let delay = backoff.next_delay();
      assert!(delay <= Duration::from_secs(5));
    }
  }
}
