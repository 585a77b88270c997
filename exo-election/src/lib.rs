mod config;
mod election;
mod result;
mod vote;

pub use {
  config::{ElectionConfig, ABSENT_AFTER_MISSED_INTERVALS, FORCED_MASTER_SENIORITY},
  election::{Election, ElectionState},
  result::ElectionResult,
  vote::ElectionVote,
};
