//! Well-known topic names (spec.md §6).

pub const GLOBAL_EVENTS: &str = "GLOBAL_EVENTS";
pub const LOCAL_EVENTS: &str = "LOCAL_EVENTS";
pub const COMMANDS: &str = "COMMANDS";
pub const ELECTION_MESSAGES: &str = "ELECTION_MESSAGES";
pub const CONNECTION_MESSAGES: &str = "CONNECTION_MESSAGES";
