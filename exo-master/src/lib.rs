mod error;
mod master;
mod placement;

pub use {error::Error, master::Master, placement::PlacementError};
