//! Host discovery: target resolution, neighbor snapshots and probing

pub mod neighbor;
pub mod probe;
pub mod targets;

pub use neighbor::{NeighborTable, StaticNeighborTable, SystemNeighborTable};
pub use probe::HostProber;
pub use targets::resolve_targets;
