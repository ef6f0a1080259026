//! RODYO Hierarchy - the shape of the overlay tree
//!
//! - [`NodeRoleState`]: what every node knows locally (one parent, bounded children)
//! - [`TopologyDirectory`]: the root's view of the whole tree, kept current by reports
//! - [`admission`]: capacity-aware placement of new arrivals by breadth-first search

pub mod admission;
pub mod directory;
pub mod error;
pub mod role;

pub use admission::{decide_placement, find_placement_target, Placement};
pub use directory::{ReportOutcome, TopologyDirectory, TopologyEntry};
pub use error::HierarchyError;
pub use role::{ChannelRole, Link, NodeRoleState};
