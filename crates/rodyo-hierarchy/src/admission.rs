//! Admission placement for new arrivals at the root.
//!
//! The root walks its directory breadth-first and places the arrival under
//! the shallowest node with a free slot, preferring earlier siblings. Every
//! node other than the root is reached by redirect.

use std::collections::{HashSet, VecDeque};

use rodyo_protocol::NodeId;

use crate::TopologyDirectory;

/// Where an inbound connection at the root should end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Accept as a direct child of the root.
    Accept,
    /// Send the arrival to this node instead.
    Redirect(NodeId),
    /// No node has capacity and the root is full too.
    RootFull,
}

/// First node in breadth-first order whose recorded child count is below
/// `max_children`.
///
/// `arriving` (when it already has a stale entry) is skipped together with
/// its subtree, so nobody is ever told to connect to itself. Falls back to
/// the root when no candidate exists.
pub fn find_placement_target(
    directory: &TopologyDirectory,
    max_children: usize,
    arriving: Option<&NodeId>,
) -> NodeId {
    let root = directory.root();
    let mut queue = VecDeque::from([root.clone()]);
    let mut visited = HashSet::new();

    while let Some(current) = queue.pop_front() {
        if !visited.insert(current.clone()) {
            continue;
        }
        if Some(&current) == arriving && current != *root {
            continue;
        }
        if directory.child_count(&current) < max_children {
            return current;
        }
        for child in directory.children_of(&current) {
            if directory.parent_of(child) == Some(&current) && !visited.contains(child) {
                queue.push_back(child.clone());
            }
        }
    }

    root.clone()
}

/// Admission decision for a connection from `arriving`.
///
/// `local_children` is the root's live child channel count, which guards
/// against the directory fallback naming a root that is actually full.
pub fn decide_placement(
    directory: &TopologyDirectory,
    max_children: usize,
    local_children: usize,
    arriving: &NodeId,
) -> Placement {
    let target = find_placement_target(directory, max_children, Some(arriving));
    if target != *directory.root() {
        return Placement::Redirect(target);
    }
    if local_children < max_children {
        Placement::Accept
    } else {
        Placement::RootFull
    }
}
