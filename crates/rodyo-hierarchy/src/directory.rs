//! Root-side topology directory.
//!
//! Maps every known node to its parent and ordered child list. The root
//! observes its own children directly; everything deeper is learned from
//! `MESH_REPORT`s, so the directory may lag the live graph between a
//! structural change and the report that describes it.

use std::collections::{HashMap, HashSet, VecDeque};

use rodyo_protocol::{NodeId, PeerView};
use serde::Serialize;

use crate::HierarchyError;

/// What the root knows about one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopologyEntry {
    pub parent_id: Option<NodeId>,
    /// Authoritative child list; child counts are always derived from it.
    pub children: Vec<NodeId>,
}

/// Result of folding one report into the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportOutcome {
    /// Nodes that were not known before this report.
    pub added: Vec<NodeId>,
    /// Nodes removed because their edge to the reporting node disappeared.
    pub pruned: Vec<NodeId>,
    /// Reported children dropped because accepting them would form a cycle.
    pub rejected: Vec<NodeId>,
}

impl ReportOutcome {
    pub fn changed_membership(&self) -> bool {
        !self.added.is_empty() || !self.pruned.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TopologyDirectory {
    root: NodeId,
    entries: HashMap<NodeId, TopologyEntry>,
}

impl TopologyDirectory {
    pub fn new(root: NodeId) -> Self {
        let mut entries = HashMap::new();
        entries.insert(root.clone(), TopologyEntry::default());
        Self { root, entries }
    }

    pub fn root(&self) -> &NodeId {
        &self.root
    }

    pub fn get(&self, id: &NodeId) -> Option<&TopologyEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of entries, the root included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Known listeners, i.e. every entry except the root.
    pub fn listener_count(&self) -> usize {
        self.entries.len().saturating_sub(1)
    }

    pub fn child_count(&self, id: &NodeId) -> usize {
        self.entries.get(id).map(|e| e.children.len()).unwrap_or(0)
    }

    pub fn children_of(&self, id: &NodeId) -> &[NodeId] {
        self.entries
            .get(id)
            .map(|e| e.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent_of(&self, id: &NodeId) -> Option<&NodeId> {
        self.entries.get(id).and_then(|e| e.parent_id.as_ref())
    }

    /// True when `ancestor` is `node` itself or lies on its parent chain.
    pub fn is_self_or_ancestor(&self, ancestor: &NodeId, node: &NodeId) -> bool {
        let mut current = Some(node);
        let mut steps = 0;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.entries.len() {
                break;
            }
            current = self.parent_of(id);
        }
        false
    }

    /// Record `child` as a direct child of `parent`, re-parenting it (with
    /// its subtree) if it was already known elsewhere.
    pub fn attach(&mut self, parent: &NodeId, child: &NodeId) -> Result<(), HierarchyError> {
        if *child == self.root {
            return Err(HierarchyError::RootHasNoParent);
        }
        if !self.entries.contains_key(parent) {
            return Err(HierarchyError::UnknownNode(parent.clone()));
        }
        if self.entries.contains_key(child) && self.is_self_or_ancestor(child, parent) {
            return Err(HierarchyError::Cycle {
                parent: parent.clone(),
                child: child.clone(),
            });
        }

        self.unlink_from_parent(child, Some(parent));
        self.entries.entry(child.clone()).or_default().parent_id = Some(parent.clone());
        if let Some(entry) = self.entries.get_mut(parent) {
            if !entry.children.contains(child) {
                entry.children.push(child.clone());
            }
        }
        Ok(())
    }

    /// Remove `id` and every node below it. Returns the removed ids in
    /// breadth-first order. The root is never removed.
    pub fn detach_subtree(&mut self, id: &NodeId) -> Vec<NodeId> {
        if *id == self.root || !self.entries.contains_key(id) {
            return Vec::new();
        }
        self.unlink_from_parent(id, None);
        let removed = self.subtree(id);
        for node in &removed {
            self.entries.remove(node);
        }
        removed
    }

    /// Fold a `MESH_REPORT{peer, children}` into the directory.
    ///
    /// The reported list replaces the previous one (last report wins).
    /// Unknown children get placeholder entries, children known under a
    /// different parent are moved, and previously listed children that are
    /// gone are pruned together with their subtrees.
    pub fn apply_report(&mut self, peer: &NodeId, children: &[NodeId]) -> ReportOutcome {
        let mut outcome = ReportOutcome::default();
        if *peer == self.root {
            tracing::debug!(peer = %peer, "Ignoring report naming the root");
            return outcome;
        }

        if !self.entries.contains_key(peer) {
            self.entries.insert(peer.clone(), TopologyEntry::default());
            outcome.added.push(peer.clone());
        }

        let mut reported: Vec<NodeId> = Vec::with_capacity(children.len());
        for child in children {
            if child == peer || *child == self.root || reported.contains(child) {
                continue;
            }
            if self.entries.contains_key(child) && self.is_self_or_ancestor(child, peer) {
                tracing::warn!(peer = %peer, child = %child, "Reported child is an ancestor, dropping");
                outcome.rejected.push(child.clone());
                continue;
            }
            reported.push(child.clone());
        }

        // Move reported children first so pruning a vanished sibling's
        // subtree cannot take a freshly re-parented node with it.
        for child in &reported {
            if self.entries.contains_key(child) {
                self.unlink_from_parent(child, Some(peer));
            } else {
                outcome.added.push(child.clone());
            }
            self.entries.entry(child.clone()).or_default().parent_id = Some(peer.clone());
        }

        let previous = self
            .entries
            .get(peer)
            .map(|e| e.children.clone())
            .unwrap_or_default();
        for gone in previous.iter().filter(|c| !reported.contains(c)) {
            if self.parent_of(gone) == Some(peer) {
                outcome.pruned.extend(self.detach_subtree(gone));
            }
        }

        if let Some(entry) = self.entries.get_mut(peer) {
            entry.children = reported;
        }
        outcome
    }

    /// `id` and all of its descendants, breadth-first. Only follows child
    /// links that agree with the child's own `parent_id`.
    pub fn subtree(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if !self.entries.contains_key(id) {
            return out;
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.clone()]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for child in self.children_of(&current) {
                if self.parent_of(child) == Some(&current) {
                    queue.push_back(child.clone());
                }
            }
            out.push(current);
        }
        out
    }

    /// Every node reachable from the root, breadth-first.
    pub fn bfs_order(&self) -> Vec<NodeId> {
        self.subtree(&self.root)
    }

    /// Listeners for the operator list: direct children of the root first,
    /// then the rest of the tree in breadth-first order, then any entries
    /// not yet reachable from the root.
    pub fn peer_views(&self) -> Vec<PeerView> {
        let mut ordered = self.bfs_order();
        let reachable: HashSet<&NodeId> = ordered.iter().collect();
        let mut detached: Vec<NodeId> = self
            .entries
            .keys()
            .filter(|id| !reachable.contains(id))
            .cloned()
            .collect();
        detached.sort();
        ordered.extend(detached);

        let mut views: Vec<PeerView> = ordered
            .into_iter()
            .filter(|id| *id != self.root)
            .map(|id| {
                let entry = self.entries.get(&id).cloned().unwrap_or_default();
                PeerView {
                    direct: entry.parent_id.as_ref() == Some(&self.root),
                    parent_id: entry.parent_id,
                    child_count: entry.children.len(),
                    node_id: id,
                }
            })
            .collect();
        views.sort_by_key(|v| !v.direct);
        views
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &TopologyEntry)> {
        self.entries.iter()
    }

    /// Verify the converged-state invariants: a single root without a
    /// parent, parent and child links that agree, and every entry reachable
    /// from the root.
    pub fn check_tree(&self) -> Result<(), HierarchyError> {
        match self.entries.get(&self.root) {
            Some(entry) if entry.parent_id.is_none() => {}
            Some(_) => return Err(HierarchyError::Invariant("root has a parent".into())),
            None => return Err(HierarchyError::Invariant("root entry missing".into())),
        }
        for (id, entry) in &self.entries {
            if *id != self.root {
                let parent = entry.parent_id.as_ref().ok_or_else(|| {
                    HierarchyError::Invariant(format!("{id} has no parent"))
                })?;
                if !self.children_of(parent).contains(id) {
                    return Err(HierarchyError::Invariant(format!(
                        "{id} missing from children of {parent}"
                    )));
                }
            }
            for child in &entry.children {
                if self.parent_of(child) != Some(id) {
                    return Err(HierarchyError::Invariant(format!(
                        "{child} listed under {id} but parented elsewhere"
                    )));
                }
            }
        }
        let reachable = self.bfs_order().len();
        if reachable != self.entries.len() {
            return Err(HierarchyError::Invariant(format!(
                "{} of {} entries unreachable from root",
                self.entries.len() - reachable,
                self.entries.len()
            )));
        }
        Ok(())
    }

    /// Drop `child` from its current parent's list unless that parent is
    /// `keep_under`.
    fn unlink_from_parent(&mut self, child: &NodeId, keep_under: Option<&NodeId>) {
        let Some(old_parent) = self.parent_of(child).cloned() else {
            return;
        };
        if Some(&old_parent) == keep_under {
            return;
        }
        if let Some(entry) = self.entries.get_mut(&old_parent) {
            entry.children.retain(|c| c != child);
        }
    }
}
