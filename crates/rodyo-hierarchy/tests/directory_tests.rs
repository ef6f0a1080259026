use rodyo_hierarchy::*;
use rodyo_protocol::NodeId;

fn id(s: &str) -> NodeId {
    NodeId::new(s)
}

/// root -> a, b; a -> c, d; c -> g
fn sample_tree() -> TopologyDirectory {
    let mut dir = TopologyDirectory::new(id("root"));
    dir.attach(&id("root"), &id("a")).unwrap();
    dir.attach(&id("root"), &id("b")).unwrap();
    dir.apply_report(&id("a"), &[id("c"), id("d")]);
    dir.apply_report(&id("c"), &[id("g")]);
    dir
}

#[test]
fn test_sample_tree_is_converged() {
    let dir = sample_tree();
    assert!(dir.check_tree().is_ok());
    assert_eq!(dir.listener_count(), 5);
    assert_eq!(
        dir.bfs_order(),
        vec![id("root"), id("a"), id("b"), id("c"), id("d"), id("g")]
    );
}

#[test]
fn test_report_adds_placeholders() {
    let mut dir = TopologyDirectory::new(id("root"));
    dir.attach(&id("root"), &id("a")).unwrap();
    let outcome = dir.apply_report(&id("a"), &[id("c")]);
    assert_eq!(outcome.added, vec![id("c")]);
    let entry = dir.get(&id("c")).expect("placeholder entry");
    assert_eq!(entry.parent_id, Some(id("a")));
    assert!(entry.children.is_empty());
}

#[test]
fn test_report_from_unknown_peer_creates_entry() {
    let mut dir = TopologyDirectory::new(id("root"));
    let outcome = dir.apply_report(&id("ghost"), &[id("x")]);
    assert_eq!(outcome.added, vec![id("ghost"), id("x")]);
    assert!(dir.contains(&id("ghost")));
    // Not attached anywhere yet, so the directory is transiently inconsistent.
    assert!(dir.check_tree().is_err());

    // Once the ghost's parent reports it, the tree converges.
    dir.attach(&id("root"), &id("p")).unwrap();
    dir.apply_report(&id("p"), &[id("ghost")]);
    assert!(dir.check_tree().is_ok());
}

#[test]
fn test_child_disconnect_converges_after_report() {
    let mut dir = sample_tree();
    let before = dir.listener_count();

    // c (with its child g) drops off a; a reports only d.
    let outcome = dir.apply_report(&id("a"), &[id("d")]);
    assert_eq!(outcome.pruned, vec![id("c"), id("g")]);
    assert!(!dir.contains(&id("c")));
    assert!(!dir.contains(&id("g")));
    assert_eq!(dir.child_count(&id("a")), 1);
    assert_eq!(dir.listener_count(), before - 2);
    assert!(dir.check_tree().is_ok());
}

#[test]
fn test_last_report_wins() {
    let mut dir = sample_tree();
    dir.apply_report(&id("a"), &[id("d"), id("c")]);
    assert_eq!(dir.children_of(&id("a")), &[id("d"), id("c")]);
    let outcome = dir.apply_report(&id("a"), &[id("d"), id("c")]);
    assert!(!outcome.changed_membership());
}

#[test]
fn test_report_moves_redirected_node() {
    let mut dir = sample_tree();
    // d reconnected under b before a noticed it was gone.
    dir.apply_report(&id("b"), &[id("d")]);
    assert_eq!(dir.parent_of(&id("d")), Some(&id("b")));
    assert_eq!(dir.children_of(&id("a")), &[id("c")]);

    // a's next report no longer lists d; d is parented by b, so it stays.
    let outcome = dir.apply_report(&id("a"), &[id("c")]);
    assert!(outcome.pruned.is_empty());
    assert!(dir.contains(&id("d")));
    assert!(dir.check_tree().is_ok());
}

#[test]
fn test_report_cannot_create_cycle() {
    let mut dir = sample_tree();
    let outcome = dir.apply_report(&id("g"), &[id("a")]);
    assert_eq!(outcome.rejected, vec![id("a")]);
    assert_eq!(dir.parent_of(&id("a")), Some(&id("root")));
    assert!(dir.check_tree().is_ok());
}

#[test]
fn test_report_naming_root_ignored() {
    let mut dir = sample_tree();
    let outcome = dir.apply_report(&id("root"), &[]);
    assert_eq!(outcome, ReportOutcome::default());
    assert_eq!(dir.child_count(&id("root")), 2);
}

#[test]
fn test_kick_detaches_whole_subtree() {
    let mut dir = sample_tree();
    let removed = dir.detach_subtree(&id("a"));
    assert_eq!(removed, vec![id("a"), id("c"), id("d"), id("g")]);
    assert_eq!(dir.children_of(&id("root")), &[id("b")]);
    assert_eq!(dir.listener_count(), 1);
    assert!(dir.check_tree().is_ok());
}

#[test]
fn test_peer_views_direct_first() {
    let dir = sample_tree();
    let views = dir.peer_views();
    assert_eq!(views.len(), 5);
    assert!(views[0].direct && views[1].direct);
    assert!(views[2..].iter().all(|v| !v.direct));
    assert_eq!(views[0].node_id, id("a"));
    assert_eq!(views[0].child_count, 2);
}

#[test]
fn test_tree_invariant_holds_through_churn() {
    let mut dir = TopologyDirectory::new(id("root"));
    let names: Vec<NodeId> = (0..24).map(|i| id(&format!("n{i}"))).collect();

    // Grow a binary tree by placement, exactly as the root would.
    for node in &names {
        let target = find_placement_target(&dir, 2, Some(node));
        if target == *dir.root() {
            dir.attach(&target, node).unwrap();
        } else {
            let mut children: Vec<NodeId> = dir.children_of(&target).to_vec();
            children.push(node.clone());
            dir.apply_report(&target, &children);
        }
        assert!(dir.check_tree().is_ok());
        assert!(dir.iter().all(|(_, e)| e.children.len() <= 2));
    }
    assert_eq!(dir.listener_count(), names.len());

    // Drop every third node via its parent's report.
    for node in names.iter().step_by(3) {
        let Some(parent) = dir.parent_of(node).cloned() else {
            continue; // already pruned with an ancestor
        };
        let remaining: Vec<NodeId> = dir
            .children_of(&parent)
            .iter()
            .filter(|c| *c != node)
            .cloned()
            .collect();
        if parent == *dir.root() {
            dir.detach_subtree(node);
        } else {
            dir.apply_report(&parent, &remaining);
        }
        assert!(dir.check_tree().is_ok());
    }
}

#[test]
fn test_entry_serializes_for_operators() {
    let dir = sample_tree();
    let json = serde_json::to_value(dir.get(&id("a")).unwrap()).unwrap();
    assert_eq!(json["parent_id"], "root");
    assert_eq!(json["children"], serde_json::json!(["c", "d"]));
}
