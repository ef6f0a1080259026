use rodyo_hierarchy::*;
use rodyo_protocol::{NodeId, MAX_CHILDREN};

fn id(s: &str) -> NodeId {
    NodeId::new(s)
}

fn root_with_two_children() -> TopologyDirectory {
    let mut dir = TopologyDirectory::new(id("root"));
    dir.attach(&id("root"), &id("a")).unwrap();
    dir.attach(&id("root"), &id("b")).unwrap();
    dir
}

#[test]
fn test_empty_root_accepts() {
    let dir = TopologyDirectory::new(id("root"));
    assert_eq!(find_placement_target(&dir, MAX_CHILDREN, None), id("root"));
    assert_eq!(decide_placement(&dir, MAX_CHILDREN, 0, &id("x")), Placement::Accept);
}

#[test]
fn test_root_with_one_child_still_accepts() {
    let mut dir = TopologyDirectory::new(id("root"));
    dir.attach(&id("root"), &id("a")).unwrap();
    assert_eq!(decide_placement(&dir, MAX_CHILDREN, 1, &id("x")), Placement::Accept);
}

#[test]
fn test_redirect_sequence_fills_first_sibling_first() {
    let mut dir = root_with_two_children();

    // Third arrival: root full, a is the first BFS hit.
    assert_eq!(
        decide_placement(&dir, MAX_CHILDREN, 2, &id("c")),
        Placement::Redirect(id("a"))
    );

    // a reports its first child; it still has room.
    dir.apply_report(&id("a"), &[id("c")]);
    assert_eq!(
        decide_placement(&dir, MAX_CHILDREN, 2, &id("d")),
        Placement::Redirect(id("a"))
    );

    // a is full now, so b is next.
    dir.apply_report(&id("a"), &[id("c"), id("d")]);
    assert_eq!(
        decide_placement(&dir, MAX_CHILDREN, 2, &id("e")),
        Placement::Redirect(id("b"))
    );
}

#[test]
fn test_bfs_prefers_shallow_over_deep() {
    let mut dir = root_with_two_children();
    dir.apply_report(&id("a"), &[id("c"), id("d")]);
    dir.apply_report(&id("b"), &[id("e"), id("f")]);
    dir.apply_report(&id("c"), &[id("g")]);

    // Level 2 is c, d, e, f; c has one free slot and comes first.
    assert_eq!(find_placement_target(&dir, MAX_CHILDREN, None), id("c"));

    dir.apply_report(&id("c"), &[id("g"), id("h")]);
    assert_eq!(find_placement_target(&dir, MAX_CHILDREN, None), id("d"));
}

#[test]
fn test_arriving_node_never_targets_itself() {
    let dir = root_with_two_children();
    // a reconnects while its stale entry is still in the directory.
    assert_eq!(
        decide_placement(&dir, MAX_CHILDREN, 2, &id("a")),
        Placement::Redirect(id("b"))
    );
}

#[test]
fn test_arriving_node_subtree_skipped() {
    let mut dir = root_with_two_children();
    dir.apply_report(&id("a"), &[id("c")]);
    dir.apply_report(&id("b"), &[id("d"), id("e")]);
    // a (stale) and its child c are skipped; d is the first other candidate.
    assert_eq!(find_placement_target(&dir, MAX_CHILDREN, Some(&id("a"))), id("d"));
}

#[test]
fn test_root_full_when_live_channels_exhausted() {
    // Directory lags: it only knows one child, but two channels are open.
    let mut dir = TopologyDirectory::new(id("root"));
    dir.attach(&id("root"), &id("a")).unwrap();
    assert_eq!(decide_placement(&dir, MAX_CHILDREN, 2, &id("x")), Placement::RootFull);
}

#[test]
fn test_fallback_to_root_when_no_capacity_reachable() {
    let mut dir = TopologyDirectory::new(id("root"));
    dir.attach(&id("root"), &id("a")).unwrap();
    dir.attach(&id("root"), &id("b")).unwrap();
    // Zero fanout: nothing ever has room, the root comes back as fallback.
    assert_eq!(find_placement_target(&dir, 0, None), id("root"));
    assert_eq!(decide_placement(&dir, 0, 2, &id("x")), Placement::RootFull);
}
