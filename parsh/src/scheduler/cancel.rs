//! `break`/`continue` cancellation: pruning queued body work when a
//! directive completes.
//!
//! Directives never reach an evaluator. They ride the graph like any other
//! command (their access entries serialize them behind earlier body members
//! of their iteration) and, on reaching the dispatch cursor, are reaped in
//! place; reaping lands here.

use smallvec::SmallVec;

use crate::command::CommandTree;

use super::frontier::{FrontId, Kind};
use super::graph::NodeId;
use super::{complete_node, Done, State};

/// Applies a completed `break`/`continue` node to its enclosing loops.
pub(crate) fn on_directive(state: &mut State, id: NodeId) {
    let Some(node) = state.graph.get(id) else { return };
    let (is_break, levels) = match node.command.peel().0 {
        CommandTree::Break(k) => (true, k.unwrap_or(1).max(1)),
        CommandTree::Continue(k) => (false, k.unwrap_or(1).max(1)),
        _ => return,
    };

    // Walk the parent chain, collecting crossed loops and the chain nodes
    // themselves (the chain is immune to its own directive).
    let mut protected: SmallVec<[NodeId; 4]> = SmallVec::new();
    protected.push(id);
    let mut target: Option<(FrontId, u64)> = None;
    let mut remaining = levels;
    let mut below = id;
    let mut parent = state.graph.get(id).and_then(|n| n.parent);
    while let Some(fid) = parent {
        let Some(front) = state.frontier.get(fid) else { break };
        let front_node = front.node;
        if front.is_loop {
            // The directive's iteration as seen by this loop is the stamp
            // of the chain node directly beneath it.
            let seen_iter = state.graph.get(below).map_or(0, |n| n.iteration);
            target = Some((fid, seen_iter));
            remaining -= 1;
            if remaining == 0 {
                break;
            }
        }
        protected.push(front_node);
        below = front_node;
        parent = state.graph.get(front_node).and_then(|n| n.parent);
    }
    // `break 99` beyond the actual nesting targets the outermost loop.
    let Some((loop_fid, iteration)) = target else { return };

    let Some(front) = state.frontier.get(loop_fid) else { return };
    let loop_node = front.node;
    let threshold = state.graph.get(loop_node).map_or(1, |n| n.nest + 1);

    if is_break {
        // Demotion: the already-queued next test completes without
        // re-expanding the loop.
        if let Some(front) = state.frontier.get_mut(loop_fid) {
            front.kind = Kind::Reduced;
        }
    }

    let children: SmallVec<[NodeId; 4]> = match state.frontier.get(loop_fid) {
        Some(front) => front.children.iter().copied().collect(),
        None => return,
    };
    for child in children {
        if protected.contains(&child) {
            continue;
        }
        let Some(c) = state.graph.get(child) else { continue };
        let hit = c.nest >= threshold
            && if is_break { c.iteration >= iteration } else { c.iteration == iteration };
        if hit {
            prune(state, child);
        }
    }

    // Loops crossed on the way up are abandoned outright: their queued
    // children go, and demotion stops any further iteration. The target
    // loop itself is exempt (an over-deep `continue` clamps to it and must
    // leave it iterating).
    for &chained in &protected {
        if chained == id || chained == loop_node {
            continue;
        }
        let Some(pfid) = state.graph.get(chained).and_then(|n| n.frontier) else {
            continue;
        };
        let Some(front) = state.frontier.get(pfid) else { continue };
        if !front.is_loop || front.kind == Kind::Reduced {
            continue;
        }
        if let Some(front) = state.frontier.get_mut(pfid) {
            front.kind = Kind::Reduced;
        }
        let kids: SmallVec<[NodeId; 4]> = match state.frontier.get(pfid) {
            Some(front) => front.children.iter().copied().collect(),
            None => continue,
        };
        for kid in kids {
            if !protected.contains(&kid) {
                prune(state, kid);
            }
        }
    }
}

/// Prunes one node and, if it is a sentinel, its whole subtree. A node a
/// worker is still running is only marked; its completion is reaped without
/// status propagation.
fn prune(state: &mut State, id: NodeId) {
    let Some(node) = state.graph.get_mut(id) else { return };
    if node.cancelled {
        return;
    }
    node.cancelled = true;
    let seq = node.seq;
    let fid = node.frontier;
    state.log(crate::logging::SchedEvent::Cancelled { seq });

    if let Some(fid) = fid {
        let Some(front) = state.frontier.get(fid) else { return };
        if front.running {
            return;
        }
        let children: SmallVec<[NodeId; 4]> = front.children.iter().copied().collect();
        for child in children {
            prune(state, child);
        }
    }
    complete_node(state, id, 0, Done::Cancelled);
}
