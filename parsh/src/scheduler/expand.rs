//! Compound-node expansion: turning `&&`/`||`/`if`/`while`/`until`/`for`
//! sentinels into graph nodes as their test results become known.
//!
//! A sentinel stays at the frontier while pending. Its role is threefold:
//! receive the status of its test tail, hold an access set later siblings
//! serialize against, and parent the body nodes spawned once the branch is
//! decided.

use smallvec::SmallVec;

use crate::access::{analyze, wrapper_access, AccessSet};
use crate::command::CommandTree;
use crate::intake;
use crate::logging::SchedEvent;

use super::frontier::{frontier_add, FrontId, Kind};
use super::graph::{admit, establish, NodeId, Spawn};
use super::{Done, Followup, State};

#[derive(Clone, Copy)]
enum Tail {
    Test,
    Body,
}

/// First expansion, run when the sentinel is seated at the frontier: the
/// test segment becomes child nodes and the sentinel's access narrows to
/// what its body may still touch.
pub(crate) fn activate(state: &mut State, fid: FrontId) {
    let Some(front) = state.frontier.get(fid) else { return };
    let nid = front.node;
    let kind = front.kind;
    let Some(node) = state.graph.get(nid) else { return };
    let command = node.command.clone();
    let nest = node.nest;
    let iteration = node.iteration;
    let (core, _) = command.peel();

    match (kind, core) {
        (Kind::And, CommandTree::And(left, right)) | (Kind::Or, CommandTree::Or(left, right)) => {
            // Later siblings depend on what the right side will touch; the
            // left side's accesses live on its expanded children. A redirect
            // wrapping the whole compound stays on the sentinel.
            let mut access = analyze(right).unwrap_or_default();
            access.union(wrapper_access(&command));
            replace_access(state, nid, access);
            if expand_segment(state, fid, left, nest, iteration, Tail::Test) == 0 {
                state.followups.push_back(Followup::TestStatus(fid, 0));
            }
        }
        (Kind::If, CommandTree::If { test, then, orelse }) => {
            let mut access = analyze(then).unwrap_or_default();
            if let Some(orelse) = orelse {
                access.union(analyze(orelse).unwrap_or_default());
            }
            access.union(wrapper_access(&command));
            replace_access(state, nid, access);
            if expand_segment(state, fid, test, nest, iteration, Tail::Test) == 0 {
                state.followups.push_back(Followup::TestStatus(fid, 0));
            }
        }
        (Kind::While, CommandTree::While { test, body })
        | (Kind::Until, CommandTree::Until { test, body }) => {
            // Loop sentinels keep their full analyzer access: redirect
            // wrappers and future iterations must keep serializing later
            // siblings for as long as the loop runs.
            if expand_segment(state, fid, test, nest, iteration, Tail::Test) == 0 {
                if body_is_empty(body) {
                    retype(state, fid, Kind::Reduced);
                    state.followups.push_back(Followup::SentinelDone(fid));
                } else {
                    if let Some(f) = state.frontier.get_mut(fid) {
                        f.test_empty = true;
                    }
                    state.followups.push_back(Followup::TestStatus(fid, 0));
                }
            }
        }
        (Kind::For, CommandTree::For { var, items, .. }) => {
            match items.first() {
                Some(item) => {
                    spawn_binding(state, fid, var, item, nest, iteration);
                    if let Some(f) = state.frontier.get_mut(fid) {
                        f.for_index = 1;
                    }
                }
                None => {
                    retype(state, fid, Kind::Reduced);
                    state.followups.push_back(Followup::SentinelDone(fid));
                }
            }
        }
        _ => return,
    }
    recheck_dependents(state, fid);
}

/// Reacts to the compound's test tail reporting `status`.
pub(crate) fn on_test_status(state: &mut State, fid: FrontId, status: i32) {
    let Some(front) = state.frontier.get(fid) else { return };
    let kind = front.kind;
    let nid = front.node;
    let test_empty = front.test_empty;
    let for_index = front.for_index;
    let Some(node) = state.graph.get(nid) else { return };
    let command = node.command.clone();
    let nest = node.nest;
    // Non-loop compounds pass their own loop coordinates through to their
    // children; loops stamp children with the current round instead.
    let iteration = node.iteration;
    let (core, _) = command.peel();

    match (kind, core) {
        (Kind::And, CommandTree::And(_, right)) => {
            set_status(state, fid, status);
            retype(state, fid, Kind::Reduced);
            if status == 0 {
                expand_segment(state, fid, right, nest, iteration, Tail::Body);
            } else {
                replace_access(state, nid, wrapper_access(&command));
            }
        }
        (Kind::Or, CommandTree::Or(_, right)) => {
            set_status(state, fid, status);
            retype(state, fid, Kind::Reduced);
            if status != 0 {
                expand_segment(state, fid, right, nest, iteration, Tail::Body);
            } else {
                replace_access(state, nid, wrapper_access(&command));
            }
        }
        (Kind::If, CommandTree::If { then, orelse, .. }) => {
            // An `if` whose selected branch is missing exits 0.
            set_status(state, fid, 0);
            retype(state, fid, Kind::Reduced);
            let branch = if status == 0 { Some(then.as_ref()) } else { orelse.as_deref() };
            match branch {
                Some(branch) => {
                    // Narrow to the taken branch; the untaken side's
                    // accesses stop serializing anyone. The compound's own
                    // wrapping redirect stays.
                    let mut access = analyze(branch).unwrap_or_default();
                    access.union(wrapper_access(&command));
                    replace_access(state, nid, access);
                    expand_segment(state, fid, branch, nest, iteration, Tail::Body);
                }
                None => replace_access(state, nid, wrapper_access(&command)),
            }
        }
        (Kind::While, CommandTree::While { test, body })
        | (Kind::Until, CommandTree::Until { test, body }) => {
            let iterate = if kind == Kind::While { status == 0 } else { status != 0 };
            if iterate {
                let round = bump_iteration(state, fid);
                expand_segment(state, fid, body, nest + 1, round, Tail::Body);
                if !test_empty {
                    expand_segment(state, fid, test, nest, round, Tail::Test);
                }
            } else {
                // Terminating: straggler children keep their own seats, the
                // loop stops dominating later siblings. A redirect wrapping
                // the loop is still in use until the stragglers drain.
                retype(state, fid, Kind::Reduced);
                replace_access(state, nid, wrapper_access(&command));
            }
        }
        (Kind::For, CommandTree::For { var, items, body }) => {
            let round = bump_iteration(state, fid);
            expand_segment(state, fid, body, nest + 1, round, Tail::Body);
            match items.get(for_index) {
                Some(item) => {
                    spawn_binding(state, fid, var, item, nest, round);
                    if let Some(f) = state.frontier.get_mut(fid) {
                        f.for_index = for_index + 1;
                    }
                }
                None => retype(state, fid, Kind::Reduced),
            }
        }
        // A demoted loop's already-queued test completing late.
        _ => return,
    }
    recheck_dependents(state, fid);
}

/// Runs when a sentinel's child count drains to zero.
pub(crate) fn sentinel_done(state: &mut State, fid: FrontId) {
    let (active, kind, test_empty) = match state.frontier.get(fid) {
        Some(front) => (front.active, front.kind, front.test_empty),
        None => return,
    };
    if active > 0 {
        return;
    }
    match kind {
        Kind::Leaf => {}
        Kind::Reduced => finalize(state, fid),
        // An empty-test loop has no test tail; each drained body round
        // triggers the next.
        Kind::While if test_empty => {
            state.followups.push_back(Followup::TestStatus(fid, 0));
        }
        // A pending compound whose children drained without reporting a
        // tail (all cancelled): nothing left to expand.
        _ => {
            retype(state, fid, Kind::Reduced);
            finalize(state, fid);
        }
    }
}

/// Completes the sentinel's own graph node with the compound's status.
fn finalize(state: &mut State, fid: FrontId) {
    let (nid, status, negate) = match state.frontier.get(fid) {
        Some(front) => (front.node, front.status, front.negate),
        None => return,
    };
    let status = if negate { i32::from(status == 0) } else { status };
    super::complete_node(state, nid, status, Done::Normal);
}

/// Expands one segment into child nodes under `fid`; the last child carries
/// the tail flag. Returns how many children were admitted.
fn expand_segment(
    state: &mut State,
    fid: FrontId,
    segment: &CommandTree,
    nest: u32,
    iteration: u64,
    tail: Tail,
) -> usize {
    let parts: Vec<CommandTree> = segment
        .sequence()
        .into_iter()
        .filter(|part| !part_is_empty(part))
        .map(|part| intake::shape(part.clone()))
        .filter(|part| analyze(part).is_ok())
        .collect();
    let count = parts.len();
    for (i, tree) in parts.into_iter().enumerate() {
        let last = i + 1 == count;
        let _ = admit(
            state,
            Spawn {
                tree,
                parent: Some(fid),
                nest,
                iteration,
                test_tail: last && matches!(tail, Tail::Test),
                body_tail: last && matches!(tail, Tail::Body),
            },
        );
    }
    if count > 0 {
        if let Some(seq) = sentinel_seq(state, fid) {
            state.log(SchedEvent::Expanded { seq, children: count });
        }
    }
    count
}

/// One iteration's loop-variable binding, expanded in test position: its
/// completion publishes the version and drives the next round.
fn spawn_binding(state: &mut State, fid: FrontId, var: &str, item: &str, nest: u32, iteration: u64) {
    let tree = CommandTree::VarAssign(Box::new(CommandTree::Simple {
        args: Vec::new(),
        assigns: vec![(var.to_string(), item.to_string())],
        redirects: Vec::new(),
    }));
    let _ = admit(
        state,
        Spawn { tree, parent: Some(fid), nest, iteration, test_tail: true, body_tail: false },
    );
}

/// Detaches the sentinel's dependents and re-adds each through the normal
/// dependency path from the sentinel's position, so edges installed against
/// an over-approximated access set migrate onto the real body nodes (or
/// dissolve entirely).
pub(crate) fn recheck_dependents(state: &mut State, fid: FrontId) {
    let Some(front) = state.frontier.get(fid) else { return };
    let nid = front.node;
    let Some(node) = state.graph.get_mut(nid) else { return };
    let deps: SmallVec<[NodeId; 4]> = std::mem::take(&mut node.dependents);
    for dep in deps {
        match state.graph.get_mut(dep) {
            Some(d) if d.unresolved > 0 => d.unresolved -= 1,
            _ => continue,
        }
        let added = establish(state, dep, Some(fid));
        let ready = match state.graph.get_mut(dep) {
            Some(d) => {
                d.unresolved += added;
                d.unresolved == 0
            }
            None => continue,
        };
        if ready {
            frontier_add(state, dep);
        }
    }
}

fn part_is_empty(tree: &CommandTree) -> bool {
    matches!(tree, CommandTree::Simple { args, assigns, .. }
        if args.is_empty() && assigns.is_empty())
}

fn body_is_empty(body: &CommandTree) -> bool {
    body.sequence().iter().all(|part| part_is_empty(part))
}

fn replace_access(state: &mut State, nid: NodeId, access: AccessSet) {
    if let Some(node) = state.graph.get_mut(nid) {
        node.access = access;
    }
}

fn retype(state: &mut State, fid: FrontId, kind: Kind) {
    if let Some(front) = state.frontier.get_mut(fid) {
        front.kind = kind;
    }
}

fn set_status(state: &mut State, fid: FrontId, status: i32) {
    if let Some(front) = state.frontier.get_mut(fid) {
        front.status = status;
    }
}

fn bump_iteration(state: &mut State, fid: FrontId) -> u64 {
    match state.frontier.get_mut(fid) {
        Some(front) => {
            front.iteration += 1;
            front.iteration
        }
        None => 0,
    }
}

fn sentinel_seq(state: &State, fid: FrontId) -> Option<u64> {
    let front = state.frontier.get(fid)?;
    state.graph.get(front.node).map(|n| n.seq)
}
