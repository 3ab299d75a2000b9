//! The dependency graph: an arena of command nodes and the edge-derivation
//! logic that orders them.
//!
//! Nodes are addressed by generational indices. Freeing a node bumps its
//! slot's generation, so stale ids held in `dependents` lists of other nodes
//! dereference to `None` and are skipped instead of reaching a recycled
//! node.

use smallvec::SmallVec;
use std::sync::Arc;

use crate::access::{analyze, conflict, AccessSet, Clash, NodeCtx};
use crate::command::CommandTree;
use crate::error::Error;
use crate::logging::SchedEvent;

use super::frontier::{frontier_add, FrontId, Kind};
use super::State;

/// Generational handle to a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeId {
    idx: u32,
    gen: u32,
}

/// One scheduled command.
pub(crate) struct GraphNode {
    /// The command itself; the evaluator holds its own clone while running.
    pub command: Arc<CommandTree>,
    /// Static effect set driving dependency edges.
    pub access: AccessSet,
    /// Downstream nodes waiting on this one (dependency edges only; a
    /// compound's expanded children live on its frontier sentinel).
    pub dependents: SmallVec<[NodeId; 4]>,
    /// Upstream completions still outstanding.
    pub unresolved: u32,
    /// Enclosing compound's frontier sentinel, if any. Never owning.
    pub parent: Option<FrontId>,
    /// Static loop-nesting depth (top level 0).
    pub nest: u32,
    /// Iteration counter of the innermost enclosing loop at creation.
    pub iteration: u64,
    /// Global intake sequence number; orders variable version binding.
    pub seq: u64,
    /// Last command of a compound's test segment.
    pub test_tail: bool,
    /// Last command of a compound's body segment.
    pub body_tail: bool,
    /// Pruned by cancellation; completion is reaped without propagation.
    pub cancelled: bool,
    /// Frontier position while the node is dispatchable, running or parked.
    pub frontier: Option<FrontId>,
    /// `(variable, version seq)` reader registrations to release on
    /// completion.
    pub registered: SmallVec<[(String, u64); 2]>,
    /// Versions this node will publish; retracted if it never does.
    pub pending: SmallVec<[(String, u64); 1]>,
}

impl GraphNode {
    pub(crate) fn ctx(&self) -> NodeCtx {
        NodeCtx { nest: self.nest, iteration: self.iteration }
    }

    /// True for a `break`/`continue` directive node.
    pub(crate) fn is_directive(&self) -> bool {
        matches!(
            self.command.peel().0,
            CommandTree::Break(_) | CommandTree::Continue(_)
        )
    }
}

struct Slot {
    gen: u32,
    node: Option<GraphNode>,
}

/// Arena of graph nodes.
#[derive(Default)]
pub(crate) struct Graph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl Graph {
    pub fn insert(&mut self, node: GraphNode) -> NodeId {
        self.len += 1;
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.node = Some(node);
            NodeId { idx, gen: slot.gen }
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Slot { gen: 0, node: Some(node) });
            NodeId { idx, gen: 0 }
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&GraphNode> {
        let slot = self.slots.get(id.idx as usize)?;
        if slot.gen != id.gen {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        let slot = self.slots.get_mut(id.idx as usize)?;
        if slot.gen != id.gen {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn remove(&mut self, id: NodeId) -> Option<GraphNode> {
        let slot = self.slots.get_mut(id.idx as usize)?;
        if slot.gen != id.gen {
            return None;
        }
        let node = slot.node.take()?;
        slot.gen = slot.gen.wrapping_add(1);
        self.free.push(id.idx);
        self.len -= 1;
        Some(node)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// True when some live node's intake seq lies in `(lo, hi]`. Gates
    /// variable-version reclamation.
    pub fn any_seq_between(&self, lo: u64, hi: u64) -> bool {
        self.slots
            .iter()
            .filter_map(|s| s.node.as_ref())
            .any(|n| n.seq > lo && n.seq <= hi)
    }
}

/// Creation parameters for a node entering the graph.
pub(crate) struct Spawn {
    pub tree: CommandTree,
    pub parent: Option<FrontId>,
    pub nest: u32,
    pub iteration: u64,
    pub test_tail: bool,
    pub body_tail: bool,
}

/// Admits a command into the graph: analyzes it, registers any pending
/// variable versions, derives dependency edges against the frontier, and
/// pushes it onto the frontier when nothing orders it.
pub(crate) fn admit(state: &mut State, spawn: Spawn) -> Result<NodeId, Error> {
    let access = analyze(&spawn.tree)?;
    let seq = state.seq;
    state.seq += 1;

    let mut pending: SmallVec<[(String, u64); 1]> = SmallVec::new();
    if let CommandTree::VarAssign(inner) = &spawn.tree {
        if let CommandTree::Simple { assigns, .. } = inner.as_ref() {
            for (name, _) in assigns {
                state.vars.create_version(name, seq);
                pending.push((name.clone(), seq));
            }
        }
    }

    let node = GraphNode {
        command: Arc::new(spawn.tree),
        access,
        dependents: SmallVec::new(),
        unresolved: 0,
        parent: spawn.parent,
        nest: spawn.nest,
        iteration: spawn.iteration,
        seq,
        test_tail: spawn.test_tail,
        body_tail: spawn.body_tail,
        cancelled: false,
        frontier: None,
        registered: SmallVec::new(),
        pending,
    };
    let id = state.graph.insert(node);

    if let Some(pfid) = spawn.parent {
        if let Some(parent) = state.frontier.get_mut(pfid) {
            parent.active += 1;
            parent.children.push(id);
        }
    }

    let head = state.frontier.head();
    let unresolved = establish(state, id, head);
    if let Some(node) = state.graph.get_mut(id) {
        node.unresolved = unresolved;
    }
    state.log(SchedEvent::Admitted { seq, unresolved });
    if unresolved == 0 {
        frontier_add(state, id);
    }
    Ok(id)
}

/// Scans the frontier from `from` in insertion order and installs dependency
/// edges for `new`; returns the number of edges added.
///
/// The scan skips the new node's own ancestors (expanded children must not
/// wait on their compound) and stops once a dependency lands on a pending
/// loop: a loop with iterations in flight dominates every later access.
pub(crate) fn establish(state: &mut State, new: NodeId, from: Option<FrontId>) -> u32 {
    let Some(node) = state.graph.get(new) else { return 0 };
    let new_access = node.access.clone();
    let new_ctx = node.ctx();

    let mut added = 0;
    let mut visited: SmallVec<[NodeId; 16]> = SmallVec::new();
    let mut cur = from;
    while let Some(fid) = cur {
        let Some(front) = state.frontier.get(fid) else { break };
        let next = front.next;
        let target = front.node;
        let pending_loop = front.is_loop && !matches!(front.kind, Kind::Reduced);
        if target != new && !is_ancestor(state, fid, new) {
            let n = dep_add(state, new, &new_access, new_ctx, target, &mut visited);
            added += n;
            if n > 0 && pending_loop {
                break;
            }
        }
        cur = next;
    }
    added
}

/// Recursive edge installation per the first-write-collision rule.
///
/// The descent continues through dependents (and through the expanded
/// children of non-loop sentinels) even when `node` itself does not clash,
/// because a conflicting node may be reachable only through a
/// non-conflicting one. The deepest conflicting nodes receive the edges.
fn dep_add(
    state: &mut State,
    new: NodeId,
    new_access: &AccessSet,
    new_ctx: NodeCtx,
    node: NodeId,
    visited: &mut SmallVec<[NodeId; 16]>,
) -> u32 {
    if visited.contains(&node) {
        return 0;
    }
    visited.push(node);

    let Some(target) = state.graph.get(node) else { return 0 };
    if target.dependents.contains(&new) {
        return 0;
    }
    let clash = conflict(&target.access, target.ctx(), new_access, new_ctx);

    let mut downstream: SmallVec<[NodeId; 8]> = target.dependents.iter().copied().collect();
    if let Some(fid) = target.frontier {
        if let Some(front) = state.frontier.get(fid) {
            // Loop sentinels are opaque: later siblings serialize on the
            // loop itself, not on transient per-iteration children.
            if !front.is_loop && !matches!(front.kind, Kind::Leaf) {
                downstream.extend(front.children.iter().copied());
            }
        }
    }

    let mut sum = 0;
    for d in downstream {
        if d != new {
            sum += dep_add(state, new, new_access, new_ctx, d, visited);
        }
    }
    if sum == 0 && clash == Clash::WriteCollision {
        if let Some(target) = state.graph.get_mut(node) {
            target.dependents.push(new);
            return 1;
        }
    }
    sum
}

/// True when the frontier node `fid` is on `node`'s parent chain.
pub(crate) fn is_ancestor(state: &State, fid: FrontId, node: NodeId) -> bool {
    let mut cur = state.graph.get(node).and_then(|n| n.parent);
    while let Some(p) = cur {
        if p == fid {
            return true;
        }
        cur = state
            .frontier
            .get(p)
            .and_then(|f| state.graph.get(f.node))
            .and_then(|n| n.parent);
    }
    false
}
