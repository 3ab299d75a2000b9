//! The frontier: the ordered set of graph nodes whose predecessors have all
//! completed, and the dispatch cursor worker threads pull from.

use smallvec::SmallVec;

use crate::command::CommandTree;
use crate::logging::SchedEvent;

use super::expand;
use super::graph::NodeId;
use super::State;

/// Generational handle to a frontier position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrontId {
    idx: u32,
    gen: u32,
}

/// Semantic role of a frontier node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    /// A plain dispatchable command.
    Leaf,
    /// `a && b` awaiting its left status.
    And,
    /// `a || b` awaiting its left status.
    Or,
    /// `if` awaiting its test status.
    If,
    /// `while` loop sentinel.
    While,
    /// `until` loop sentinel.
    Until,
    /// `for` loop sentinel.
    For,
    /// A compound whose final expansion happened; it completes when its
    /// remaining children drain.
    Reduced,
}

/// A node's seat at the frontier.
///
/// For compounds the seat doubles as the sentinel: parent of the expanded
/// children for accounting, and placeholder in the frontier so later
/// siblings serialize against the body's access set.
pub(crate) struct FrontierNode {
    /// The graph node seated here.
    pub node: NodeId,
    /// Role for the expander.
    pub kind: Kind,
    /// Whether this sentinel was created for a loop (survives retyping).
    pub is_loop: bool,
    /// Invert the compound's final status (`!` wrapper).
    pub negate: bool,
    /// Spawned children still alive.
    pub active: u32,
    /// Last observed status of interest (test result, then body result).
    pub status: i32,
    /// For loops: the current iteration counter, stamped onto body children.
    pub iteration: u64,
    /// For `for` loops: index of the next word to bind.
    pub for_index: usize,
    /// The loop's test segment expanded to nothing; iterate on body tails.
    pub test_empty: bool,
    /// Handed to a worker and not yet completed.
    pub running: bool,
    /// Pulled back off dispatch to wait for a variable publication.
    pub parked: bool,
    /// Expanded children (owning parent→child edge).
    pub children: SmallVec<[NodeId; 4]>,
    /// Previous seat in frontier order.
    pub prev: Option<FrontId>,
    /// Next seat in frontier order.
    pub next: Option<FrontId>,
}

struct Slot {
    gen: u32,
    node: Option<FrontierNode>,
}

/// The frontier list and its dispatch cursor.
#[derive(Default)]
pub(crate) struct Frontier {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
    head: Option<FrontId>,
    tail: Option<FrontId>,
    /// Next seat not yet examined for dispatch; `None` when the cursor ran
    /// off the tail.
    pub run_next: Option<FrontId>,
}

impl Frontier {
    pub fn get(&self, id: FrontId) -> Option<&FrontierNode> {
        let slot = self.slots.get(id.idx as usize)?;
        if slot.gen != id.gen {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn get_mut(&mut self, id: FrontId) -> Option<&mut FrontierNode> {
        let slot = self.slots.get_mut(id.idx as usize)?;
        if slot.gen != id.gen {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn head(&self) -> Option<FrontId> {
        self.head
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn insert(&mut self, node: FrontierNode) -> FrontId {
        self.len += 1;
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.node = Some(node);
            FrontId { idx, gen: slot.gen }
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Slot { gen: 0, node: Some(node) });
            FrontId { idx, gen: 0 }
        }
    }

    fn link_tail(&mut self, id: FrontId) {
        let old_tail = self.tail;
        if let Some(node) = self.get_mut(id) {
            node.prev = old_tail;
            node.next = None;
        }
        if let Some(t) = old_tail {
            if let Some(tn) = self.get_mut(t) {
                tn.next = Some(id);
            }
        } else {
            self.head = Some(id);
        }
        self.tail = Some(id);
        if self.run_next.is_none() {
            self.run_next = Some(id);
        }
    }

    fn unlink(&mut self, id: FrontId) {
        let (prev, next) = match self.get(id) {
            Some(n) => (n.prev, n.next),
            None => return,
        };
        if self.run_next == Some(id) {
            self.run_next = next;
        }
        match prev {
            Some(p) => {
                if let Some(pn) = self.get_mut(p) {
                    pn.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(nn) = self.get_mut(nx) {
                    nn.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(n) = self.get_mut(id) {
            n.prev = None;
            n.next = None;
        }
    }

    /// Unlinks and frees the seat.
    pub fn remove(&mut self, id: FrontId) {
        self.unlink(id);
        if let Some(slot) = self.slots.get_mut(id.idx as usize) {
            if slot.gen == id.gen && slot.node.take().is_some() {
                slot.gen = slot.gen.wrapping_add(1);
                self.free.push(id.idx);
                self.len -= 1;
            }
        }
    }
}

fn classify(tree: &CommandTree) -> (Kind, bool) {
    let (core, negate) = tree.peel();
    let kind = match core {
        CommandTree::And(..) => Kind::And,
        CommandTree::Or(..) => Kind::Or,
        CommandTree::If { .. } => Kind::If,
        CommandTree::While { .. } => Kind::While,
        CommandTree::Until { .. } => Kind::Until,
        CommandTree::For { .. } => Kind::For,
        _ => Kind::Leaf,
    };
    (kind, negate)
}

/// Seats a ready node at the frontier tail.
///
/// A node parked on a variable version is re-seated at the tail instead of
/// being recreated. A compound gets its sentinel installed and its test
/// segment expanded on the spot.
pub(crate) fn frontier_add(state: &mut State, node: NodeId) {
    let Some(n) = state.graph.get(node) else { return };
    debug_assert_eq!(n.unresolved, 0, "frontier_add of an unresolved node");

    if let Some(fid) = n.frontier {
        // Waking from a variable park: back to the dispatch queue.
        state.frontier.unlink(fid);
        state.frontier.link_tail(fid);
        if let Some(f) = state.frontier.get_mut(fid) {
            f.parked = false;
        }
        return;
    }

    let (kind, negate) = classify(&n.command);
    let is_loop = matches!(kind, Kind::While | Kind::Until | Kind::For);
    let fid = state.frontier.insert(FrontierNode {
        node,
        kind,
        is_loop,
        negate,
        active: 0,
        status: 0,
        iteration: 0,
        for_index: 0,
        test_empty: false,
        running: false,
        parked: false,
        children: SmallVec::new(),
        prev: None,
        next: None,
    });
    state.frontier.link_tail(fid);
    if let Some(n) = state.graph.get_mut(node) {
        n.frontier = Some(fid);
    }
    if kind != Kind::Leaf {
        expand::activate(state, fid);
    }
}

/// Parks a dispatched node that must wait for a variable publication: it
/// stays seated (so later conflict scans still see it) but leaves the
/// dispatch path until `publish` re-adds it.
pub(crate) fn park(state: &mut State, node: NodeId, var: &str) {
    let Some(n) = state.graph.get(node) else { return };
    let seq = n.seq;
    if let Some(fid) = n.frontier {
        if let Some(f) = state.frontier.get_mut(fid) {
            f.running = false;
            f.parked = true;
        }
    }
    state.log(SchedEvent::Reparked { seq, var: var.to_string() });
}
