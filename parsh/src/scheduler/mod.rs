//! The scheduler: one lock around the dependency graph, the frontier, and
//! the variable table, with a condition variable gating worker pulls.
//!
//! Public methods lock once; every internal transition is a plain call on
//! the locked state, and expansion follow-ups (test results, drained
//! sentinels) go through an explicit queue drained before the lock is
//! released. That queue is what keeps completion → expansion → admission
//! chains iterative instead of reentrant.

mod cancel;
mod expand;
mod frontier;
mod graph;
mod vars;

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use smallvec::SmallVec;

use crate::command::CommandTree;
use crate::error::Error;
use crate::intake;
use crate::logging::{Logger, SchedEvent};

use frontier::{frontier_add, Frontier, Kind};
use graph::{Graph, NodeId, Spawn};
use vars::VarTable;

/// Deferred work generated inside the lock and drained before release.
pub(crate) enum Followup {
    /// A compound's test tail reported a status.
    TestStatus(frontier::FrontId, i32),
    /// A sentinel's child count reached zero.
    SentinelDone(frontier::FrontId),
}

/// How a node left the graph.
pub(crate) enum Done {
    /// Ran (or was reaped in place) and reports its status.
    Normal,
    /// Pruned by cancellation; no status propagation.
    Cancelled,
}

/// Everything the scheduler lock protects.
pub(crate) struct State {
    pub graph: Graph,
    pub frontier: Frontier,
    pub vars: VarTable,
    pub followups: VecDeque<Followup>,
    pub seq: u64,
    pub eof: bool,
    pub logger: Option<Logger>,
}

impl State {
    pub(crate) fn log(&self, event: SchedEvent) {
        if let Some(logger) = &self.logger {
            logger.log(event);
        }
    }
}

/// Removes a finished (or pruned) node from the graph: propagates its
/// status to the enclosing compound, releases its dependents, settles its
/// variable registrations, and detaches it from its parent sentinel.
pub(crate) fn complete_node(state: &mut State, id: NodeId, status: i32, how: Done) {
    let Some(node) = state.graph.get(id) else { return };
    let cancelled = node.cancelled || matches!(how, Done::Cancelled);
    let directive = node.is_directive();
    let seq = node.seq;
    let test_tail = node.test_tail;
    let body_tail = node.body_tail;
    let parent = node.parent;

    if directive && !cancelled {
        cancel::on_directive(state, id);
    }
    if !cancelled {
        if test_tail {
            if let Some(p) = parent {
                state.followups.push_back(Followup::TestStatus(p, status));
            }
        }
        if body_tail {
            if let Some(p) = parent {
                if let Some(front) = state.frontier.get_mut(p) {
                    front.status = status;
                }
            }
        }
    }

    let deps: SmallVec<[NodeId; 4]> = match state.graph.get_mut(id) {
        Some(n) => std::mem::take(&mut n.dependents),
        None => return,
    };
    for dep in deps {
        let ready = match state.graph.get_mut(dep) {
            Some(d) if d.unresolved > 0 => {
                d.unresolved -= 1;
                d.unresolved == 0
            }
            _ => false,
        };
        if ready {
            frontier_add(state, dep);
        }
    }

    vars::release_node(state, id);

    if let Some(fid) = state.graph.get(id).and_then(|n| n.frontier) {
        state.frontier.remove(fid);
    }
    if let Some(p) = parent {
        let mut drained = false;
        if let Some(front) = state.frontier.get_mut(p) {
            front.children.retain(|c| *c != id);
            front.active = front.active.saturating_sub(1);
            drained = front.active == 0;
        }
        if drained {
            state.followups.push_back(Followup::SentinelDone(p));
        }
    }
    state.graph.remove(id);
    state.log(SchedEvent::Completed { seq, status });
}

/// Drains deferred follow-ups, then performs end-of-session cleanup once
/// the graph has emptied after EOF.
pub(crate) fn drain(state: &mut State) {
    while let Some(task) = state.followups.pop_front() {
        match task {
            Followup::TestStatus(fid, status) => expand::on_test_status(state, fid, status),
            Followup::SentinelDone(fid) => expand::sentinel_done(state, fid),
        }
    }
    if state.eof && state.graph.len() == 0 {
        state.vars.clear();
    }
}

/// What `submit` did with a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    /// Everything went onto the graph.
    Queued,
    /// These builtin commands bypass the graph; the caller evaluates them
    /// synchronously.
    Builtins(Vec<CommandTree>),
    /// The tree was the EOF marker.
    Eof,
}

/// Result of a blocking [`Scheduler::pull`].
pub enum Pulled {
    /// A command to evaluate.
    Work(WorkItem),
    /// Input is exhausted and the graph has drained; the worker may exit.
    Eof,
}

/// Opaque completion token for a dispatched command.
pub struct Ticket {
    node: NodeId,
}

/// A dispatched command and its completion token.
pub struct WorkItem {
    command: Arc<CommandTree>,
    ticket: Ticket,
}

impl WorkItem {
    /// The command to evaluate.
    pub fn command(&self) -> &CommandTree {
        &self.command
    }

    /// Surrenders the completion token.
    pub fn into_ticket(self) -> Ticket {
        self.ticket
    }
}

/// Point-in-time scheduler occupancy, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedStats {
    /// Live graph nodes.
    pub nodes: usize,
    /// Seated frontier nodes.
    pub frontier: usize,
    /// Live variable versions.
    pub versions: usize,
}

/// The parallel command scheduler.
pub struct Scheduler {
    state: Mutex<State>,
    ready: Condvar,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// A scheduler with empty tables and no event logging.
    pub fn new() -> Self {
        Self::with_logger(None)
    }

    /// A scheduler reporting scheduling events to `logger`.
    pub fn with_logger(logger: Option<Logger>) -> Self {
        Scheduler {
            state: Mutex::new(State {
                graph: Graph::default(),
                frontier: Frontier::default(),
                vars: VarTable::default(),
                followups: VecDeque::new(),
                seq: 0,
                eof: false,
                logger,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("scheduler state poisoned")
    }

    /// Intakes one parsed tree: flattens top-level `;` chains, wraps each
    /// command in its scheduling shape, and admits it to the graph.
    ///
    /// Builtin commands (`cd`, `exit`) are returned instead of queued, and
    /// an EOF marker arms end-of-input. A malformed command inside the tree
    /// is skipped and reported; its siblings still go in.
    pub fn submit(&self, tree: CommandTree) -> Result<Submitted, Error> {
        let mut builtins = Vec::new();
        let mut first_err = None;
        let mut saw_eof = false;
        {
            let mut state = self.lock();
            for item in intake::split(tree) {
                match item {
                    intake::Item::Eof => {
                        state.eof = true;
                        state.log(SchedEvent::Eof);
                        saw_eof = true;
                    }
                    intake::Item::Builtin(t) => builtins.push(t),
                    intake::Item::Command(t) => {
                        let spawn = Spawn {
                            tree: t,
                            parent: None,
                            nest: 0,
                            iteration: 0,
                            test_tail: false,
                            body_tail: false,
                        };
                        if let Err(e) = graph::admit(&mut state, spawn) {
                            first_err.get_or_insert(e);
                        }
                    }
                }
            }
            drain(&mut state);
        }
        self.ready.notify_all();
        match first_err {
            Some(e) => Err(e),
            None if !builtins.is_empty() => Ok(Submitted::Builtins(builtins)),
            None if saw_eof => Ok(Submitted::Eof),
            None => Ok(Submitted::Queued),
        }
    }

    /// Arms end-of-input without a marker tree.
    pub fn eof(&self) {
        {
            let mut state = self.lock();
            state.eof = true;
            state.log(SchedEvent::Eof);
            drain(&mut state);
        }
        self.ready.notify_all();
    }

    /// Blocks until a command is dispatchable or the stream has drained.
    ///
    /// `break`/`continue` directives and cancelled nodes reaching the
    /// dispatch cursor are reaped in place and never returned.
    pub fn pull(&self) -> Pulled {
        let mut state = self.lock();
        loop {
            let mut reaped = false;
            while let Some(fid) = state.frontier.run_next {
                let (next, nid, kind) = match state.frontier.get(fid) {
                    Some(front) => (front.next, front.node, front.kind),
                    None => {
                        state.frontier.run_next = None;
                        continue;
                    }
                };
                state.frontier.run_next = next;
                if kind != Kind::Leaf {
                    // Sentinels keep their seat for accounting; they are
                    // never evaluated.
                    continue;
                }
                let Some(node) = state.graph.get(nid) else { continue };
                if node.cancelled || node.is_directive() {
                    complete_node(&mut state, nid, 0, Done::Normal);
                    drain(&mut state);
                    reaped = true;
                    continue;
                }
                debug_assert_eq!(node.unresolved, 0, "dispatching an unresolved node");
                let command = Arc::clone(&node.command);
                let seq = node.seq;
                if let Some(front) = state.frontier.get_mut(fid) {
                    front.running = true;
                }
                state.log(SchedEvent::Dispatched { seq });
                drop(state);
                if reaped {
                    self.ready.notify_all();
                }
                return Pulled::Work(WorkItem { command, ticket: Ticket { node: nid } });
            }
            if reaped {
                // Reaping may have freed dependents for other workers.
                self.ready.notify_all();
            }
            if state.eof && state.graph.len() == 0 {
                drop(state);
                self.ready.notify_all();
                return Pulled::Eof;
            }
            state = self.ready.wait(state).expect("scheduler state poisoned");
        }
    }

    /// Reports the completion of a dispatched command.
    ///
    /// A completion for a node cancelled mid-flight is reaped without
    /// status propagation, but runs the normal removal path.
    pub fn complete(&self, ticket: Ticket, status: i32) {
        {
            let mut state = self.lock();
            complete_node(&mut state, ticket.node, status, Done::Normal);
            drain(&mut state);
        }
        self.ready.notify_all();
    }

    /// Variable access handle for a dispatched command (evaluator side).
    pub fn var_access(&self, work: &WorkItem) -> VarAccess<'_> {
        VarAccess { sched: self, node: Some(work.ticket.node) }
    }

    /// Variable access for off-graph (builtin) evaluation: lookups see the
    /// newest published values and never block.
    pub fn detached_access(&self) -> VarAccess<'_> {
        VarAccess { sched: self, node: None }
    }

    /// Current occupancy; everything is zero after EOF quiescence.
    pub fn stats(&self) -> SchedStats {
        let state = self.lock();
        SchedStats {
            nodes: state.graph.len(),
            frontier: state.frontier.len(),
            versions: state.vars.version_count(),
        }
    }
}

/// Evaluator-side variable resolution for one dispatched command.
///
/// Lookups bind the reader to the newest version created before it in
/// intake order. A lookup that hits an unpublished version parks the node
/// and returns `None`; the evaluator should bail out with
/// [`Outcome::Blocked`](crate::eval::Outcome::Blocked) — publication will
/// put the node back on the frontier for a fresh dispatch.
pub struct VarAccess<'a> {
    sched: &'a Scheduler,
    node: Option<NodeId>,
}

impl VarAccess<'_> {
    /// Resolves `name`, registering the read. `None` means the node now
    /// waits on the writer; an unset variable reads as the empty string.
    pub fn lookup(&mut self, name: &str) -> Option<String> {
        match self.node {
            Some(id) => {
                let mut state = self.sched.lock();
                match vars::lookup(&mut state, id, name) {
                    vars::Lookup::Ready(value) => Some(value),
                    vars::Lookup::Blocked => None,
                }
            }
            None => {
                let state = self.sched.lock();
                Some(state.vars.peek(name))
            }
        }
    }

    /// Publishes this node's pending version of `name`, waking readers.
    /// Returns false when the node owns no pending version for `name`.
    pub fn publish(&mut self, name: &str, value: impl Into<String>) -> bool {
        let Some(id) = self.node else { return false };
        let published;
        {
            let mut state = self.sched.lock();
            published = vars::publish(&mut state, id, name, value.into());
            drain(&mut state);
        }
        self.sched.ready.notify_all();
        published
    }
}
