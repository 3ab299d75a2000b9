//! Variable versioning: every assignment creates a fresh version, readers
//! bind to the newest version created before them, and readers of an
//! unpublished version wait on its writer specifically.
//!
//! Binding by intake sequence rather than by "current tail" is what makes a
//! read see exactly the lexically latest preceding write even when writers
//! and readers reach the evaluator out of order.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::logging::SchedEvent;

use super::frontier::{frontier_add, park};
use super::graph::{Graph, NodeId};
use super::State;

/// One published-or-pending value of a variable.
pub(crate) struct VarVersion {
    /// Intake sequence of the writing node; versions are ordered by it.
    pub seq: u64,
    /// The value, absent until the writer publishes.
    pub value: Option<String>,
    /// Readers that registered interest and have not yet completed.
    pub accessors: u32,
    /// Reader nodes blocked on publication.
    pub waiters: SmallVec<[NodeId; 2]>,
}

#[derive(Default)]
struct Variable {
    versions: Vec<VarVersion>,
}

/// The variable table.
#[derive(Default)]
pub(crate) struct VarTable {
    map: HashMap<String, Variable>,
}

impl VarTable {
    /// Appends a new empty version for `name`, owned by the writer at `seq`.
    pub fn create_version(&mut self, name: &str, seq: u64) {
        let var = self.map.entry(name.to_string()).or_default();
        debug_assert!(var.versions.last().map_or(true, |v| v.seq < seq));
        var.versions.push(VarVersion {
            seq,
            value: None,
            accessors: 0,
            waiters: SmallVec::new(),
        });
    }

    /// Total live versions across all variables (diagnostics).
    pub fn version_count(&self) -> usize {
        self.map.values().map(|v| v.versions.len()).sum()
    }

    /// The newest published value of `name`, empty when unset. Used by
    /// off-graph (builtin) evaluation, which never blocks.
    pub fn peek(&self, name: &str) -> String {
        self.map
            .get(name)
            .and_then(|var| var.versions.iter().rev().find_map(|v| v.value.clone()))
            .unwrap_or_default()
    }

    /// Drops the whole table; used at end-of-session quiescence.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Reclaims superseded versions of `name`: published, reader-free, not
    /// the newest, and not bindable by any node still in the graph.
    ///
    /// The last clause matters because readers bind by intake order: a node
    /// admitted between two writes still resolves to the older version even
    /// if it has not looked the variable up yet.
    pub(crate) fn reclaim(&mut self, name: &str, graph: &Graph) {
        let Some(var) = self.map.get_mut(name) else { return };
        if var.versions.len() < 2 {
            return;
        }
        let next_seqs: Vec<u64> = var.versions.iter().skip(1).map(|v| v.seq).collect();
        let mut idx = 0;
        var.versions.retain(|v| {
            let keep = match next_seqs.get(idx) {
                // A node with seq in (v.seq, next.seq] would still bind v.
                Some(&next) => {
                    v.value.is_none() || v.accessors > 0 || graph.any_seq_between(v.seq, next)
                }
                None => true,
            };
            idx += 1;
            keep
        });
    }
}

/// Result of a variable lookup on behalf of a dispatched node.
pub(crate) enum Lookup {
    /// The value (empty for an unset variable); the reader was registered
    /// as an accessor of the version it read.
    Ready(String),
    /// The binding version is unpublished; the reader has been parked and
    /// will re-enter the frontier when the writer publishes.
    Blocked,
}

/// Resolves `name` for the reader `node`, per its intake position.
pub(crate) fn lookup(state: &mut State, node: NodeId, name: &str) -> Lookup {
    let Some(n) = state.graph.get(node) else {
        return Lookup::Ready(String::new());
    };
    let reader_seq = n.seq;
    let already = n.registered.iter().any(|(rn, _)| rn == name);

    let Some(var) = state.vars.map.get_mut(name) else {
        return Lookup::Ready(String::new());
    };
    let Some(pos) = var.versions.iter().rposition(|v| v.seq < reader_seq) else {
        return Lookup::Ready(String::new());
    };

    let vseq = var.versions[pos].seq;
    match var.versions[pos].value.clone() {
        Some(value) => {
            if !already {
                var.versions[pos].accessors += 1;
                if let Some(n) = state.graph.get_mut(node) {
                    n.registered.push((name.to_string(), vseq));
                }
            }
            Lookup::Ready(value)
        }
        None => {
            if !already {
                var.versions[pos].accessors += 1;
                var.versions[pos].waiters.push(node);
                if let Some(n) = state.graph.get_mut(node) {
                    n.registered.push((name.to_string(), vseq));
                    n.unresolved += 1;
                }
                park(state, node, name);
            }
            Lookup::Blocked
        }
    }
}

/// Publishes the version owned by `node` for `name`, releasing its waiters
/// onto the frontier. Returns false when the node owns no such pending
/// version.
pub(crate) fn publish(state: &mut State, node: NodeId, name: &str, value: String) -> bool {
    let Some(n) = state.graph.get_mut(node) else { return false };
    let Some(pos) = n.pending.iter().position(|(pn, _)| pn == name) else {
        return false;
    };
    let (_, vseq) = n.pending.remove(pos);

    let mut released: SmallVec<[NodeId; 2]> = SmallVec::new();
    if let Some(var) = state.vars.map.get_mut(name) {
        if let Some(version) = var.versions.iter_mut().find(|v| v.seq == vseq) {
            version.value = Some(value);
            released = std::mem::take(&mut version.waiters);
        }
    }
    state.log(SchedEvent::Published { var: name.to_string(), released: released.len() });
    for waiter in released {
        let ready = match state.graph.get_mut(waiter) {
            Some(w) if w.unresolved > 0 => {
                w.unresolved -= 1;
                w.unresolved == 0
            }
            _ => false,
        };
        if ready {
            frontier_add(state, waiter);
        }
    }
    state.vars.reclaim(name, &state.graph);
    true
}

/// Completion-side bookkeeping: releases the node's reader registrations
/// and retracts any version it never published.
pub(crate) fn release_node(state: &mut State, node: NodeId) {
    let Some(n) = state.graph.get_mut(node) else { return };
    let registered = std::mem::take(&mut n.registered);
    let pending = std::mem::take(&mut n.pending);

    for (name, vseq) in registered {
        if let Some(var) = state.vars.map.get_mut(&name) {
            if let Some(version) = var.versions.iter_mut().find(|v| v.seq == vseq) {
                version.accessors = version.accessors.saturating_sub(1);
            }
        }
        state.vars.reclaim(&name, &state.graph);
    }
    for (name, vseq) in pending {
        retract(state, &name, vseq);
    }
}

/// Removes an unpublished version whose writer died (cancelled, or completed
/// without publishing), rebinding its waiters to the predecessor version.
fn retract(state: &mut State, name: &str, vseq: u64) {
    let Some(var) = state.vars.map.get_mut(name) else { return };
    let Some(pos) = var.versions.iter().position(|v| v.seq == vseq) else {
        return;
    };
    let dead = var.versions.remove(pos);
    if var.versions.is_empty() {
        state.vars.map.remove(name);
    }

    for waiter in dead.waiters {
        // Rebind against the surviving list; an unpublished predecessor
        // keeps the waiter parked, anything else releases it.
        let mut blocked = false;
        let mut new_seq = None;
        if let Some(var) = state.vars.map.get_mut(name) {
            if let Some(version) = var.versions.iter_mut().rev().find(|v| v.seq < vseq) {
                version.accessors += 1;
                new_seq = Some(version.seq);
                if version.value.is_none() {
                    version.waiters.push(waiter);
                    blocked = true;
                }
            }
        }
        let ready = match state.graph.get_mut(waiter) {
            Some(w) => {
                match new_seq {
                    Some(ns) => {
                        if let Some(entry) =
                            w.registered.iter_mut().find(|(rn, rs)| rn == name && *rs == vseq)
                        {
                            entry.1 = ns;
                        }
                    }
                    None => w.registered.retain(|(rn, rs)| !(rn == name && *rs == vseq)),
                }
                if !blocked && w.unresolved > 0 {
                    w.unresolved -= 1;
                    w.unresolved == 0
                } else {
                    false
                }
            }
            None => false,
        };
        if ready {
            frontier_add(state, waiter);
        }
    }
}
