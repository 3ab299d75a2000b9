//! The evaluator interface.
//!
//! The scheduler never runs a command itself: workers hand each dispatched
//! leaf to an [`Evaluate`] implementation together with a
//! [`VarAccess`](crate::scheduler::VarAccess) handle for resolving `$var`
//! references and publishing assignments. Pipelines arrive whole; their
//! internal plumbing is the evaluator's business.

use crate::command::CommandTree;
use crate::scheduler::VarAccess;

/// What the evaluator did with a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The command ran to completion with this exit status.
    Exit(i32),
    /// A variable lookup hit an unpublished version; the node has been
    /// parked and will be dispatched again after publication. The command
    /// must not have had observable effects yet.
    Blocked,
}

/// A command evaluator.
///
/// Implementations must resolve every `$var` reference through the supplied
/// access handle before acting (a `None` lookup means: return
/// [`Outcome::Blocked`] immediately), and publish each assignment of a
/// [`CommandTree::VarAssign`] node through [`VarAccess::publish`].
pub trait Evaluate: Send + Sync {
    /// Evaluates one dispatched command.
    fn eval(&self, command: &CommandTree, vars: &mut VarAccess<'_>) -> Outcome;
}
