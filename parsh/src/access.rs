//! Static read/write analysis of command trees.
//!
//! Every command entering the graph is reduced to an [`AccessSet`]: the file
//! paths it reads and writes, the variables it assigns, and any
//! `break`/`continue` directives that can escape it. Dependency edges are
//! derived exclusively from intersections of these sets, so the analysis is
//! deliberately conservative: argument words are never scanned, and
//! redirection targets are compared literally.

use itertools::iproduct;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::command::{CommandTree, RedirTarget, Redirect};
use crate::error::Error;

/// Prefix distinguishing variable pseudo-paths from file paths.
///
/// Writing variable effects as `"$" || name` lets one conflict check order
/// both file and variable accesses; a file named `foo` can never collide
/// with a variable `foo`.
pub const VAR_SIGIL: char = '$';

/// One analyzed effect.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// The named path (or `$var` pseudo-path) is read.
    Read(String),
    /// The named path (or `$var` pseudo-path) is written.
    Write(String),
    /// A `break` escaping `levels` enclosing loops.
    Break {
        /// Loop levels the directive still escapes, counted from the
        /// carrying node outward. Always at least 1.
        levels: u32,
    },
    /// A `continue` targeting the `levels`-th enclosing loop.
    Continue {
        /// See [`Access::Break::levels`].
        levels: u32,
    },
}

impl Access {
    fn name(&self) -> Option<&str> {
        match self {
            Access::Read(n) | Access::Write(n) => Some(n),
            _ => None,
        }
    }

    fn is_write(&self) -> bool {
        matches!(self, Access::Write(_))
    }
}

/// The effect set of one command tree.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessSet {
    entries: SmallVec<[Access; 4]>,
}

/// Scheduling context of the node carrying an access set.
///
/// Directive entries compare against loop coordinates rather than names, so
/// the conflict check needs to know where each side sits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeCtx {
    /// Static loop-nesting depth; top level is 0, the body of a top-level
    /// loop is 1.
    pub nest: u32,
    /// Iteration counter of the innermost enclosing loop at creation time.
    pub iteration: u64,
}

/// Outcome of intersecting two access sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Clash {
    /// Disjoint effects; the commands may run concurrently.
    None,
    /// Shared names, all reads; readers run in parallel, no edge.
    ConcurrentRead,
    /// At least one side writes a shared name (or a directive serializes);
    /// the later command must wait.
    WriteCollision,
}

impl AccessSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the set carries no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries, in emission order.
    pub fn entries(&self) -> &[Access] {
        &self.entries
    }

    fn push_unique(&mut self, access: Access) {
        if !self.entries.contains(&access) {
            self.entries.push(access);
        }
    }

    /// Unions `other` into `self`, dropping duplicates.
    pub(crate) fn union(&mut self, other: AccessSet) {
        for entry in other.entries {
            self.push_unique(entry);
        }
    }

    /// Unions `other` into `self` across a loop boundary: names pass
    /// through, directives lose one escape level and are dropped once
    /// contained.
    fn absorb_loop_body(&mut self, other: AccessSet) {
        for entry in other.entries {
            match entry {
                Access::Break { levels } if levels > 1 => {
                    self.push_unique(Access::Break { levels: levels - 1 })
                }
                Access::Continue { levels } if levels > 1 => {
                    self.push_unique(Access::Continue { levels: levels - 1 })
                }
                Access::Break { .. } | Access::Continue { .. } => {}
                named => self.push_unique(named),
            }
        }
    }

    fn has_directive(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, Access::Break { .. } | Access::Continue { .. }))
    }
}

/// Derives the access set of `tree`.
///
/// The analysis is pure: the same tree always yields the same set.
///
/// # Examples
///
/// ```
/// use parsh::access::{analyze, Access};
/// use parsh::command::{CommandTree, RedirKind};
///
/// let cmd = CommandTree::simple(["grep", "-q", "foo", "a"]).redirect(RedirKind::In, "a");
/// let set = analyze(&cmd).unwrap();
/// assert_eq!(set.entries(), [Access::Read("a".to_string())]);
/// ```
pub fn analyze(tree: &CommandTree) -> Result<AccessSet, Error> {
    let mut set = AccessSet::new();
    walk(tree, &mut set)?;
    Ok(set)
}

fn redirect_access(redirect: &Redirect, set: &mut AccessSet) -> Result<(), Error> {
    match &redirect.target {
        RedirTarget::File(name) => {
            if name.is_empty() {
                return Err(Error::Malformed("redirection without a target"));
            }
            if redirect.kind.writes() {
                set.push_unique(Access::Write(name.clone()));
            } else {
                set.push_unique(Access::Read(name.clone()));
            }
        }
        // Descriptor duplication shuffles already-open streams; no file
        // effect the scheduler can name.
        RedirTarget::Fd(_) => {}
    }
    Ok(())
}

fn var_path(name: &str) -> String {
    let mut path = String::with_capacity(name.len() + 1);
    path.push(VAR_SIGIL);
    path.push_str(name);
    path
}

fn walk(tree: &CommandTree, set: &mut AccessSet) -> Result<(), Error> {
    match tree {
        CommandTree::Simple { redirects, .. } => {
            for r in redirects {
                redirect_access(r, set)?;
            }
        }
        CommandTree::VarAssign(inner) => {
            let CommandTree::Simple { assigns, redirects, .. } = inner.as_ref() else {
                return Err(Error::Malformed("assignment wrapper around a non-simple command"));
            };
            if assigns.is_empty() {
                return Err(Error::Malformed("assignment wrapper without assignments"));
            }
            for (name, _) in assigns {
                set.push_unique(Access::Write(var_path(name)));
            }
            for r in redirects {
                redirect_access(r, set)?;
            }
        }
        CommandTree::Background { inner, redirects } => {
            for r in redirects {
                redirect_access(r, set)?;
            }
            walk(inner, set)?;
        }
        CommandTree::Semi(a, b) | CommandTree::And(a, b) | CommandTree::Or(a, b) => {
            walk(a, set)?;
            walk(b, set)?;
        }
        CommandTree::Not(inner) => walk(inner, set)?,
        CommandTree::Pipe(parts) => {
            for part in parts {
                walk(part, set)?;
            }
        }
        CommandTree::If { test, then, orelse } => {
            walk(test, set)?;
            walk(then, set)?;
            if let Some(orelse) = orelse {
                walk(orelse, set)?;
            }
        }
        CommandTree::While { test, body } | CommandTree::Until { test, body } => {
            walk(test, set)?;
            let mut inner = AccessSet::new();
            walk(body, &mut inner)?;
            set.absorb_loop_body(inner);
        }
        CommandTree::For { var, body, .. } => {
            if var.is_empty() {
                return Err(Error::Malformed("for loop without a variable"));
            }
            set.push_unique(Access::Write(var_path(var)));
            let mut inner = AccessSet::new();
            walk(body, &mut inner)?;
            set.absorb_loop_body(inner);
        }
        CommandTree::Break(levels) => {
            set.push_unique(Access::Break { levels: levels.unwrap_or(1).max(1) })
        }
        CommandTree::Continue(levels) => {
            set.push_unique(Access::Continue { levels: levels.unwrap_or(1).max(1) })
        }
        CommandTree::Redir { redirect, next } => {
            redirect_access(redirect, set)?;
            walk(next, set)?;
        }
        CommandTree::Eof => return Err(Error::Malformed("eof marker inside a command")),
    }
    Ok(())
}

/// Accesses contributed by `Redir` (and `Not`) wrappers around a construct,
/// stopping at the first non-wrapper node.
///
/// A wrapping redirection belongs to the compound node itself, never to an
/// expanded child, so a sentinel that narrows its access to a branch must
/// union these back in.
pub(crate) fn wrapper_access(tree: &CommandTree) -> AccessSet {
    let mut set = AccessSet::new();
    let mut cur = tree;
    loop {
        match cur {
            CommandTree::Redir { redirect, next } => {
                let _ = redirect_access(redirect, &mut set);
                cur = next;
            }
            CommandTree::Not(inner) => cur = inner,
            _ => return set,
        }
    }
}

/// The body nest a directive entry targets, given its carrier's nest.
///
/// A directive at body depth `n` escaping `levels` loops targets the loop
/// whose body sits at depth `n - levels + 1`, floored at the outermost body.
pub(crate) fn directive_target(carrier_nest: u32, levels: u32) -> u32 {
    carrier_nest.saturating_sub(levels.saturating_sub(1)).max(1)
}

fn directive_clash(
    entry: &Access,
    carrier: NodeCtx,
    other: &AccessSet,
    other_ctx: NodeCtx,
) -> bool {
    // A directive outside any loop is inert.
    if carrier.nest == 0 || other.is_empty() {
        return false;
    }
    let target = match entry {
        Access::Break { levels } => directive_target(carrier.nest, *levels),
        Access::Continue { levels } => directive_target(carrier.nest, *levels),
        _ => return false,
    };
    if other_ctx.nest < target {
        return false;
    }
    match entry {
        Access::Continue { .. } => other_ctx.iteration == carrier.iteration,
        Access::Break { .. } => other_ctx.iteration >= carrier.iteration,
        _ => false,
    }
}

/// Classifies the conflict between two scheduled commands.
///
/// `a` is the already-present node, `b` the one being added. Shared names
/// clash as [`Clash::WriteCollision`] when either side writes, otherwise as
/// [`Clash::ConcurrentRead`]. Directive entries on either side serialize
/// against loop-body members of the targeted nest and iteration.
pub fn conflict(a: &AccessSet, a_ctx: NodeCtx, b: &AccessSet, b_ctx: NodeCtx) -> Clash {
    let mut clash = Clash::None;
    for (ea, eb) in iproduct!(a.entries(), b.entries()) {
        let (Some(name_a), Some(name_b)) = (ea.name(), eb.name()) else {
            continue;
        };
        if name_a != name_b {
            continue;
        }
        if ea.is_write() || eb.is_write() {
            return Clash::WriteCollision;
        }
        clash = clash.max(Clash::ConcurrentRead);
    }
    if b.has_directive() {
        for eb in b.entries() {
            if directive_clash(eb, b_ctx, a, a_ctx) {
                return Clash::WriteCollision;
            }
        }
    }
    if a.has_directive() {
        for ea in a.entries() {
            if directive_clash(ea, a_ctx, b, b_ctx) {
                return Clash::WriteCollision;
            }
        }
    }
    clash
}
