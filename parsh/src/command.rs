//! Parsed command trees, the input handed over by the parser.
//!
//! The scheduler never interprets argument words; it cares about the variant
//! tag of each node, about redirections (the file-level effects), and about
//! assignments (the variable-level effects). Everything else is opaque
//! payload for the evaluator.

use serde::{Deserialize, Serialize};

/// The direction and mode of a single redirection.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirKind {
    /// `< file`
    In,
    /// `> file`
    Out,
    /// `>> file`
    Append,
    /// `>| file`
    Clobber,
}

impl RedirKind {
    /// True for redirections that write their target.
    pub fn writes(self) -> bool {
        !matches!(self, RedirKind::In)
    }
}

/// Where a redirection points.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum RedirTarget {
    /// A file path, compared literally (a `$var` in the name stays literal).
    File(String),
    /// A file descriptor, e.g. `2>&1`. Not a file-level effect.
    Fd(i32),
}

/// One redirection attached to a command.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Mode of the redirection.
    pub kind: RedirKind,
    /// Its target.
    pub target: RedirTarget,
}

impl Redirect {
    /// A redirection to a named file.
    pub fn file(kind: RedirKind, name: impl Into<String>) -> Self {
        Redirect { kind, target: RedirTarget::File(name.into()) }
    }
}

/// A parsed command, in the shape the parser delivers it.
///
/// Trees are built by the parser and consumed by the scheduler; the
/// constructors below exist so tests and embedders can assemble trees
/// without a parser.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum CommandTree {
    /// An external command with optional leading assignments and redirections.
    Simple {
        /// Argument words, `args[0]` being the command name.
        args: Vec<String>,
        /// Leading `name=value` assignments, local to this command.
        assigns: Vec<(String, String)>,
        /// Redirections applied to this command.
        redirects: Vec<Redirect>,
    },
    /// A command launched without waiting, `inner &`.
    Background {
        /// The command run in the background.
        inner: Box<CommandTree>,
        /// Redirections applied to the whole background job.
        redirects: Vec<Redirect>,
    },
    /// A `Simple` consisting only of assignments; its completion publishes
    /// the assigned variable versions.
    VarAssign(Box<CommandTree>),
    /// `a | b | c`; internal data-flow is the evaluator's business.
    Pipe(Vec<CommandTree>),
    /// `a ; b`
    Semi(Box<CommandTree>, Box<CommandTree>),
    /// `a && b`
    And(Box<CommandTree>, Box<CommandTree>),
    /// `a || b`
    Or(Box<CommandTree>, Box<CommandTree>),
    /// `! a`
    Not(Box<CommandTree>),
    /// `if test; then ...; else ...; fi`
    If {
        /// The test segment.
        test: Box<CommandTree>,
        /// The then-branch.
        then: Box<CommandTree>,
        /// The optional else-branch.
        orelse: Option<Box<CommandTree>>,
    },
    /// `while test; do body; done`
    While {
        /// The test segment, re-run before every iteration.
        test: Box<CommandTree>,
        /// The body segment.
        body: Box<CommandTree>,
    },
    /// `until test; do body; done`
    Until {
        /// The test segment, re-run before every iteration.
        test: Box<CommandTree>,
        /// The body segment.
        body: Box<CommandTree>,
    },
    /// `for var in items; do body; done`
    For {
        /// The loop variable.
        var: String,
        /// The word list bound to `var`, one word per iteration.
        items: Vec<String>,
        /// The body segment.
        body: Box<CommandTree>,
    },
    /// `break [n]`
    Break(Option<u32>),
    /// `continue [n]`
    Continue(Option<u32>),
    /// A redirection wrapping a whole construct, e.g. `while ...; done < f`.
    Redir {
        /// The redirection itself.
        redirect: Redirect,
        /// The wrapped construct.
        next: Box<CommandTree>,
    },
    /// End of the input stream.
    Eof,
}

impl CommandTree {
    /// A simple command from its argument words.
    ///
    /// # Examples
    ///
    /// ```
    /// use parsh::command::CommandTree;
    ///
    /// let cmd = CommandTree::simple(["echo", "hi"]);
    /// assert_eq!(cmd.argv0(), Some("echo"));
    /// ```
    pub fn simple<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandTree::Simple {
            args: args.into_iter().map(Into::into).collect(),
            assigns: Vec::new(),
            redirects: Vec::new(),
        }
    }

    /// A command consisting only of `name=value` assignments.
    pub fn assign(name: impl Into<String>, value: impl Into<String>) -> Self {
        CommandTree::Simple {
            args: Vec::new(),
            assigns: vec![(name.into(), value.into())],
            redirects: Vec::new(),
        }
    }

    /// Attaches a file redirection to a `Simple`/`Background` command, or
    /// wraps any other construct in a [`CommandTree::Redir`] node.
    pub fn redirect(self, kind: RedirKind, name: impl Into<String>) -> Self {
        let redirect = Redirect::file(kind, name);
        match self {
            CommandTree::Simple { args, assigns, mut redirects } => {
                redirects.push(redirect);
                CommandTree::Simple { args, assigns, redirects }
            }
            CommandTree::Background { inner, mut redirects } => {
                redirects.push(redirect);
                CommandTree::Background { inner, redirects }
            }
            other => CommandTree::Redir { redirect, next: Box::new(other) },
        }
    }

    /// Chains `self ; next`.
    pub fn then(self, next: CommandTree) -> Self {
        CommandTree::Semi(Box::new(self), Box::new(next))
    }

    /// The command word of a `Simple` node, peeled of wrappers.
    pub fn argv0(&self) -> Option<&str> {
        match self {
            CommandTree::Simple { args, .. } => args.first().map(String::as_str),
            CommandTree::Background { inner, .. }
            | CommandTree::VarAssign(inner)
            | CommandTree::Not(inner)
            | CommandTree::Redir { next: inner, .. } => inner.argv0(),
            _ => None,
        }
    }

    /// True for a `Simple` whose words are all assignments.
    pub fn is_assign_only(&self) -> bool {
        matches!(self, CommandTree::Simple { args, assigns, .. }
            if args.is_empty() && !assigns.is_empty())
    }

    /// Flattens a `Semi` chain into the linear command list it denotes.
    ///
    /// Non-`Semi` trees flatten to themselves; this is how compound bodies
    /// become per-command graph nodes during expansion.
    pub fn sequence(&self) -> Vec<&CommandTree> {
        let mut out = Vec::new();
        fn walk<'a>(tree: &'a CommandTree, out: &mut Vec<&'a CommandTree>) {
            match tree {
                CommandTree::Semi(a, b) => {
                    walk(a, out);
                    walk(b, out);
                }
                other => out.push(other),
            }
        }
        walk(self, &mut out);
        out
    }

    /// Peels `Redir` and `Not` wrappers, returning the core construct and
    /// whether an odd number of `Not`s inverts its status.
    pub(crate) fn peel(&self) -> (&CommandTree, bool) {
        let mut cur = self;
        let mut negate = false;
        loop {
            match cur {
                CommandTree::Redir { next, .. } => cur = next,
                CommandTree::Not(inner) => {
                    negate = !negate;
                    cur = inner;
                }
                other => return (other, negate),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_flattens_left_deep_chains() {
        let tree = CommandTree::simple(["a"])
            .then(CommandTree::simple(["b"]))
            .then(CommandTree::simple(["c"]));
        let seq = tree.sequence();
        let names: Vec<_> = seq.iter().filter_map(|t| t.argv0()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn peel_tracks_negation_parity() {
        let tree = CommandTree::Not(Box::new(CommandTree::Not(Box::new(
            CommandTree::simple(["true"]).redirect(RedirKind::Out, "f"),
        ))));
        let (core, negate) = tree.peel();
        assert!(!negate);
        assert!(matches!(core, CommandTree::Simple { .. }));
    }
}
