//! Intake: the shaping pass between the parser and the graph.
//!
//! Top-level `;` chains flatten into individual submissions, bare commands
//! pick up their scheduling shape (`Background` for externals, `VarAssign`
//! for assignment-only words), and `cd`/`exit` are pulled aside for
//! synchronous evaluation off the graph.

use crate::command::CommandTree;

/// Builtins evaluated synchronously, bypassing the graph.
const SYNC_BUILTINS: [&str; 2] = ["cd", "exit"];

/// One item produced by splitting a submitted tree.
pub enum Item {
    /// A shaped command bound for the graph.
    Command(CommandTree),
    /// A builtin the caller must evaluate synchronously.
    Builtin(CommandTree),
    /// The end-of-input marker.
    Eof,
}

/// True for a command the scheduler hands back for synchronous evaluation.
pub fn is_builtin(tree: &CommandTree) -> bool {
    matches!(tree.argv0(), Some(name) if SYNC_BUILTINS.contains(&name))
}

/// Flattens a top-level tree into intake items, shaping each command.
pub fn split(tree: CommandTree) -> Vec<Item> {
    let mut out = Vec::new();
    fn walk(tree: CommandTree, out: &mut Vec<Item>) {
        match tree {
            CommandTree::Semi(a, b) => {
                walk(*a, out);
                walk(*b, out);
            }
            CommandTree::Eof => out.push(Item::Eof),
            other if is_builtin(&other) => out.push(Item::Builtin(other)),
            other => out.push(Item::Command(shape(other))),
        }
    }
    walk(tree, &mut out);
    out
}

/// Gives a raw command its scheduling shape.
///
/// A `Simple` of only assignments becomes [`CommandTree::VarAssign`] (its
/// completion publishes versions); any other `Simple` becomes a
/// [`CommandTree::Background`] job. `Not` wrappers are shaped through.
/// Compounds pass unchanged; the expander shapes their segments the same
/// way when they unfold.
pub fn shape(tree: CommandTree) -> CommandTree {
    match tree {
        simple @ CommandTree::Simple { .. } if simple.is_assign_only() => {
            CommandTree::VarAssign(Box::new(simple))
        }
        simple @ CommandTree::Simple { .. } => {
            CommandTree::Background { inner: Box::new(simple), redirects: Vec::new() }
        }
        CommandTree::Not(inner) => CommandTree::Not(Box::new(shape(*inner))),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RedirKind;

    #[test]
    fn splits_and_shapes_a_chain() {
        let tree = CommandTree::assign("x", "5")
            .then(CommandTree::simple(["cd", "/tmp"]))
            .then(CommandTree::simple(["make"]).redirect(RedirKind::Out, "log"))
            .then(CommandTree::Eof);
        let items = split(tree);
        assert_eq!(items.len(), 4);
        assert!(matches!(&items[0], Item::Command(CommandTree::VarAssign(_))));
        assert!(matches!(&items[1], Item::Builtin(_)));
        assert!(matches!(&items[2], Item::Command(CommandTree::Background { .. })));
        assert!(matches!(&items[3], Item::Eof));
    }

    #[test]
    fn shapes_through_negation() {
        let tree = CommandTree::Not(Box::new(CommandTree::simple(["grep", "x"])));
        let shaped = shape(tree);
        let CommandTree::Not(inner) = shaped else { panic!("lost the negation") };
        assert!(matches!(*inner, CommandTree::Background { .. }));
    }
}
