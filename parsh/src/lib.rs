//! Parsh is the scheduling core of a parallel shell: it turns a serial
//! stream of parsed command trees into a dependency graph whose ready nodes
//! execute concurrently on worker threads, while file-level and
//! variable-level happens-before relationships are preserved.
//!
//! The code is organized so the layers depend as little as possible on each
//! other.
//!
//! **Command trees**: the [`command`] module defines the parser-facing
//! [`CommandTree`](command::CommandTree) input type. Ownership of a tree
//! passes to the scheduler at submission.
//!
//! **Access analysis**: the [`access`] module derives a command's static
//! read/write effect set, the sole source of dependency edges.
//!
//! **Scheduling**: the [`scheduler`] module owns the dependency graph, the
//! frontier of dispatchable nodes, compound expansion, variable versioning,
//! and `break`/`continue` cancellation, all behind one lock.
//!
//! **Execution**: the [`execute`] module spins up a worker pool over a
//! user-provided [`Evaluate`](eval::Evaluate) implementation and feeds the
//! scheduler from a parser thread.
//!
//! # Examples
//!
//! A two-command script in which the second command must wait for the first:
//!
//! ```
//! use parsh::command::{CommandTree, RedirKind};
//! use parsh::scheduler::{Scheduler, Pulled, Submitted};
//!
//! let sched = Scheduler::new();
//! let first = CommandTree::simple(["sleep", "2"]).redirect(RedirKind::Out, "a");
//! let second = CommandTree::simple(["echo", "done"]).redirect(RedirKind::Out, "a");
//!
//! assert!(matches!(sched.submit(first), Ok(Submitted::Queued)));
//! assert!(matches!(sched.submit(second), Ok(Submitted::Queued)));
//! sched.eof();
//!
//! // Only the first write to `a` is dispatchable until it completes.
//! match sched.pull() {
//!     Pulled::Work(work) => sched.complete(work.into_ticket(), 0),
//!     Pulled::Eof => unreachable!(),
//! }
//! ```

#![forbid(missing_docs)]

pub mod access;
pub mod command;
pub mod error;
pub mod eval;
pub mod execute;
pub mod intake;
pub mod logging;
pub mod scheduler;

pub use command::CommandTree;
pub use error::Error;
pub use eval::{Evaluate, Outcome};
pub use execute::{execute, Config, Shell};
pub use scheduler::{Pulled, Scheduler, Submitted};
