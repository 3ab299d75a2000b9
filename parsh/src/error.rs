//! Scheduler error taxonomy.
//!
//! Evaluator failures are never errors here; they travel as exit statuses
//! and feed the compound selection logic.

use std::fmt;

/// Errors surfaced by the scheduling core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The analyzer met a malformed command tree; the command is skipped.
    Malformed(&'static str),
    /// A scheduling invariant was violated. Callers should treat this as
    /// fatal for the session.
    Invariant(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Malformed(what) => write!(f, "malformed command tree: {}", what),
            Error::Invariant(what) => write!(f, "scheduler invariant violated: {}", what),
        }
    }
}

impl std::error::Error for Error {}
