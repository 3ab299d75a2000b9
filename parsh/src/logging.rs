//! Typed scheduler event logging.
//!
//! Scheduling decisions are reported as a stream of [`SchedEvent`] values.
//! A [`Logger`] buffers `(Duration, SchedEvent)` pairs and forwards full
//! batches to an installed action, which is the whole destination story:
//! dropping the logger flushes what remains.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// An event in the life of the scheduler.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum SchedEvent {
    /// A command node entered the graph.
    Admitted {
        /// Intake sequence number of the node.
        seq: u64,
        /// Unresolved upstream dependencies at admission.
        unresolved: u32,
    },
    /// A node was handed to a worker.
    Dispatched {
        /// Intake sequence number of the node.
        seq: u64,
    },
    /// A dispatched node was pulled back off the frontier to wait for an
    /// unpublished variable version.
    Reparked {
        /// Intake sequence number of the node.
        seq: u64,
        /// The variable being waited on.
        var: String,
    },
    /// A node completed with the given exit status.
    Completed {
        /// Intake sequence number of the node.
        seq: u64,
        /// Observed exit status.
        status: i32,
    },
    /// A compound sentinel expanded a segment into child nodes.
    Expanded {
        /// Intake sequence number of the sentinel.
        seq: u64,
        /// Number of children spawned.
        children: usize,
    },
    /// A node was pruned by `break`/`continue` cancellation.
    Cancelled {
        /// Intake sequence number of the node.
        seq: u64,
    },
    /// A variable version was published.
    Published {
        /// Variable name, without the `$` sigil.
        var: String,
        /// Readers released by the publication.
        released: usize,
    },
    /// End of input observed.
    Eof,
}

type Action = dyn Fn(&Duration, &[(Duration, SchedEvent)]) + Send + Sync;

/// A buffering, shareable scheduler event logger.
///
/// Events originate on every worker thread, so unlike a per-worker stream
/// the buffer is shared behind a mutex; the action sees batches whose
/// timestamps are non-decreasing per batch.
pub struct Logger {
    time: Instant,
    action: Arc<Action>,
    buffer: Arc<Mutex<Vec<(Duration, SchedEvent)>>>,
}

impl Clone for Logger {
    fn clone(&self) -> Self {
        Logger {
            time: self.time,
            action: Arc::clone(&self.action),
            buffer: Arc::clone(&self.buffer),
        }
    }
}

const BUFFER_CAPACITY: usize = 1024;

impl Logger {
    /// Allocates a new logger bound to a batch action.
    pub fn new<F>(action: F) -> Self
    where
        F: Fn(&Duration, &[(Duration, SchedEvent)]) + Send + Sync + 'static,
    {
        Logger {
            time: Instant::now(),
            action: Arc::new(action),
            buffer: Arc::new(Mutex::new(Vec::with_capacity(BUFFER_CAPACITY))),
        }
    }

    /// Logs an event, flushing if the buffer filled up.
    pub fn log(&self, event: SchedEvent) {
        let mut buffer = self.buffer.lock().expect("log buffer poisoned");
        buffer.push((self.time.elapsed(), event));
        if buffer.len() == buffer.capacity() {
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }

    /// Flushes buffered events to the action.
    pub fn flush(&self) {
        let mut buffer = self.buffer.lock().expect("log buffer poisoned");
        if !buffer.is_empty() {
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        // Last clone out flushes the stream.
        if Arc::strong_count(&self.buffer) == 1 {
            self.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn drop_flushes_buffered_events() {
        let seen = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&seen);
        {
            let logger = Logger::new(move |_, batch| {
                count.fetch_add(batch.len(), Ordering::SeqCst);
            });
            logger.log(SchedEvent::Eof);
            logger.log(SchedEvent::Dispatched { seq: 3 });
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn events_round_trip_through_serde() {
        let event = SchedEvent::Published { var: "x".into(), released: 2 };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(serde_json::from_str::<SchedEvent>(&json).unwrap(), event);
    }
}
