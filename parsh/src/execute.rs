//! Spinning up a shell scheduling session: a worker pool pulling from the
//! scheduler, and a channel feed for a dedicated parser thread.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Sender};

use crate::command::CommandTree;
use crate::error::Error;
use crate::eval::{Evaluate, Outcome};
use crate::logging::Logger;
use crate::scheduler::{Pulled, Scheduler, Submitted};

/// Worker-pool configuration.
///
/// # Examples
///
/// ```
/// use parsh::Config;
///
/// let single = Config::thread();
/// let pool = Config::process(4).logging(None);
/// assert_eq!(format!("{:?}", single), "Config { workers: 1, logger: false }");
/// let _ = pool;
/// ```
pub struct Config {
    workers: usize,
    logger: Option<Logger>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("workers", &self.workers)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

impl Config {
    /// One worker thread.
    pub fn thread() -> Self {
        Config { workers: 1, logger: None }
    }

    /// A pool of `workers` threads.
    pub fn process(workers: usize) -> Self {
        Config { workers: workers.max(1), logger: None }
    }

    /// Installs a scheduler event logger.
    pub fn logging(mut self, logger: Option<Logger>) -> Self {
        self.logger = logger;
        self
    }
}

/// A running scheduling session: the scheduler, its worker pool, and the
/// synchronous-builtin path.
///
/// Dropping the shell signals EOF and joins the workers.
pub struct Shell {
    scheduler: Arc<Scheduler>,
    evaluator: Arc<dyn Evaluate>,
    guards: Vec<thread::JoinHandle<()>>,
}

/// Spawns a worker pool over `evaluator` and returns the session handle.
pub fn execute<E>(config: Config, evaluator: E) -> Shell
where
    E: Evaluate + 'static,
{
    let scheduler = Arc::new(Scheduler::with_logger(config.logger));
    let evaluator: Arc<dyn Evaluate> = Arc::new(evaluator);
    let guards = (0..config.workers)
        .map(|index| {
            let scheduler = Arc::clone(&scheduler);
            let evaluator = Arc::clone(&evaluator);
            thread::Builder::new()
                .name(format!("parsh-worker-{}", index))
                .spawn(move || worker_loop(&scheduler, &*evaluator))
                .expect("failed to spawn worker thread")
        })
        .collect();
    Shell { scheduler, evaluator, guards }
}

fn worker_loop(scheduler: &Scheduler, evaluator: &dyn Evaluate) {
    loop {
        match scheduler.pull() {
            Pulled::Eof => break,
            Pulled::Work(work) => {
                let mut vars = scheduler.var_access(&work);
                match evaluator.eval(work.command(), &mut vars) {
                    Outcome::Exit(status) => scheduler.complete(work.into_ticket(), status),
                    // The node was parked mid-resolution; publication will
                    // re-dispatch it. Nothing to complete.
                    Outcome::Blocked => {}
                }
            }
        }
    }
}

impl Shell {
    /// The scheduler behind this session.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Submits one parsed tree, evaluating any `cd`/`exit` builtins
    /// synchronously on the calling thread. Returns the status of the last
    /// builtin evaluated, if any.
    pub fn submit(&self, tree: CommandTree) -> Result<Option<i32>, Error> {
        match self.scheduler.submit(tree)? {
            Submitted::Builtins(builtins) => {
                let mut last = None;
                for builtin in builtins {
                    let mut vars = self.scheduler.detached_access();
                    if let Outcome::Exit(status) = self.evaluator.eval(&builtin, &mut vars) {
                        last = Some(status);
                    }
                }
                Ok(last)
            }
            _ => Ok(None),
        }
    }

    /// A channel feed for a dedicated parser thread; trees sent on it are
    /// submitted in order. Dropping the sender ends the feed (not the
    /// session).
    pub fn feeder(&mut self) -> Sender<CommandTree> {
        let (tx, rx) = unbounded::<CommandTree>();
        let scheduler = Arc::clone(&self.scheduler);
        let evaluator = Arc::clone(&self.evaluator);
        let guard = thread::Builder::new()
            .name("parsh-feed".to_string())
            .spawn(move || {
                for tree in rx {
                    match scheduler.submit(tree) {
                        Ok(Submitted::Builtins(builtins)) => {
                            for builtin in builtins {
                                let mut vars = scheduler.detached_access();
                                let _ = evaluator.eval(&builtin, &mut vars);
                            }
                        }
                        Ok(_) | Err(_) => {}
                    }
                }
            })
            .expect("failed to spawn feed thread");
        self.guards.push(guard);
        tx
    }

    /// Signals end of input.
    pub fn eof(&self) {
        self.scheduler.eof();
    }

    /// Signals EOF and blocks until every worker has drained and exited.
    pub fn join(mut self) {
        self.scheduler.eof();
        for guard in self.guards.drain(..) {
            let _ = guard.join();
        }
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.scheduler.eof();
        for guard in self.guards.drain(..) {
            let _ = guard.join();
        }
    }
}
