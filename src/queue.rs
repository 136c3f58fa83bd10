//! The deferred task queue every promise notification goes through.
//!
//! "Deferred" means placed onto a thread-local FIFO that runs strictly after
//! the current synchronous call stack unwinds. The queue is cooperative and
//! single-threaded: nothing runs until the owning thread calls [`drain`], and
//! tasks deferred while draining run in the same drain, after everything that
//! was already queued.
use std::cell::RefCell;
use std::collections::VecDeque;

use tracing::trace;

type Task = Box<dyn FnOnce()>;

thread_local! {
    static TASKS: RefCell<VecDeque<Task>> = RefCell::new(VecDeque::new());
}

/// Appends a task to the back of the queue and returns immediately.
pub fn defer(task: impl FnOnce() + 'static) {
    TASKS.with(|tasks| {
        let mut tasks = tasks.borrow_mut();
        tasks.push_back(Box::new(task));
        trace!(depth = tasks.len(), "task deferred");
    });
}

/// Runs queued tasks in FIFO order until the queue is empty.
///
/// The borrow on the queue is released before each task runs, so tasks are
/// free to defer further tasks.
pub fn drain() {
    let mut ran = 0usize;
    loop {
        let task = TASKS.with(|tasks| tasks.borrow_mut().pop_front());
        match task {
            Some(task) => {
                task();
                ran += 1;
            }
            None => break,
        }
    }
    trace!(ran, "queue drained");
}

/// True when no task is waiting to run.
pub fn is_idle() -> bool {
    TASKS.with(|tasks| tasks.borrow().is_empty())
}
