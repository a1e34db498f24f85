#![forbid(unsafe_code)]

//! The "run later" primitive used by deferred scope work.
//!
//! A scope never blocks and never spawns threads. When
//! [`eval_async`](crate::Scope::eval_async) or
//! [`apply_async`](crate::Scope::apply_async) needs a digest on a future
//! turn, it hands a [`Task`] to the scope's [`Schedule`] implementation.
//!
//! [`TurnQueue`] is the bundled implementation: a FIFO of tasks that the
//! host event loop drains with [`TurnQueue::run_turn`].
//!
//! # Invariants
//!
//! 1. Tasks deferred during the same turn run in the order they were
//!    deferred.
//! 2. A task deferred while a turn is running waits for the next turn.
//! 3. No task runs while the queue's own storage is borrowed, so tasks may
//!    defer further tasks.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// A unit of work to run on a future turn.
pub type Task = Box<dyn FnOnce()>;

/// Defers tasks to a future turn of the same single-threaded context.
///
/// Implementations must run equally-deferred tasks in FIFO order.
pub trait Schedule {
    fn defer(&self, task: Task);
}

impl<S: Schedule + ?Sized> Schedule for Rc<S> {
    fn defer(&self, task: Task) {
        (**self).defer(task);
    }
}

/// Manually driven FIFO of deferred tasks.
///
/// Cloning a `TurnQueue` creates a new handle to the **same** queue, so the
/// host loop and the scope can each hold one.
#[derive(Clone, Default)]
pub struct TurnQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl fmt::Debug for TurnQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

impl TurnQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run the tasks that were pending when the turn started.
    ///
    /// Returns the number of tasks run.
    pub fn run_turn(&self) -> usize {
        let due = self.pending();
        let mut ran = 0;
        for _ in 0..due {
            let Some(task) = self.tasks.borrow_mut().pop_front() else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }

    /// Run turns until the queue is empty or `max_turns` turns have run.
    ///
    /// Returns the total number of tasks run.
    pub fn run_until_idle(&self, max_turns: usize) -> usize {
        let mut ran = 0;
        for _ in 0..max_turns {
            if self.is_idle() {
                break;
            }
            ran += self.run_turn();
        }
        ran
    }
}

impl Schedule for TurnQueue {
    fn defer(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}
