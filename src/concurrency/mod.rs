// src/concurrency/mod.rs

//! Concurrency substrate: counted waiting tasks and the pool they run on.
//!
//! - [`waiting_task`] is the counted continuation primitive and its RAII
//!   holder.
//! - [`waiting_task_list`] parks holders until a one-shot event.
//! - [`final_task`] lets `async` code await a batch of continuation-passing
//!   work.
//! - [`pool`] wraps the Tokio runtime used as the fixed-size thread pool.
//! - [`limiter`] implements per-module concurrency limits.

pub mod final_task;
pub mod limiter;
pub mod pool;
pub mod waiting_task;
pub mod waiting_task_list;

pub use final_task::{FinalWaitingTask, wait_for};
pub use limiter::{ConcurrencyKind, ConcurrencyLimiter};
pub use pool::TaskPool;
pub use waiting_task::{WaitingTask, WaitingTaskHolder};
pub use waiting_task_list::WaitingTaskList;
