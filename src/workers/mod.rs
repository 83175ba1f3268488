//! Workers
//!
//! Typed task dispatch over a fixed roster. Standard workers take
//! test, analyze and execute tasks; hybrid workers are wildcards and
//! additionally cover repair. Batches run under a bounded semaphore so
//! a burst of submissions cannot produce unbounded concurrency.

pub mod pool;

pub use pool::{DefaultTaskHandler, Worker, WorkerPool};
