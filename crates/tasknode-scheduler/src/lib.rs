//! `tasknode-scheduler`: in-memory timer heap that turns armed cron jobs
//! into dispatches.
//!
//! # Overview
//!
//! Each armed job owns exactly one heap entry keyed by its next fire time
//! (Unix seconds). [`engine::Scheduler::run`] polls the heap on a short
//! interval, pops every due entry under the lock, and sends a
//! [`types::Dispatch`] for each onto a bounded queue once the lock is
//! released. The job stays disarmed in the heap until its execution
//! finishes and calls [`engine::Scheduler::rearm`], so a job never has two
//! live entries.
//!
//! | Operation  | Effect                                                  |
//! |------------|---------------------------------------------------------|
//! | `arm`      | compute next fire time, insert or move the heap entry   |
//! | `disarm`   | drop the entry and cancel the job's in-flight token     |
//! | `rearm`    | re-arm after a run, unless a newer arm/disarm won       |

pub mod engine;
pub mod error;
pub mod heap;
pub mod types;

pub use engine::Scheduler;
pub use error::{Result, SchedulerError};
pub use heap::TimerHeap;
pub use types::Dispatch;
