//! `tasknode-cron`: six-field cron expressions evaluated in a fixed UTC+8
//! civil calendar.
//!
//! # Fields
//!
//! | Position | Field        | Range  | Special forms          |
//! |----------|--------------|--------|------------------------|
//! | 1        | second       | 0-59   |                        |
//! | 2        | minute       | 0-59   |                        |
//! | 3        | hour         | 0-23   |                        |
//! | 4        | day of month | 1-31   | `L`, `<n>W`, `LW`, `?` |
//! | 5        | month        | 1-12   | `jan`..`dec`           |
//! | 6        | day of week  | 0-6    | `sun`..`sat`, `<w>L`, `<w>#<n>`, `?` |
//!
//! Every field accepts `*`, a literal, a comma list, `start/step` and
//! `start-end` (wrapping when `start > end`).
//!
//! ```rust
//! use tasknode_cron::CronExpr;
//!
//! let expr = CronExpr::new("*/15 * * * * *");
//! let next = expr.next_exec_time(tasknode_cron::calendar::now()).unwrap();
//! assert_eq!(next.timestamp() % 15, 0);
//! ```

pub mod calendar;
pub mod error;
pub mod expr;
pub mod field;

pub use error::{CronError, Result};
pub use expr::{CronExpr, Schedule};
pub use field::Field;
