//! tasknode-exec: child-process primitives shared by the timed-job and
//! daemon supervisors.
//!
//! - [`command::CommandSpec`] builds a `sh -c` child in its own process group,
//!   with optional working directory, environment and run-as user.
//! - [`run::run`] drives one child to completion, streaming stdout and stderr
//!   line by line into a caller-supplied sink, and races it against a timeout
//!   and a cancellation token.
//! - [`daylog::DayLog`] appends lines to `<root>/<YYYY-MM-DD>/<name>`, rolling
//!   over to a new file when the date changes.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tasknode_exec::{run, CommandSpec, Exit};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> tasknode_exec::Result<()> {
//! let spec = CommandSpec::new("echo hello; echo oops >&2");
//! let mut output = String::new();
//! let finished = run(&spec, Some(Duration::from_secs(5)), &CancellationToken::new(), |line| {
//!     output.push_str(line);
//!     output.push('\n');
//! })
//! .await?;
//! assert_eq!(finished.exit, Exit::Success);
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod daylog;
pub mod error;
pub mod run;
pub mod truncate;

pub use command::{kill_group, lookup_user, CommandSpec};
pub use daylog::{read_chunk, DayLog, LogChunk};
pub use error::{ExecError, Result};
pub use run::{run, Exit, Finished};
pub use truncate::truncate_output;
