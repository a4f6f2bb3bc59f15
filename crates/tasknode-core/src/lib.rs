pub mod config;
pub mod error;
pub mod types;

pub use config::TaskNodeConfig;
pub use error::{CoreError, Result};
