//! ABOUTME: Shared data model, key-space layout, errors, and tracing utilities
//! ABOUTME: Foundation crate used by all other cronwork components

pub mod error;
pub mod keys;
pub mod telemetry;
pub mod time;
pub mod types;

pub use error::{Error, Result};
pub use types::{is_valid_email, ExecError, ExecuteInfo, ExecuteResult, Job, JobEvent, JobLog};
