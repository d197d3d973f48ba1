//! Background job orchestration for provider CLIs.
//!
//! Exposes the filesystem job store, the process supervisor that runs and
//! finalizes jobs, the query service used to wait on, list, and kill them, and
//! the structured per-request event log.

pub mod cli_supervisor_runtime;
pub mod event_log_runtime;
pub mod job_query_runtime;
pub mod job_store_runtime;
pub mod process_signal_runtime;
pub mod runtime_config;

pub use cli_supervisor_runtime::*;
pub use event_log_runtime::*;
pub use job_query_runtime::*;
pub use job_store_runtime::*;
pub use process_signal_runtime::*;
pub use runtime_config::*;
