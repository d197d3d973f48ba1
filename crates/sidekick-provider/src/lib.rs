//! Provider identities, model defaults, and argv construction for the
//! assistant CLIs Sidekick drives.
//!
//! Nothing here spawns a process: callers get a ready-to-run command and
//! argument vector and hand it to the runtime supervisor.

mod cli_executable;
mod command_builder;
mod model_catalog;
mod types;

pub use cli_executable::is_executable_available;
pub use command_builder::*;
pub use model_catalog::*;
pub use types::*;
