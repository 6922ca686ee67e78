//! Application Task and Management CLI
//!
//! Command parsing and table rendering for the `roaming ...` management
//! commands, plus the app task that answers them by querying the other
//! tasks.

mod cmd_handler;
mod task;

pub use cmd_handler::{
    format_neighbors, format_nodes, format_subscribers, parse_cli_command, BtsCliCommandType,
};
pub use task::AppTask;
