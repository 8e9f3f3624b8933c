//! Command implementations for the CLI.

mod control;
mod devices;
mod pair;
mod scan;
mod sessions;
mod watch;

pub use control::{cmd_bind, cmd_detect, cmd_set_fan, cmd_set_target};
pub use devices::cmd_devices;
pub use pair::{cmd_pair, cmd_provision};
pub use scan::cmd_scan;
pub use sessions::{HistoryArgs, cmd_history, cmd_prune, cmd_sessions};
pub use watch::{WatchArgs, cmd_watch};
