//! One module per subcommand.

mod add;
mod bridge_host;
mod checksum;
mod limit;
mod pause;
mod queue;
mod remove;
mod resume;
mod run;
mod status;

pub use add::run_add;
pub use bridge_host::run_bridge_host;
pub use checksum::run_checksum;
pub use limit::run_limit;
pub use pause::run_pause;
pub use queue::{run_queue, QueueCommand};
pub use remove::run_remove;
pub use resume::run_resume;
pub use run::run_daemon;
pub use status::run_status;
