//! CLI command implementations.

mod config;
mod probe;
mod translate;
mod watch;

pub use config::{run_config, ConfigArgs};
pub use probe::{run_probe, ProbeArgs};
pub use translate::{run_translate, TranslateArgs};
pub use watch::{run_watch, WatchArgs};
