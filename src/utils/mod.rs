pub mod config;
pub mod logger;
pub mod paths;
pub(crate) mod tagpipe_toml;

pub use config::*;
pub use logger::setup_logging;
pub use paths::to_posix_string;
