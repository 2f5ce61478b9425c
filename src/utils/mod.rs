//! Utility modules shared by the host and its tools

pub mod env;
pub mod error;
pub mod lock;
pub mod logging;

// Re-export commonly used items
pub use env::{env_bool, env_list, env_opt};
pub use error::{isolate_panic, log_error, with_default};
pub use lock::{lock_unpoisoned, read_unpoisoned, with_lock, write_unpoisoned};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config};
