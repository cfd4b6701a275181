pub mod artifacts;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod events;
pub mod log;
pub mod objective;
pub mod signal;
pub mod supervisor;
pub mod tracker;

pub use config::Config;
pub use error::{Error, Result};
pub use events::RuntimeEvent;
pub use supervisor::Supervisor;
