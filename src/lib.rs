pub mod checkpoint;
pub mod config;
pub mod defs;
pub mod error;
pub mod replicator;

pub mod mongo;
pub mod mysql;

pub use config::Config;
pub use error::{Error, Result};
pub use replicator::Replicator;
