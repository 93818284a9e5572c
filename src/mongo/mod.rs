pub mod oplog;
pub mod tailer;

pub use oplog::{Action, LogEntry, OpKind};
pub use tailer::{OplogTailer, TailerState};
