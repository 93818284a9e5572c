pub mod connection;
pub mod executor;
pub mod statement;

pub use connection::ConnectionManager;
pub use executor::MutationExecutor;
pub use statement::Statement;
