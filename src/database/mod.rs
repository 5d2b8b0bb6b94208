//! MySQL session helpers for the reference databases
pub mod client;
pub mod error;
pub mod schema;

// Re-export most commonly used types
pub use client::{AccessMode, ConnectionFactory, DatabaseConnectionInfo, SchemaConnection};
pub use error::Error;
pub use schema::SchemaName;
