//! Persistence layer: a `Database` trait with a libSQL backend.

mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
