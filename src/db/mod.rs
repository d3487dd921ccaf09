pub mod connection;
pub mod migration_runner;
pub mod store;

pub use connection::Database;
pub use store::{CredentialStore, NewLinkedAccount, SnapshotStore, SqliteStore};
