//! SQLite backend for Kindred.
//!
//! [`SqliteStore`] implements the profile/report
//! [`DirectoryService`](kindred_core::directory::DirectoryService) and hands
//! out a [`SqliteIdentity`] provider over the same database. All access runs
//! through [`tokio_rusqlite`] so it never blocks the async runtime.

mod encode;
mod schema;
mod store;

pub mod error;
pub mod identity;

pub use error::{Error, Result};
pub use identity::{IdentityConfig, SqliteIdentity};
pub use store::SqliteStore;
