//! # photovault-store
//!
//! SQLite persistence for the vault.  Two kinds of database live on disk:
//!
//! - the **credential index** (`credentials.db` in the data root), one per
//!   deployment, holding user identities and salted password hashes;
//! - one **photo index** (`photos.db`) per user realm.
//!
//! Both wrap a `rusqlite::Connection` behind a mutex so that request handlers
//! and the startup reconciliation task can share them.  Every write is a
//! single statement, which is what keeps interleaved writers consistent.

pub mod credentials;
pub mod database;
pub mod legacy;
pub mod migrations;
pub mod models;
pub mod photos;

mod error;

pub use credentials::CredentialIndex;
pub use database::{Database, Schema};
pub use error::{Result, StoreError};
pub use legacy::{ImportStats, LegacyUserRecord};
pub use models::*;
pub use photos::PhotoIndex;
