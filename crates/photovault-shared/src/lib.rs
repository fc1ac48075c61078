//! # photovault-shared
//!
//! Types and constants shared by the store, media and server crates.

pub mod constants;
pub mod media_type;
pub mod types;

pub use types::{PhotoId, UserId};
