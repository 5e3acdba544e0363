//! Common utilities and types shared across gitmount crates.

pub mod error;
pub mod uri;

pub use error::{Error, Result};
pub use uri::MountUri;
