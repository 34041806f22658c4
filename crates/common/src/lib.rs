//! Common utilities and types shared across connmonitor components.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
