//! Shared types for civicgate

pub mod error;
pub mod identity;

pub use error::{GateError, Result};
pub use identity::Identity;
