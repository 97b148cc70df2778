//! Shared types for the session transport workspace
//!
//! Holds the wire contract both sides of the protocol agree on (paths,
//! cookie and header names, machine-readable error codes, JSON bodies), the
//! `Secret` wrapper used for every credential and anti-forgery value, and the
//! configuration error type.

mod error;
mod secret;
pub mod wire;

pub use error::{Error, Result};
pub use secret::Secret;
