//! blobq CLI library
//!
//! Exposes the command tree so integration tests can drive it in-process.

pub mod commands;
pub mod exit_code;
pub mod output;
pub mod session;
