//! CLI commands.

pub mod info;
pub mod list;
pub mod pull;
pub mod serve;
