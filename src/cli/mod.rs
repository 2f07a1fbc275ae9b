//! Command handlers for the `p2p-node` binary

mod commands;

pub use commands::*;
