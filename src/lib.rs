//! Chaincast library
//!
//! Distribute one file to a linear chain of hosts: the origin sends it once,
//! every host relays it to the next and keeps a copy.

pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod journal;
pub mod lifecycle;
pub mod logger;
pub mod progress;
pub mod relay;
pub mod run;
pub mod transmit;

pub use cli::Args;
