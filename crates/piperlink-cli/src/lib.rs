//! Command-line front end for the piperlink bridge.
//!
//! `main.rs` parses arguments, sets up logging and hands over to the
//! composition root in [`bootstrap`].

#![deny(unused_crate_dependencies)]

// Used by main.rs
use anyhow as _;
use dotenvy as _;

pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod parser;

pub use bootstrap::{bootstrap, Bridge};
pub use error::CliError;
pub use logging::LogFormat;
pub use parser::{BridgeArgs, Cli, Commands};
