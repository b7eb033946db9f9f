//! cachepub command-line front end: flag parsing, config files, store selection.

pub mod cli;
pub mod config;

pub use cli::{Cli, CodecArg};
pub use config::FileConfig;
