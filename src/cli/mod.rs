//! CLI module for argument parsing and output.
//!
//! Arguments are parsed with clap; output goes through the `Printer` trait
//! for interactive runs and through formatters for json, yaml and xml.

pub mod args;
pub mod output;
