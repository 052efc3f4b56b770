//! CLI module for fixloop: argument parsing for every subcommand.

pub mod commands;

pub use commands::Cli;
