// Command-line interface
// Front end for the build system

pub mod build_cli;

pub use build_cli::{run_cli, BuildCli, BuildCommand, ConfigAction, RequestArgs};
