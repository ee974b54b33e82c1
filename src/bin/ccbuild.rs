// Crypto Compiler CLI Binary
// Command-line tool for building and running crypto library sources

use crypto_compiler::cli::run_cli;
use std::process;

fn main() {
    if let Err(e) = run_cli() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
