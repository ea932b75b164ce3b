use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod serve;
pub mod transact;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a demonstration server.
    Serve(ServeArgs),
    /// Send one command to a server and print the response.
    Transact(TransactArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Transact(args) => transact::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind (the nonce file path with --nonce).
    #[arg(required_unless_present = "stdio", conflicts_with = "stdio")]
    pub path: Option<PathBuf>,
    /// Serve a single client over stdin/stdout.
    #[arg(long)]
    pub stdio: bool,
    /// Listen on loopback TCP and write the port and nonce to PATH.
    #[arg(long, conflicts_with = "stdio")]
    pub nonce: bool,
    /// Exit after serving N connections.
    #[arg(long)]
    pub count: Option<usize>,
    /// Greeting sent to each client; newlines produce comment lines.
    #[arg(long)]
    pub hello: Option<String>,
    /// Answer OPTION with an error instead of accepting it.
    #[arg(long)]
    pub strict_options: bool,
    /// Largest inquired DATA reply in bytes (0 for unlimited).
    #[arg(long, default_value = "65536")]
    pub max_data: usize,
}

#[derive(Args, Debug)]
pub struct TransactArgs {
    /// Server address: socket path, nonce file, file:// URL or
    /// tcp://host:port. With --spawn, the program to start.
    pub address: String,
    /// Command line to send (words are joined with spaces).
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
    /// Start ADDRESS as a pipe server instead of connecting to it.
    #[arg(long)]
    pub spawn: bool,
    /// Argument for the spawned program (repeatable).
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true, requires = "spawn")]
    pub args: Vec<String>,
    /// Reply to INQUIRE KEYWORD with VALUE (repeatable, KEYWORD=VALUE).
    #[arg(long = "answer", value_name = "KEYWORD=VALUE")]
    pub answers: Vec<String>,
    /// Reply to INQUIRE KEYWORD with the contents of PATH (KEYWORD=PATH).
    #[arg(long = "answer-file", value_name = "KEYWORD=PATH")]
    pub answer_files: Vec<String>,
    /// Use a channel that can pass descriptors.
    #[arg(long)]
    pub fd_passing: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
