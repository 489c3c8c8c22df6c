//! Stackwire CLI — compile, plan, and apply cloud stack topologies.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "stackwire",
    version,
    about = "Resource dependency and access-wiring compiler for cloud stacks"
)]
struct Cli {
    #[command(subcommand)]
    command: stackwire::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = stackwire::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
