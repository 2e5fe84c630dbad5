//! Layercast CLI - Command-line interface

mod commands;

use clap::Parser;

#[derive(Parser)]
#[command(name = "layercast")]
#[command(about = "Layered live-streaming delivery simulator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::handle_command(cli.command)
}
