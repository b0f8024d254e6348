use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = treehole_cli::Cli::parse();
    treehole_cli::run_cli(cli)
}
