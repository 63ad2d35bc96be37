mod cli;
mod config;
mod event_log;
mod perf;
mod scenario;
mod simulator;

use clap::Parser;

use cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        utils::init_logging_with_default("gcsim=debug,gcsim_runtime=debug");
    } else {
        utils::init_logging();
    }
    cli.run()
}
