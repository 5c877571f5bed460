use clap::Parser;
use log::LevelFilter;
use scribble_export::cli::{Cli, run};
use scribble_export::init_log;

fn main() {
    let cli = Cli::parse();

    let level = if cli.quiet {
        LevelFilter::Warn
    } else if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(err) = init_log(level) {
        eprintln!("Failed to initialize the logger: {err}");
    }

    if let Err(err) = run(cli) {
        log::error!("{err}");
        std::process::exit(1);
    }
}
