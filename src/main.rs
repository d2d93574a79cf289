use std::process::ExitCode;

use clap::Parser;

use drawpad::cli::{self, CliArgs};
use drawpad::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let settings = match args.resolve_settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize session log (overwrites previous session log)
    if let Err(e) = logger::init(settings.level_filter()) {
        eprintln!("warning: session log unavailable: {}", e);
    }

    cli::run(args, settings)
}
