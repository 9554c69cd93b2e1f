use clap::Parser;
use smu_sweep::fixer::fix_directory;
use smu_sweep::logging::init_logger;
use std::path::PathBuf;
use std::process::ExitCode;

/// Rewrite whitespace-delimited .csv files as comma-delimited `fixed_` copies
#[derive(Parser, Debug)]
#[command(name = "fix_delimiters", version)]
struct Cli {
    /// Directory holding the .csv files
    #[arg(default_value = ".")]
    dir: PathBuf,

    #[arg(short, long)]
    verbose: bool,
}

// The main entry point for the delimiter fixer.
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match fix_directory(&cli.dir) {
        Ok(report) => {
            println!(
                "{} converted, {} could not be parsed",
                report.converted.len(),
                report.failed.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("[ERROR] Could not read '{}': {}", cli.dir.display(), e);
            ExitCode::FAILURE
        }
    }
}
