//! bugsync CLI - reconcile vulnerability records with tracker issues
//!
//! Binary name: `bugsync`
//!
//! Exit codes: `0` clean run, `1` fatal error, `2` run completed but some
//! groups failed and should be retried.

use std::process::ExitCode;

mod cli;
mod commands;
mod file_source;
mod file_tracker;
mod logging;

use logging::LogFormat;

fn main() -> ExitCode {
    let matches = cli::build().get_matches();

    let format = matches
        .get_one::<String>("log-format")
        .map_or(LogFormat::Text, |value| LogFormat::parse(value));
    if let Err(error) = logging::init(format) {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Error: {error}");
        }
        return ExitCode::FAILURE;
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match commands::dispatch(&matches, &mut out) {
        Ok(status) => status.into(),
        Err(error) => {
            tracing::error!(error = %format!("{error:#}"), "command failed");
            #[allow(clippy::print_stderr)]
            {
                eprintln!("Error: {error:#}");
            }
            ExitCode::FAILURE
        }
    }
}
