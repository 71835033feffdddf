//! filedo CLI entry point.

use std::process::ExitCode;

fn main() -> ExitCode {
    match filedo::cli::run() {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
