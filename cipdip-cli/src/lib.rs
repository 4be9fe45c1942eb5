//! CLI interface for CIPDIP replay
//!
//! Argument parsing, the exit code contract and the run artifacts written
//! next to each replay. The binary in `main.rs` wires these to the live
//! link-layer components.

pub mod args;
pub mod artifacts;

pub use args::{Cli, ModeArg};
pub use artifacts::{report_body, write_report, RunArtifacts};

use cipdip_core::Error;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_USAGE: u8 = 2;
pub const EXIT_UNREACHABLE: u8 = 3;
pub const EXIT_DRIFTED: u8 = 4;
pub const EXIT_INTERRUPTED: u8 = 130;

/// Process exit code for a failed run
pub fn exit_code(error: &Error) -> u8 {
    match error {
        e if e.is_input_error() => EXIT_USAGE,
        Error::InvalidParameter { .. } | Error::UnsupportedRewrite(_) | Error::NotImplemented(_) => EXIT_USAGE,
        Error::TargetUnreachable { .. } => EXIT_UNREACHABLE,
        Error::TargetDrifted { .. } => EXIT_DRIFTED,
        Error::Interrupted(_) => EXIT_INTERRUPTED,
        _ => EXIT_FAILURE,
    }
}

/// Default log level for a `-v` count
pub fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}
