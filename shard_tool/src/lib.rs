//! Library side of the shard command-line tools: input handling and the JSON
//! reports the binaries print.

pub mod input;
pub mod report;
pub mod tracing;

/// Common information for the `--version` CLI flags.
pub fn version() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}
