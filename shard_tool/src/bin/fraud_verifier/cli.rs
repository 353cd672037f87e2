use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint};
use shard_common::BLOCK_SIZE;

/// Checks shard fraud proofs.
#[derive(Parser)]
#[command(version = shard_tool::version(), propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
    /// Size in bytes of a fraud proof. Must be a multiple of 8.
    #[arg(long, global = true, env = "SHARD_BLOCK_SIZE", default_value_t = BLOCK_SIZE)]
    pub(crate) block_size: usize,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Replays the transition of a fraud proof
    Verify(Input),
    /// Decodes a fraud proof without replaying it
    Inspect(Input),
}

#[derive(Args)]
pub(crate) struct Input {
    /// The file containing the proof. Read from stdin if absent.
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub(crate) file: Option<PathBuf>,
    /// The proof is hex encoded rather than raw bytes
    #[arg(long)]
    pub(crate) hex: bool,
}
