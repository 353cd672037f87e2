use std::{process::ExitCode, sync::Arc};

use account_ee::account_executor;
use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use shard_bridge::{crypto::BlstVerifier, FraudProofLayout};
use shard_tool::{
    input::read_proof,
    report::{Inspection, Outcome},
};
use tracing::{error, info};

use self::fraud_verifier::*;
mod fraud_verifier {
    pub mod cli;
}

fn main() -> Result<ExitCode> {
    dotenv().ok();
    shard_tool::tracing::init();

    let args = cli::Cli::parse();
    let layout = FraudProofLayout::new(args.block_size).context("invalid block size")?;

    let outcome = match args.command {
        cli::Command::Verify(input) => {
            let data = read_proof(input.file.as_deref(), input.hex)?;
            let executor = account_executor(Arc::new(BlstVerifier));
            Outcome::from(shard_bridge::verify(&data, &executor, layout))
        }
        cli::Command::Inspect(input) => {
            let data = read_proof(input.file.as_deref(), input.hex)?;
            match shard_bridge::inspect(&data, layout) {
                Ok(proof) => {
                    println!("{}", serde_json::to_string_pretty(&Inspection::from(&proof))?);
                    return Ok(ExitCode::SUCCESS);
                }
                Err(e) => Outcome::Malformed {
                    reason: e.to_string(),
                },
            }
        }
    };

    match &outcome {
        Outcome::Verified(verified) => info!("Block {:x} replays", verified.block_root),
        Outcome::Fraud(fraud) => error!("Fraud: {fraud}"),
        Outcome::Malformed { reason } => error!("Unusable proof: {reason}"),
    }
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(outcome.exit_code())
}
