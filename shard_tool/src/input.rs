use std::{
    fs,
    io::{self, Read},
    path::Path,
};

use anyhow::{Context, Result};

/// Reads a fraud proof from `path`, or from stdin if there is none.
pub fn read_proof(path: Option<&Path>, is_hex: bool) -> Result<Vec<u8>> {
    let raw = match path {
        Some(path) => {
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?
        }
        None => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };

    match is_hex {
        true => decode_hex(&raw),
        false => Ok(raw),
    }
}

/// Decodes hex text, tolerating a leading `0x` and surrounding whitespace.
pub fn decode_hex(text: &[u8]) -> Result<Vec<u8>> {
    let text = std::str::from_utf8(text).context("hex input is not UTF-8")?;
    let text = text.trim();
    let digits = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(digits).context("invalid hex input")
}
