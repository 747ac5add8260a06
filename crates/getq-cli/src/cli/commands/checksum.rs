//! `getq checksum <path>` – SHA-256 of a downloaded file.

use anyhow::Result;
use getq_core::checksum;
use std::path::Path;

pub fn run_checksum(path: &Path) -> Result<()> {
    let digest = checksum::sha256_file(path)?;
    println!("{digest}  {}", path.display());
    Ok(())
}
