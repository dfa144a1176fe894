//! History command implementation.

use super::open_repository;
use std::path::Path;

/// Prints the history of `after_path`, oldest first.
pub fn run(dir: &Path, after_path: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let repository = open_repository(dir)?;
    let file = repository
        .file(after_path)?
        .ok_or_else(|| format!("No file {after_path} in store"))?;
    let entries = repository.history(after_path)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("{} (latest {})", file.after_path, file.latest_hash);
    for entry in &entries {
        println!(
            "  {}  {:<36}  {}  {} bytes",
            entry.date, entry.uuid, entry.hash, entry.file.size
        );
    }
    if file.has_open_conflict() {
        println!();
        println!("Open conflict:");
        for (key, staged) in &file.conflict.staging_files {
            println!("  {}  from {} at {}", key, staged.uuid, staged.date);
        }
    }
    Ok(())
}
