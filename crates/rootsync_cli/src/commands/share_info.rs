//! Share-info command implementation.

use super::open_repository;
use std::path::Path;

/// Prints a share link without redeeming it.
pub fn run(dir: &Path, link: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let repository = open_repository(dir)?;
    let sharing = repository
        .sharing(link)?
        .ok_or_else(|| format!("No share link {link}"))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&sharing)?),
        _ => {
            println!("Link:      {}", sharing.link);
            println!("Owner:     {}", sharing.owner);
            println!("File:      {}", sharing.file.after_path);
            println!("Hash:      {}", sharing.file.latest_hash);
            println!(
                "Downloads: {}/{} ({} left)",
                sharing.count,
                sharing.max_count,
                sharing.remaining()
            );
        }
    }
    Ok(())
}
