//! Compact command implementation.

use rootsync_storage::FileStore;
use std::path::Path;

/// Compacts the store log at `dir`.
pub fn run(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let log = dir.join("store.log");
    if !log.exists() {
        return Err(format!("No store found at {:?}", dir).into());
    }

    let before = std::fs::metadata(&log)?.len();
    let store = FileStore::open(dir)?;
    store.compact()?;
    let after = std::fs::metadata(&log)?.len();

    println!("Compacted {:?}", dir);
    println!("  Live entries: {}", store.len());
    println!("  Size before:  {} bytes", before);
    println!("  Size after:   {} bytes", after);
    println!("  Space saved:  {} bytes", before.saturating_sub(after));
    Ok(())
}
