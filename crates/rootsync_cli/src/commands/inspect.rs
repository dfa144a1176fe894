//! Inspect command implementation.

use super::open_repository;
use rootsync_server::Repository;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Store log size in bytes.
    pub log_size: u64,
    /// Registered clients.
    pub clients: usize,
    /// Registered root directories.
    pub root_dirs: usize,
    /// Tracked files.
    pub files: usize,
    /// Files with an open conflict.
    pub open_conflicts: usize,
    /// Share links.
    pub share_links: usize,
    /// Share links with no redemptions left.
    pub exhausted_links: usize,
    /// Root directories with their member count.
    pub roots: Vec<RootStats>,
}

/// Statistics for a single root directory.
#[derive(Debug, Serialize)]
pub struct RootStats {
    /// Server-side path.
    pub after_path: String,
    /// Owning client.
    pub owner: String,
    /// Number of authorized clients.
    pub members: usize,
    /// Number of files under the root.
    pub files: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let repository = open_repository(path)?;
    let mut result = collect(&repository)?;
    result.path = path.display().to_string();
    result.log_size = std::fs::metadata(path.join("store.log"))?.len();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn collect(repository: &Repository) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let files = repository.files()?;
    let sharings = repository.sharings()?;
    let roots = repository
        .root_dirs()?
        .into_iter()
        .map(|root| RootStats {
            files: files
                .iter()
                .filter(|f| f.root_dir_key == root.after_path)
                .count(),
            members: root.uuids.len(),
            after_path: root.after_path,
            owner: root.owner,
        })
        .collect::<Vec<_>>();

    Ok(InspectResult {
        path: String::new(),
        log_size: 0,
        clients: repository.clients()?.len(),
        root_dirs: roots.len(),
        files: files.len(),
        open_conflicts: files.iter().filter(|f| f.has_open_conflict()).count(),
        share_links: sharings.len(),
        exhausted_links: sharings.iter().filter(|s| s.is_exhausted()).count(),
        roots,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!();
    println!("Log size:        {} bytes", result.log_size);
    println!("Clients:         {}", result.clients);
    println!("Root dirs:       {}", result.root_dirs);
    println!("Files:           {}", result.files);
    println!("Open conflicts:  {}", result.open_conflicts);
    println!(
        "Share links:     {} ({} exhausted)",
        result.share_links, result.exhausted_links
    );

    if !result.roots.is_empty() {
        println!();
        println!("Root directories:");
        for root in &result.roots {
            println!(
                "  {} owner={} members={} files={}",
                root.after_path, root.owner, root.members, root.files
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootsync_protocol::{Conflict, File, FileHistory, RootDirectory, Sharing};
    use rootsync_storage::InMemoryStore;
    use std::sync::Arc;

    #[test]
    fn collect_counts_records() {
        let repository = Repository::new(Arc::new(InMemoryStore::new()));
        repository
            .put_root_dir(&RootDirectory {
                after_path: "/r".into(),
                owner: "c1".into(),
                uuids: vec!["c1".into(), "c2".into()],
                ..RootDirectory::default()
            })
            .unwrap();
        let mut conflict = Conflict::new("/r/b");
        conflict.stage(FileHistory {
            hash: "x".into(),
            ..FileHistory::default()
        });
        for (path, conflict) in [("/r/a", Conflict::new("/r/a")), ("/r/b", conflict)] {
            repository
                .put_file(&File {
                    after_path: path.into(),
                    root_dir_key: "/r".into(),
                    conflict,
                    ..File::default()
                })
                .unwrap();
        }
        repository
            .put_sharing(&Sharing {
                link: "l1".into(),
                count: 1,
                max_count: 1,
                ..Sharing::default()
            })
            .unwrap();

        let result = collect(&repository).unwrap();
        assert_eq!(result.files, 2);
        assert_eq!(result.open_conflicts, 1);
        assert_eq!(result.exhausted_links, 1);
        assert_eq!(result.roots[0].members, 2);
        assert_eq!(result.roots[0].files, 2);
    }
}
