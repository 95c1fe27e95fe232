//! Server-side `size -> paths` index, built once at startup by walking the configured
//! sweep roots.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Immutable for the lifetime of the server process it belongs to.
#[derive(Debug, Default)]
pub struct SizeIndex {
    groups: BTreeMap<u64, Vec<PathBuf>>,
    blanks: Vec<PathBuf>,
}

fn is_eligible(path: &Path) -> bool {
    path.components()
        .all(|c| c.as_os_str() != "@eaDir")
}

impl SizeIndex {
    /// Walks every root in a single pass, grouping regular files with positive size whose
    /// path does not contain an `@eaDir` component, and separately collecting eligible
    /// zero-byte files for [`SizeIndex::blanks`].
    pub fn build<P: AsRef<Path>>(roots: &[P]) -> SizeIndex {
        let mut groups: BTreeMap<u64, Vec<PathBuf>> = BTreeMap::new();
        let mut blanks: Vec<PathBuf> = Vec::new();

        for root in roots {
            for entry in WalkDir::new(root.as_ref())
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let meta = match entry.metadata() {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                if !meta.is_file() || !is_eligible(entry.path()) {
                    continue;
                }
                if meta.len() == 0 {
                    blanks.push(entry.into_path());
                    continue;
                }
                groups.entry(meta.len()).or_default().push(entry.into_path());
            }
        }

        for paths in groups.values_mut() {
            paths.sort();
        }
        blanks.sort();

        SizeIndex { groups, blanks }
    }

    /// Eligible zero-byte files found while building the index; never grouped by size.
    pub fn blanks(&self) -> &[PathBuf] {
        &self.blanks
    }

    /// Number of indexed files of exactly `size` bytes.
    pub fn count(&self, size: u64) -> usize {
        self.groups.get(&size).map_or(0, |v| v.len())
    }

    /// Sorted snapshot of the paths indexed under `size`.
    pub fn group(&self, size: u64) -> Vec<PathBuf> {
        self.groups.get(&size).cloned().unwrap_or_default()
    }

    /// All distinct file sizes in the index, largest first (scanners process big files
    /// first for higher potential reclaim).
    pub fn sizes_descending(&self) -> Vec<u64> {
        self.groups.keys().rev().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn build_groups_by_size_and_diverts_empty_files_to_blanks() -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("a.bin"), b"12345")?;
        fs::write(dir.path().join("b.bin"), b"67890")?;
        fs::write(dir.path().join("c.bin"), b"xx")?;
        fs::write(dir.path().join("empty.bin"), b"")?;

        let index = SizeIndex::build(&[dir.path()]);
        assert_eq!(index.count(5), 2);
        assert_eq!(index.count(2), 1);
        assert_eq!(index.count(0), 0);
        assert_eq!(index.group(5).len(), 2);
        assert_eq!(index.blanks().len(), 1);
        assert_eq!(index.blanks()[0].file_name().unwrap(), "empty.bin");

        Ok(())
    }

    #[test]
    fn skips_ea_dir_component() -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let ea = dir.path().join("@eaDir");
        fs::create_dir(&ea)?;
        fs::write(ea.join("thumb.bin"), b"12345")?;
        fs::write(dir.path().join("real.bin"), b"12345")?;

        let index = SizeIndex::build(&[dir.path()]);
        assert_eq!(index.count(5), 1);
        assert_eq!(index.group(5)[0].file_name().unwrap(), "real.bin");

        Ok(())
    }

    #[test]
    fn sizes_descending_orders_largest_first() -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("small.bin"), vec![0u8; 3])?;
        fs::write(dir.path().join("big.bin"), vec![0u8; 30])?;

        let index = SizeIndex::build(&[dir.path()]);
        assert_eq!(index.sizes_descending(), vec![30, 3]);

        Ok(())
    }
}
