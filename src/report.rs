//! In-memory scan bookkeeping and the YAML scan report shape. Duplicate groups are
//! merged the way a single scan run accumulates them: first sighting registers the size
//! token and the original, later sightings append copies.

use std::collections::BTreeMap;
use std::path::Path;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::chunk::hex_encode;
use crate::protocol::ChunkHashWire;

/// Human-readable byte count, e.g. `"1.23 MB"`.
pub fn readable_size(num_bytes: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = num_bytes as f64;
    for unit in &units {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}

#[derive(Debug, Default)]
pub struct ScanStat {
    important_files: u64,
    scanned: u64,
    deleted: u64,
    shrink_bytes: u64,
    hash_bytes: u64,
    max_scan: u64,
    max_delete: u64,
    extensions: std::collections::BTreeSet<String>,
    errors: Vec<String>,
    blank: Vec<String>,
    duplicate: BTreeMap<String, Vec<String>>,
}

impl ScanStat {
    pub fn new(max_scan: u64, max_delete: u64) -> Self {
        Self {
            max_scan,
            max_delete,
            ..Default::default()
        }
    }

    pub fn note_file(&mut self, path: &Path) {
        self.important_files += 1;
        if let Some(ext) = path.extension() {
            self.extensions.insert(ext.to_string_lossy().to_lowercase());
        }
    }

    pub fn update_empty(&mut self, path: &str) {
        self.blank.push(path.to_string());
    }

    pub fn update_error(&mut self, path: &str) {
        if !self.errors.iter().any(|p| p == path) {
            self.errors.push(path.to_string());
        }
    }

    pub fn on_scan(&mut self, count: u64) {
        self.scanned += count;
    }

    pub fn on_hash(&mut self, size: u64) {
        self.hash_bytes += size;
    }

    pub fn reach_limit(&self) -> bool {
        (self.max_scan > 0 && self.scanned >= self.max_scan)
            || (self.max_delete > 0 && self.deleted >= self.max_delete)
    }

    pub fn skip_scan(&self, path: &str) -> bool {
        self.duplicate.values().any(|entry| {
            entry
                .get(1)
                .map(|original| strip_original_prefix(original) == path)
                .unwrap_or(false)
        })
    }

    /// Merges one confirmed match into the duplicate map. Returns `true` if `client_path`
    /// was newly recorded as a deletable copy (as opposed to being absorbed as, or
    /// recognized as, the original).
    #[allow(clippy::too_many_arguments)]
    pub fn on_duplicate(
        &mut self,
        server_id: &str,
        server_path: &str,
        chunk_hashes: &[ChunkHashWire],
        client_path: &str,
        free_space: u64,
        local_mode: bool,
    ) -> bool {
        let key = duplicate_key(chunk_hashes);

        let entry = self.duplicate.entry(key).or_insert_with(|| {
            vec![
                format!("{}-{}", readable_size(free_space), free_space),
                format!("original@{server_id}:{server_path}"),
            ]
        });

        let recorded = if entry.len() == 2 || !local_mode {
            entry.push(client_path.to_string());
            true
        } else {
            if let Some(original) = entry.get_mut(1) {
                *original = strip_original_prefix(original).to_string();
            }
            if !entry[1..].iter().any(|p| p == client_path) {
                entry.push(client_path.to_string());
                true
            } else {
                false
            }
        };

        if recorded {
            self.deleted += 1;
            self.shrink_bytes += free_space;
        }

        recorded
    }

    /// `scanned_dirs` records the actual roots this run walked (diagnostic); `sweep_dirs`
    /// is left as a placeholder hint for the human who edits the report into a shrinker
    /// config, naming the directories duplicates may be deleted from.
    pub fn into_report(self, id: String, local_mode: bool, server: String, scanned_dirs: Vec<String>) -> ScanReport {
        ScanReport {
            id,
            local_mode,
            server,
            sweep_dirs: vec!["*** absolute path in which duplicate files will be deleted ***".to_string()],
            stat: StatBlock {
                total: format!("{} files", self.important_files),
                freed: format!("{} from {} files", readable_size(self.shrink_bytes), self.deleted),
                hashed: readable_size(self.hash_bytes),
            },
            scanned_dirs,
            file_extensions: self.extensions.into_iter().collect(),
            error: self.errors,
            blank: self.blank,
            duplicate: self.duplicate,
        }
    }
}

fn strip_original_prefix(token: &str) -> &str {
    token
        .split_once(':')
        .map(|(_, path)| path)
        .unwrap_or(token)
}

fn duplicate_key(chunk_hashes: &[ChunkHashWire]) -> String {
    let joined = chunk_hashes
        .iter()
        .map(|c| c.hash.as_str())
        .collect::<Vec<_>>()
        .join("-");
    let mut hasher = Md5::new();
    hasher.update(joined.as_bytes());
    hex_encode(&hasher.finalize())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatBlock {
    pub total: String,
    pub freed: String,
    pub hashed: String,
}

/// The YAML shape a scanner run writes, and a shrinker run reads back.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanReport {
    pub id: String,
    pub local_mode: bool,
    pub server: String,
    pub sweep_dirs: Vec<String>,
    pub stat: StatBlock,
    pub scanned_dirs: Vec<String>,
    pub file_extensions: Vec<String>,
    pub error: Vec<String>,
    pub blank: Vec<String>,
    pub duplicate: BTreeMap<String, Vec<String>>,
}
