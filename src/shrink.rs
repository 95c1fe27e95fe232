//! Shrink planner: reads back a scan report and deletes confirmed duplicate copies,
//! subject to a size sieve, a deletion-priority sieve, and (in erase mode) a whole-file
//! digest sieve verified against a randomly chosen authoritative original.

use std::net::TcpStream;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rand::seq::SliceRandom;

use crate::chunk::file_hash;
use crate::config::ShrinkerConfig;
use crate::error::Result;
use crate::protocol::{recv_message, send_message, Command, Message};
use crate::report::ScanReport;

#[derive(Debug, Default, Clone, Copy)]
pub struct ShrinkSummary {
    pub deleted: u64,
    pub freed_bytes: u64,
}

pub struct ShrinkPlanner {
    config: ShrinkerConfig,
    shrink_roots: Vec<PathBuf>,
    stream: Option<TcpStream>,
}

fn current_size(path: &str) -> Option<u64> {
    std::fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
}

fn parse_original(token: &str) -> Option<(String, String)> {
    let rest = token.strip_prefix("original@")?;
    let (server_id, path) = rest.split_once(':')?;
    Some((server_id.to_string(), path.to_string()))
}

fn parse_size_token(token: &str) -> Option<u64> {
    token.rsplit_once('-')?.1.parse().ok()
}

/// Keeps only the entries that lie under a declared shrink root, ordered by root priority
/// (earlier declared root first); a file under no root is dropped entirely.
fn sort_by_deletion_priority(paths: &[String], shrink_roots: &[PathBuf]) -> Vec<String> {
    let mut sorted = Vec::new();
    for root in shrink_roots {
        for path in paths {
            if sorted.contains(path) {
                continue;
            }
            if Path::new(path).starts_with(root) {
                sorted.push(path.clone());
            }
        }
    }
    sorted
}

impl ShrinkPlanner {
    pub fn new(config: ShrinkerConfig, shrink_roots: Vec<PathBuf>) -> Self {
        Self { config, shrink_roots, stream: None }
    }

    fn connect(&mut self) -> Result<()> {
        if self.stream.is_none() {
            let addr = format!("{}:{}", self.config.host, self.config.port);
            self.stream = Some(TcpStream::connect(addr)?);
        }
        Ok(())
    }

    /// Runs the full plan: blank-file pass (if enabled) then the duplicate-group sieve
    /// pipeline. `prompt` is consulted once per deletion when step mode is on.
    pub fn run(&mut self, report: &ScanReport, mut prompt: impl FnMut(&str) -> bool) -> Result<ShrinkSummary> {
        let mut summary = ShrinkSummary::default();

        if self.config.erase_blank {
            for path in &report.blank {
                if current_size(path) != Some(0) {
                    continue;
                }
                if self.config.step_mode && !prompt(&format!("[ZERO]delete: {path} ? (yes/no) [no]: ")) {
                    continue;
                }
                self.delete_file(path, true);
            }
        }

        if self.config.erase_mode {
            self.connect()?;
        }

        for (chunk_hash, entry) in &report.duplicate {
            if self.config.max_delete > 0 && summary.deleted >= self.config.max_delete {
                info!("shrink limit reached");
                break;
            }
            let group = self.shrink_group(chunk_hash, entry, report.local_mode, &mut prompt)?;
            summary.deleted += group.deleted;
            summary.freed_bytes += group.freed_bytes;
        }

        Ok(summary)
    }

    fn shrink_group(
        &mut self,
        chunk_hash: &str,
        entry: &[String],
        local_mode: bool,
        prompt: &mut impl FnMut(&str) -> bool,
    ) -> Result<ShrinkSummary> {
        let size = match entry.first().and_then(|t| parse_size_token(t)) {
            Some(s) => s,
            None => return Ok(ShrinkSummary::default()),
        };
        let (server_id, original_path) = match entry.get(1).and_then(|t| parse_original(t)) {
            Some(v) => v,
            None => return Ok(ShrinkSummary::default()),
        };

        if local_mode && current_size(&original_path) != Some(size) {
            return Ok(ShrinkSummary::default());
        }

        // First sieve: size.
        let mut pool: Vec<String> = entry[2..]
            .iter()
            .filter(|p| current_size(p) == Some(size))
            .cloned()
            .collect();
        if local_mode {
            pool.push(original_path.clone());
        }
        if pool.is_empty() {
            return Ok(ShrinkSummary::default());
        }

        // Second sieve: deletion priority / shrink-root membership.
        let deletable = sort_by_deletion_priority(&pool, &self.shrink_roots);

        let mut survivors = if self.config.erase_mode {
            let authoritative_path = if local_mode {
                let protected: Vec<&String> = pool.iter().filter(|p| !deletable.contains(p)).collect();
                let chosen = if !protected.is_empty() {
                    protected.choose(&mut rand::thread_rng()).copied()
                } else {
                    pool.choose(&mut rand::thread_rng())
                };
                match chosen {
                    Some(c) => c.clone(),
                    None => return Ok(ShrinkSummary::default()),
                }
            } else {
                original_path.clone()
            };

            let digest = match self.original_file_hash(chunk_hash, &server_id, &authoritative_path, size)? {
                Some(d) => d,
                None => return Ok(ShrinkSummary::default()),
            };

            // Third sieve: whole-file digest. The chosen authority is trivially retained.
            deletable
                .into_iter()
                .filter(|p| p == &authoritative_path || file_hash(Path::new(p)).as_deref() == Some(digest.as_str()))
                .collect::<Vec<_>>()
        } else {
            deletable
        };

        // Fourth sieve: re-sort survivors by deletion priority.
        survivors = sort_by_deletion_priority(&survivors, &self.shrink_roots);

        let copies = if local_mode {
            survivors.len().saturating_sub(1)
        } else {
            survivors.len()
        };

        let mut summary = ShrinkSummary::default();
        let mut iter = survivors.into_iter();
        while summary.deleted < copies as u64 {
            let file = match iter.next() {
                Some(f) => f,
                None => break,
            };
            if self.config.step_mode && !prompt(&format!("[DUPL]delete: {file} ? (yes/no) [no]: ")) {
                continue;
            }
            if self.delete_file(&file, false) {
                summary.deleted += 1;
                summary.freed_bytes += size;
            }
        }

        Ok(summary)
    }

    fn original_file_hash(&mut self, request_id: &str, server_id: &str, path: &str, size: u64) -> Result<Option<String>> {
        self.connect()?;
        let stream = match self.stream.as_mut() {
            Some(s) => s,
            None => return Ok(None),
        };

        let req = Message::req_file_hash(&self.config.id, server_id, request_id, path, size);
        send_message(stream, &req)?;

        let echo = match recv_message(stream)? {
            Some(m) => m,
            None => return Ok(None),
        };
        if echo.command != Command::EchoCalcFileHash || echo.request_id != request_id {
            return Ok(None);
        }

        Ok(echo.result.and_then(|v| v.as_str().map(str::to_string)))
    }

    fn delete_file(&self, path: &str, blank: bool) -> bool {
        let tag = if blank { "ZERO" } else { "DUPL" };
        if !self.config.erase_mode {
            debug!("[{tag}]removed-dry: {path}");
            return true;
        }
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!("[{tag}]removed: {path}");
                true
            }
            Err(e) => {
                warn!("[{tag}]failed: {path} -> {e}");
                false
            }
        }
    }

    /// Diagnostic `--parse` mode: tallies how many duplicate entries' files live under each
    /// directory, without deleting anything.
    pub fn parse_duplicate_directory(&self, report: &ScanReport) -> Vec<(String, u64)> {
        let mut counts = std::collections::BTreeMap::<String, u64>::new();

        for entry in report.duplicate.values() {
            if report.local_mode {
                if let Some((_, original_path)) = entry.get(1).and_then(|t| parse_original(t)) {
                    let dir = Path::new(&original_path)
                        .parent()
                        .map(|p| p.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    *counts.entry(dir).or_insert(0) += 1;
                }
            }
            for file in &entry[2..] {
                let dir = Path::new(file)
                    .parent()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                *counts.entry(dir).or_insert(0) += 1;
            }
        }

        counts.into_iter().collect()
    }
}
