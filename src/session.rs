//! Per-connection session state and the progressive chunk-hash elimination rule, server
//! side: a session narrows a sorted snapshot of a size group down to zero or one surviving
//! candidate across repeated `CHECK_HASH` round-trips.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use crate::cache::{mtime_secs, HashCache};
use crate::chunk::{block_hash, blocks};
use crate::protocol::ChunkHashWire;
use crate::error::Result;

#[derive(Default)]
pub struct SessionTable {
    sessions: HashMap<String, VecDeque<PathBuf>>,
}

fn is_dense_prefix(chunks: &[ChunkHashWire]) -> bool {
    chunks.iter().enumerate().all(|(i, c)| c.serial as usize == i + 1)
}

fn wire_eq(a: &[ChunkHashWire], b: &[ChunkHashWire]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.hash == y.hash)
}

/// Fetches (extending as needed) candidate `p`'s chunk prefix and compares it against the
/// client's declared chunks. Returns `true` if `p` survives as a match for the overlapping
/// prefix.
fn candidate_matches(path: &Path, cache: &mut HashCache, client_chunks: &[ChunkHashWire]) -> Result<bool> {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return Ok(false),
    };
    let size = meta.len();
    if size == 0 {
        return Ok(false);
    }
    let mtime = mtime_secs(&meta);

    let (file_id, cached) = cache.get_file_details(path, size, mtime)?;
    let file_id = if file_id == -1 {
        cache.add_file(
            &path.parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default(),
            &path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            size,
            mtime,
        )?
    } else {
        Some(file_id)
    };

    let mut chunks: Vec<ChunkHashWire> = cached
        .unwrap_or_default()
        .into_iter()
        .map(|r| ChunkHashWire {
            serial: r.serial,
            block_size: r.block_size,
            hash: r.hash,
        })
        .collect();

    let common = chunks.len().min(client_chunks.len());
    if !wire_eq(&chunks[..common], &client_chunks[..common]) {
        return Ok(false);
    }

    let target_k = client_chunks.len().min(blocks(size) as usize);

    while chunks.len() < target_k {
        let serial = chunks.len() as u64 + 1;
        let (hash, read) = block_hash(path, serial)?;
        if let Some(id) = file_id {
            cache.add_chunk_hashes(id, &[(serial as u32, read, hash.clone())])?;
        }
        let mine = ChunkHashWire {
            serial: serial as u32,
            block_size: read,
            hash,
        };
        let matches = mine.hash == client_chunks[chunks.len()].hash;
        chunks.push(mine);
        if !matches {
            return Ok(false);
        }
    }

    let overlap = chunks.len().min(client_chunks.len());
    Ok(wire_eq(&chunks[..overlap], &client_chunks[..overlap]))
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the session for `request_id`, popping and rejecting candidates until one
    /// survives or the candidate list is exhausted. `own_path` is the requester's own path,
    /// excluded from matching in local mode. `client_chunks` must form a dense `1..k`
    /// prefix; a malformed array is treated as an immediate non-match for the current head.
    pub fn advance(
        &mut self,
        request_id: &str,
        local_mode: bool,
        own_path: &str,
        client_chunks: &[ChunkHashWire],
        cache: &mut HashCache,
        seed_candidates: impl FnOnce() -> Vec<PathBuf>,
    ) -> Result<Option<PathBuf>> {
        if !is_dense_prefix(client_chunks) {
            self.sessions.entry(request_id.to_string()).or_insert_with(VecDeque::new).pop_front();
            return Ok(None);
        }

        let queue = self
            .sessions
            .entry(request_id.to_string())
            .or_insert_with(|| VecDeque::from(seed_candidates()));

        loop {
            let candidate = match queue.front().cloned() {
                Some(c) => c,
                None => return Ok(None),
            };

            if local_mode && candidate == Path::new(own_path) {
                queue.pop_front();
                continue;
            }

            if candidate_matches(&candidate, cache, client_chunks)? {
                return Ok(Some(candidate));
            }

            queue.pop_front();
        }
    }

    pub fn drop_session(&mut self, request_id: &str) {
        self.sessions.remove(request_id);
    }
}
