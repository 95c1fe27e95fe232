//! Scanner engine: walks the sweep roots, compares each file against the server via
//! progressive chunk exchange, and accumulates a [`crate::report::ScanReport`] in memory.

use std::net::TcpStream;
use std::path::Path;

use log::debug;
use md5::{Digest, Md5};

use crate::cache::{mtime_secs, HashCache};
use crate::chunk::{block_hash, blocks, hex_encode};
use crate::config::ScannerConfig;
use crate::error::{Error, Result};
use crate::protocol::{recv_message, send_message, ChunkHashWire, Command, Message};
use crate::report::{ScanReport, ScanStat};
use crate::sizeindex::SizeIndex;

fn request_id(device_id: &str, path: &Path, session: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(format!("{device_id}-{}", path.display()).as_bytes());
    format!("{}-{}", hex_encode(&hasher.finalize()), session)
}

pub struct Scanner {
    config: ScannerConfig,
    cache: HashCache,
    stat: ScanStat,
}

impl Scanner {
    pub fn new(config: ScannerConfig, cache: HashCache) -> Self {
        let stat = ScanStat::new(config.max_scan, config.max_delete);
        Self { config, cache, stat }
    }

    pub fn run(mut self) -> Result<ScanReport> {
        let index = SizeIndex::build(&self.config.sweep_dirs);
        for size in index.sizes_descending() {
            for path in index.group(size) {
                self.stat.note_file(&path);
            }
        }
        for path in index.blanks() {
            self.stat.update_empty(&path.to_string_lossy());
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let mut stream = TcpStream::connect(&addr)?;
        let session_id = request_id(&self.config.id, Path::new("session"), "init");

        for size in index.sizes_descending() {
            let group = index.group(size);

            if !self.config.local_mode {
                let inquiry_id = format!("{}:{session_id}-size-inquiry-[{size}]", self.config.id);
                if !self.compare_size(&mut stream, &inquiry_id, "", size, false)? {
                    self.stat.on_scan(group.len() as u64);
                    continue;
                }
            }

            for path in group {
                if self.stat.reach_limit() {
                    let report = self.stat.into_report(
                        self.config.id.clone(),
                        self.config.local_mode,
                        addr.clone(),
                        self.config.sweep_dirs.clone(),
                    );
                    return Ok(report);
                }
                self.stat.on_scan(1);

                let path_str = path.to_string_lossy().into_owned();
                if self.config.local_mode && self.stat.skip_scan(&path_str) {
                    debug!("{path_str} SKIP");
                    continue;
                }

                let req_id = request_id(&self.config.id, &path, &session_id);
                match self.scan_one(&mut stream, &req_id, &path, size) {
                    Ok(()) => {}
                    Err(_) => self.stat.update_error(&path_str),
                }
            }
        }

        let report = self.stat.into_report(
            self.config.id.clone(),
            self.config.local_mode,
            addr,
            self.config.sweep_dirs.clone(),
        );
        Ok(report)
    }

    fn compare_size(
        &mut self,
        stream: &mut TcpStream,
        request_id: &str,
        path: &str,
        size: u64,
        local_mode: bool,
    ) -> Result<bool> {
        let req = Message::req_size(&self.config.id, request_id, local_mode, path, size);
        send_message(stream, &req)?;

        let echo = match recv_message(stream)? {
            Some(m) => m,
            None => return Ok(false),
        };
        if echo.command != Command::EchoCheckSize || echo.request_id != request_id || echo.size != Some(size) {
            return Err(Error::ProtocolMismatch {
                request_id: request_id.to_string(),
                expected: "echo_check_size",
                got: format!("{} (request_id={}, size={:?})", echo.command.as_str(), echo.request_id, echo.size),
            });
        }

        Ok(echo.result.and_then(|v| v.as_i64()).unwrap_or(0) > 0)
    }

    fn scan_one(&mut self, stream: &mut TcpStream, req_id: &str, path: &Path, size: u64) -> Result<()> {
        let path_str = path.to_string_lossy().into_owned();

        if !self.compare_size(stream, req_id, &path_str, size, self.config.local_mode)? {
            return Ok(());
        }

        let (file_id, cached) = self.cache.get_file_details(path, size, file_mtime(path)?)?;
        let file_id = if file_id == -1 {
            let dir = path.parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            self.cache.add_file(&dir, &name, size, file_mtime(path)?)?
        } else {
            Some(file_id)
        };

        let mut chunk_hashes: Vec<ChunkHashWire> = match cached {
            Some(rows) if !rows.is_empty() => rows
                .into_iter()
                .map(|r| ChunkHashWire { serial: r.serial, block_size: r.block_size, hash: r.hash })
                .collect(),
            _ => {
                let (hash, len) = block_hash(path, 1)?;
                self.stat.on_hash(len);
                if let Some(id) = file_id {
                    self.cache.add_chunk_hashes(id, &[(1, len, hash.clone())])?;
                }
                vec![ChunkHashWire { serial: 1, block_size: len, hash }]
            }
        };

        let total_blocks = blocks(size);

        loop {
            let req = Message::req_hash(&self.config.id, req_id, self.config.local_mode, &path_str, size, chunk_hashes.clone());
            send_message(stream, &req)?;

            let echo = match recv_message(stream)? {
                Some(m) => m,
                None => return Ok(()),
            };
            if echo.command != Command::EchoCheckHash || echo.request_id != req_id {
                return Err(Error::ProtocolMismatch {
                    request_id: req_id.to_string(),
                    expected: "echo_check_hash",
                    got: format!("{} (request_id={})", echo.command.as_str(), echo.request_id),
                });
            }

            let matched_path = match echo.result.as_ref().and_then(|v| v.as_str()) {
                Some(p) => p.to_string(),
                None => return Ok(()),
            };

            if chunk_hashes.len() as u64 == total_blocks {
                self.stat.on_duplicate(&echo.device_id, &matched_path, &chunk_hashes, &path_str, size, self.config.local_mode);
                return Ok(());
            }

            let serial = chunk_hashes.len() as u64 + 1;
            let (hash, len) = block_hash(path, serial)?;
            self.stat.on_hash(len);
            if let Some(id) = file_id {
                self.cache.add_chunk_hashes(id, &[(serial as u32, len, hash.clone())])?;
            }
            chunk_hashes.push(ChunkHashWire { serial: serial as u32, block_size: len, hash });
        }
    }
}

fn file_mtime(path: &Path) -> Result<f64> {
    let meta = std::fs::metadata(path)?;
    Ok(mtime_secs(&meta))
}
