//! Deterministic partition of a file into a head chunk plus fixed-size body chunks, and
//! the digest of each. This is the single place the byte-range math is allowed to live.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use md5::{Digest, Md5};

use crate::error::Result;

/// Size of chunk serial 1, in bytes.
pub const HEAD: u64 = 128 * 1024;
/// Size of chunk serials 2.., in bytes, before clipping to EOF.
pub const BODY: u64 = 64 * 1024 * 1024;
/// Streaming read granularity used while hashing a chunk.
pub const READ: usize = 256 * 1024;

/// Total number of chunks a file of `size` bytes partitions into.
///
/// Panics if `size == 0`; callers are expected to have already filtered out empty files
/// (the size index and scanner both exclude zero-length files before this is ever called).
pub fn blocks(size: u64) -> u64 {
    assert!(size > 0, "blocks() called on a zero-length file");

    if size <= HEAD {
        1
    } else {
        1 + (size - HEAD).div_ceil(BODY)
    }
}

/// Byte length of chunk `serial` (1-based) of a file of `size` bytes. Returns 0 for a
/// serial past the end of the file.
pub fn block_size(size: u64, serial: u64) -> u64 {
    assert!(serial >= 1);

    if serial == 1 {
        size.min(HEAD)
    } else {
        let offset = HEAD + (serial - 2) * BODY;
        if offset >= size {
            0
        } else {
            (size - offset).min(BODY)
        }
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn block_start(serial: u64) -> u64 {
    if serial == 1 {
        0
    } else {
        HEAD + (serial - 2) * BODY
    }
}

/// Hashes chunk `serial` of the file at `path`, returning its lower-case hex MD5 and the
/// number of bytes actually read. Truncation (EOF before the nominal chunk end) is not an
/// error — the digest covers whatever bytes were present. The nominal cap is `HEAD` for
/// serial 1 and `BODY` for every later serial; the real file-size clipping described by
/// `block_size` falls naturally out of hitting EOF rather than being computed up front.
pub fn block_hash(path: &Path, serial: u64) -> Result<(String, u64)> {
    let nominal = if serial == 1 { HEAD } else { BODY };

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(block_start(serial)))?;

    let mut hasher = Md5::new();
    let mut buf = [0u8; READ];
    let mut read_total = 0u64;

    while read_total < nominal {
        let want = READ.min((nominal - read_total) as usize);
        let n = file.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        read_total += n as u64;
    }

    Ok((hex_encode(&hasher.finalize()), read_total))
}

/// Streams the full file at `path` and returns its lower-case hex MD5, or `None` if the
/// file cannot be opened or read.
pub fn file_hash(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; READ];

    loop {
        let n = file.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Some(hex_encode(&hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn blocks_matches_rule() {
        assert_eq!(blocks(1), 1);
        assert_eq!(blocks(HEAD), 1);
        assert_eq!(blocks(HEAD + 1), 2);
        assert_eq!(blocks(HEAD + BODY), 2);
        assert_eq!(blocks(HEAD + BODY + 1), 3);
        assert_eq!(blocks(HEAD + 3 * BODY), 4);
    }

    #[test]
    fn block_size_sums_to_file_size() {
        for size in [1u64, HEAD, HEAD + 1, HEAD + BODY, HEAD + BODY + 10, HEAD + 3 * BODY] {
            let k = blocks(size);
            let sum: u64 = (1..=k).map(|s| block_size(size, s)).sum();
            assert_eq!(sum, size, "size={size}");
            assert_eq!(block_size(size, 1), size.min(HEAD));
            for s in 2..=k {
                assert!(block_size(size, s) <= BODY);
            }
            assert_eq!(block_size(size, k + 1), 0);
        }
    }

    #[test]
    fn block_hash_and_file_hash_agree_on_single_chunk_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello rust")?;

        let (chunk_digest, read) = block_hash(&path, 1)?;
        assert_eq!(read, 10);
        assert_eq!(chunk_digest, file_hash(&path).unwrap());

        Ok(())
    }

    #[test]
    fn block_hash_truncation_is_not_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("f.bin");
        let mut f = File::create(&path)?;
        f.write_all(&vec![7u8; 10])?;
        drop(f);

        // The file is shorter than HEAD; block_hash must stop at EOF without error.
        let (digest, read) = block_hash(&path, 1)?;
        assert_eq!(read, 10);
        assert_eq!(digest, file_hash(&path).unwrap());

        Ok(())
    }

    #[test]
    fn file_hash_none_on_missing_file() {
        assert!(file_hash(Path::new("/does/not/exist")).is_none());
    }
}
