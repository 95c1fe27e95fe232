//! Length-prefixed JSON messages exchanged between scanner and server. Every message
//! is one flat JSON object; the field set used depends on which command it carries, which
//! is why [`Message`] keeps the rarely-used fields optional rather than modelling each
//! command as its own type.

use std::io::{Read, Write};
use std::net::TcpStream;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    CheckSize,
    EchoCheckSize,
    CheckHash,
    EchoCheckHash,
    CalcFileHash,
    EchoCalcFileHash,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::CheckSize => "check_size",
            Command::EchoCheckSize => "echo_check_size",
            Command::CheckHash => "check_hash",
            Command::EchoCheckHash => "echo_check_hash",
            Command::CalcFileHash => "calc_file_hash",
            Command::EchoCalcFileHash => "echo_calc_file_hash",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkHashWire {
    pub serial: u32,
    pub block_size: u64,
    pub hash: String,
}

/// One wire frame's payload. Optional fields are only present for the commands that use
/// them; absent fields are simply omitted from the serialized object rather than sent as
/// JSON `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub command: Command,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<Vec<ChunkHashWire>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl Message {
    pub fn req_size(device_id: &str, request_id: &str, local_mode: bool, path: &str, size: u64) -> Message {
        Message {
            command: Command::CheckSize,
            device_id: device_id.to_string(),
            server_id: None,
            request_id: request_id.to_string(),
            local_mode: Some(local_mode),
            path: Some(path.to_string()),
            size: Some(size),
            hashes: None,
            result: None,
        }
    }

    pub fn echo_size(device_id: &str, request_id: &str, size: u64, files: i64) -> Message {
        Message {
            command: Command::EchoCheckSize,
            device_id: device_id.to_string(),
            server_id: None,
            request_id: request_id.to_string(),
            local_mode: None,
            path: None,
            size: Some(size),
            hashes: None,
            result: Some(serde_json::Value::from(files)),
        }
    }

    pub fn req_hash(
        device_id: &str,
        request_id: &str,
        local_mode: bool,
        path: &str,
        size: u64,
        chunk_hashes: Vec<ChunkHashWire>,
    ) -> Message {
        Message {
            command: Command::CheckHash,
            device_id: device_id.to_string(),
            server_id: None,
            request_id: request_id.to_string(),
            local_mode: Some(local_mode),
            path: Some(path.to_string()),
            size: Some(size),
            hashes: Some(chunk_hashes),
            result: None,
        }
    }

    pub fn echo_hash(device_id: &str, request_id: &str, path: Option<&str>) -> Message {
        Message {
            command: Command::EchoCheckHash,
            device_id: device_id.to_string(),
            server_id: None,
            request_id: request_id.to_string(),
            local_mode: None,
            path: None,
            size: None,
            hashes: None,
            result: path.map(|p| serde_json::Value::from(p.to_string())),
        }
    }

    pub fn req_file_hash(device_id: &str, server_id: &str, request_id: &str, path: &str, size: u64) -> Message {
        Message {
            command: Command::CalcFileHash,
            device_id: device_id.to_string(),
            server_id: Some(server_id.to_string()),
            request_id: request_id.to_string(),
            local_mode: None,
            path: Some(path.to_string()),
            size: Some(size),
            hashes: None,
            result: None,
        }
    }

    pub fn echo_file_hash(device_id: &str, request_id: &str, digest: Option<&str>) -> Message {
        Message {
            command: Command::EchoCalcFileHash,
            device_id: device_id.to_string(),
            server_id: None,
            request_id: request_id.to_string(),
            local_mode: None,
            path: None,
            size: None,
            hashes: None,
            result: digest.map(|d| serde_json::Value::from(d.to_string())),
        }
    }
}

/// Sends one length-prefixed JSON frame. A write failure closes the logical session from
/// the caller's perspective; the caller is expected to drop the stream.
pub fn send_message(stream: &mut TcpStream, message: &Message) -> Result<()> {
    let raw = serde_json::to_vec(message)?;
    let len = u32::try_from(raw.len()).map_err(|_| Error::FrameError)?;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(&raw)?;
    Ok(())
}

/// Receives one length-prefixed JSON frame. Returns `Ok(None)` on a clean EOF before any
/// length byte was read (the peer closed the connection); any other short read or malformed
/// payload is a [`Error::FrameError`].
pub fn recv_message(stream: &mut TcpStream) -> Result<Option<Message>> {
    let mut len_buf = [0u8; 4];
    if !read_exact_or_eof(stream, &mut len_buf)? {
        return Ok(None);
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).map_err(|_| Error::FrameError)?;

    let message = serde_json::from_slice(&data).map_err(|_| Error::FrameError)?;
    Ok(Some(message))
}

/// Like [`Read::read_exact`], but an EOF on the very first byte reports `Ok(false)` instead
/// of an error, while a partial read past that point is still an error.
fn read_exact_or_eof(stream: &mut TcpStream, buf: &mut [u8]) -> Result<bool> {
    let mut read = 0;
    while read < buf.len() {
        let n = stream.read(&mut buf[read..])?;
        if n == 0 {
            return if read == 0 {
                Ok(false)
            } else {
                Err(Error::FrameError)
            };
        }
        read += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn framing_roundtrip_preserves_message() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;

        let mut client = TcpStream::connect(addr)?;
        let (mut server, _) = listener.accept()?;

        let sent = Message::req_hash(
            "dev-1",
            "req-1",
            true,
            "/a/b.bin",
            1024,
            vec![ChunkHashWire {
                serial: 1,
                block_size: 1024,
                hash: "deadbeef".into(),
            }],
        );
        send_message(&mut client, &sent)?;

        let received = recv_message(&mut server)?.unwrap();
        assert_eq!(received.command, Command::CheckHash);
        assert_eq!(received.device_id, "dev-1");
        assert_eq!(received.request_id, "req-1");
        assert_eq!(received.local_mode, Some(true));
        assert_eq!(received.path.as_deref(), Some("/a/b.bin"));
        assert_eq!(received.hashes.unwrap()[0].hash, "deadbeef");

        Ok(())
    }

    #[test]
    fn recv_on_clean_close_yields_none() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;

        let client = TcpStream::connect(addr)?;
        let (mut server, _) = listener.accept()?;
        drop(client);

        assert!(recv_message(&mut server)?.is_none());
        Ok(())
    }

    #[test]
    fn echo_size_omits_absent_optional_fields() -> Result<()> {
        let msg = Message::echo_size("srv-1", "req-2", 2048, 3);
        let json = serde_json::to_value(&msg)?;
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("path"));
        assert!(!obj.contains_key("hashes"));
        assert!(!obj.contains_key("local_mode"));
        assert_eq!(obj["result"], serde_json::json!(3));
        Ok(())
    }

    #[test]
    fn echo_hash_result_nil_when_no_match() {
        let msg = Message::echo_hash("srv-1", "req-3", None);
        let json = serde_json::to_value(&msg).unwrap();
        assert!(!json.as_object().unwrap().contains_key("result"));
    }
}
