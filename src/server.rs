//! TCP server engine: accepts one client at a time, each connection gets a fresh
//! session map, and dispatches the three wire commands.

use std::net::{TcpListener, TcpStream};
use std::path::Path;

use log::{debug, info, warn};

use crate::cache::HashCache;
use crate::chunk::file_hash;
use crate::error::Result;
use crate::protocol::{recv_message, send_message, Command, Message};
use crate::session::SessionTable;
use crate::sizeindex::SizeIndex;

pub struct Server {
    id: String,
    index: SizeIndex,
    cache: HashCache,
}

impl Server {
    pub fn new(id: String, index: SizeIndex, cache: HashCache) -> Self {
        Self { id, index, cache }
    }

    /// Binds `addr` and serves connections forever, one at a time.
    pub fn run(&mut self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)?;
        info!("{} listening on {addr}", self.id);

        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!("failed to accept connection: {e}");
                    continue;
                }
            };
            if let Err(e) = self.handle_connection(stream) {
                warn!("connection ended with error: {e}");
            }
        }

        Ok(())
    }

    /// Serves a single already-accepted connection to completion. Exposed at crate
    /// visibility so scanner-side integration tests can drive a server without a full
    /// `run()` loop.
    pub(crate) fn handle_connection(&mut self, mut stream: TcpStream) -> Result<()> {
        let mut sessions = SessionTable::new();

        loop {
            let message = match recv_message(&mut stream)? {
                Some(m) => m,
                None => return Ok(()),
            };
            debug!("{} <<<--- {:?}", self.id, message.command);

            let reply = match message.command {
                Command::CheckSize => self.handle_check_size(&message),
                Command::CheckHash => self.handle_check_hash(&message, &mut sessions)?,
                Command::CalcFileHash => self.handle_calc_file_hash(&message),
                _ => {
                    debug!("{} closing connection on unexpected command", self.id);
                    return Ok(());
                }
            };

            send_message(&mut stream, &reply)?;
        }
    }

    fn handle_check_size(&self, message: &Message) -> Message {
        let size = message.size.unwrap_or(0);
        let local_mode = message.local_mode.unwrap_or(false);
        let path = message.path.clone().unwrap_or_default();

        let mut count = self.index.count(size) as i64;
        if local_mode && self.index.group(size).iter().any(|p| p == Path::new(&path)) {
            count -= 1;
        }

        Message::echo_size(&self.id, &message.request_id, size, count)
    }

    fn handle_check_hash(&mut self, message: &Message, sessions: &mut SessionTable) -> Result<Message> {
        let size = message.size.unwrap_or(0);
        let local_mode = message.local_mode.unwrap_or(false);
        let own_path = message.path.clone().unwrap_or_default();
        let hashes = message.hashes.clone().unwrap_or_default();

        let index = &self.index;
        let group = index.group(size);
        let matched = sessions.advance(&message.request_id, local_mode, &own_path, &hashes, &mut self.cache, || group)?;

        let path_str = matched.map(|p| p.to_string_lossy().into_owned());
        Ok(Message::echo_hash(&self.id, &message.request_id, path_str.as_deref()))
    }

    fn handle_calc_file_hash(&self, message: &Message) -> Message {
        let digest = message
            .server_id
            .as_deref()
            .filter(|sid| *sid == self.id)
            .and_then(|_| {
                let path = message.path.as_deref()?;
                let size = message.size?;
                let meta = std::fs::metadata(path).ok()?;
                if meta.len() != size {
                    return None;
                }
                file_hash(Path::new(path))
            });

        Message::echo_file_hash(&self.id, &message.request_id, digest.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChunkHashWire;
    use std::fs;
    use std::thread;

    fn spawn_server(dir: &Path) -> (std::net::SocketAddr, thread::JoinHandle<()>) {
        let index = SizeIndex::build(&[dir]);
        let cache = HashCache::open_in_memory().unwrap();
        let mut server = Server::new("srv-1".into(), index, cache);

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                let _ = server.handle_connection(stream);
            }
        });

        (addr, handle)
    }

    #[test]
    fn check_size_reports_group_count() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.bin"), b"12345").unwrap();
        fs::write(dir.path().join("b.bin"), b"67890").unwrap();

        let (addr, handle) = spawn_server(dir.path());
        let mut client = TcpStream::connect(addr).unwrap();

        let req = Message::req_size("dev-1", "req-1", false, "/x/c.bin", 5);
        send_message(&mut client, &req).unwrap();
        let reply = recv_message(&mut client).unwrap().unwrap();

        assert_eq!(reply.command, Command::EchoCheckSize);
        assert_eq!(reply.result, Some(serde_json::json!(2)));

        drop(client);
        handle.join().unwrap();
    }

    #[test]
    fn check_hash_matches_single_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        fs::write(&path, b"hello").unwrap();

        let (addr, handle) = spawn_server(dir.path());
        let mut client = TcpStream::connect(addr).unwrap();

        let (digest, _) = crate::chunk::block_hash(&path, 1).unwrap();
        let req = Message::req_hash(
            "dev-1",
            "req-1",
            false,
            "/elsewhere/a.bin",
            5,
            vec![ChunkHashWire { serial: 1, block_size: 5, hash: digest }],
        );
        send_message(&mut client, &req).unwrap();
        let reply = recv_message(&mut client).unwrap().unwrap();

        assert_eq!(reply.command, Command::EchoCheckHash);
        let result_path = reply.result.unwrap();
        assert!(result_path.as_str().unwrap().ends_with("a.bin"));

        drop(client);
        handle.join().unwrap();
    }

    #[test]
    fn unknown_command_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, handle) = spawn_server(dir.path());
        let mut client = TcpStream::connect(addr).unwrap();

        let mut bad = Message::echo_hash("dev-1", "req-1", None);
        bad.command = Command::EchoCheckHash;
        send_message(&mut client, &bad).unwrap();

        // Server treats a reply-only command from a client as unexpected and closes.
        let reply = recv_message(&mut client).unwrap();
        assert!(reply.is_none());

        drop(client);
        handle.join().unwrap();
    }
}
