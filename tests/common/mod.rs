use std::path::PathBuf;

use lazy_static::lazy_static;

lazy_static! {
    pub static ref SERVER_BIN: PathBuf = assert_cmd::cargo::cargo_bin("dupe-server");
    pub static ref SCANNER_BIN: PathBuf = assert_cmd::cargo::cargo_bin("dupe-scan");
    pub static ref SHRINK_BIN: PathBuf = assert_cmd::cargo::cargo_bin("dupe-shrink");
}

/// Finds an unused TCP port by binding to port 0 and immediately releasing it. Good enough
/// for the short window between this call and the server binding the same port.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
