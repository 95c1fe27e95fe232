use std::fs;
use std::io::Write as _;
use std::net::TcpStream;
use std::process::{Child, Command as StdCommand};
use std::time::Duration;

use anyhow::Result;
use assert_cmd::Command;
use assert_fs::fixture::PathChild;
use assert_fs::TempDir;
use predicates::str::contains;

mod common;

struct ServerGuard(Child);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn wait_for_port(port: u16) {
    for _ in 0..50 {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("server never started listening on port {port}");
}

fn spawn_server(yaml_path: &std::path::Path) -> ServerGuard {
    let child = StdCommand::new(&*common::SERVER_BIN)
        .arg("--yaml")
        .arg(yaml_path)
        .spawn()
        .expect("failed to spawn dupe-server");
    ServerGuard(child)
}

/// Two byte-identical 100-byte files under two different roots are recognized as duplicates
/// across a real scanner/server TCP session.
#[test]
fn scanner_finds_cross_host_duplicate() -> Result<()> {
    let temp = TempDir::new()?;
    let server_root = temp.child("server_root");
    let scanner_root = temp.child("scanner_root");
    fs::create_dir_all(&server_root)?;
    fs::create_dir_all(&scanner_root)?;

    let content = vec![9u8; 100];
    fs::write(server_root.join("x.bin"), &content)?;
    fs::write(scanner_root.join("x.bin"), &content)?;

    let port = common::free_port();

    let server_yaml = temp.child("server.yaml");
    let mut f = fs::File::create(&server_yaml)?;
    writeln!(f, "sweep_dirs: [{}]", server_root.display())?;
    writeln!(f, "id: srv-test")?;
    writeln!(f, "bind: 127.0.0.1:{port}")?;
    writeln!(f, "hash_db: {}", temp.child("server_cache.sqlite").display())?;
    drop(f);

    let _server = spawn_server(&server_yaml);
    wait_for_port(port);

    let scanner_yaml = temp.child("scanner.yaml");
    let mut f = fs::File::create(&scanner_yaml)?;
    writeln!(f, "sweep_dirs: [{}]", scanner_root.display())?;
    writeln!(f, "id: scan-test")?;
    writeln!(f, "server: 127.0.0.1:{port}")?;
    writeln!(f, "hash_db: {}", temp.child("scanner_cache.sqlite").display())?;
    drop(f);

    let report_suffix = "cli-test";
    let report_path = format!("sweeper.{report_suffix}.yaml");
    let _ = fs::remove_file(&report_path);

    Command::new(&*common::SCANNER_BIN)
        .arg("--yaml")
        .arg(&*scanner_yaml)
        .env("DUPE_SWEEPER_REPORT_SUFFIX", report_suffix)
        .assert()
        .success();

    let report_text = fs::read_to_string(&report_path)?;
    fs::remove_file(&report_path).ok();

    let report: dupe_sweeper::report::ScanReport = serde_yaml::from_str(&report_text)?;
    assert_eq!(report.duplicate.len(), 1);

    let entry = report.duplicate.values().next().unwrap();
    assert!(entry[1].starts_with("original@srv-test:"));
    assert!(entry[1].ends_with("x.bin"));
    assert!(entry[2].ends_with("x.bin"));

    Ok(())
}

#[test]
fn scanner_binary_rejects_missing_config() {
    Command::new(&*common::SCANNER_BIN)
        .arg("--yaml")
        .arg("/does/not/exist.yaml")
        .assert()
        .failure()
        .stderr(contains("Error"));
}

#[test]
fn shrink_binary_dry_run_never_deletes() -> Result<()> {
    let temp = TempDir::new()?;
    let copy = temp.child("copy.bin");
    fs::write(&copy, vec![3u8; 10])?;
    let orig = temp.child("orig.bin");
    fs::write(&orig, vec![3u8; 10])?;

    let report_path = temp.child("report.yaml");
    let yaml = format!(
        "id: shrink-test\nlocal_mode: false\nserver: 127.0.0.1:5555\nsweep_dirs: [{}]\nstat:\n  total: \"1 files\"\n  freed: \"0.00 B from 0 files\"\n  hashed: \"0.00 B\"\nscanned_dirs: []\nfile_extensions: []\nerror: []\nblank: []\nduplicate:\n  deadbeef:\n    - \"10.00 B-10\"\n    - \"original@srv-1:{}\"\n    - \"{}\"\n",
        temp.path().display(),
        orig.path().display(),
        copy.path().display(),
    );
    fs::write(&report_path, yaml)?;

    Command::new(&*common::SHRINK_BIN)
        .arg("--yaml")
        .arg(&*report_path)
        .arg("--auto")
        .assert()
        .success();

    assert!(copy.path().exists(), "dry run (no --erase) must never delete");

    Ok(())
}
