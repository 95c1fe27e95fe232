//! YAML configuration structs shared by the three binaries, plus random id
//! generation for the `id` key when a config file omits it.

use std::fs::File;
use std::path::Path;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;

use crate::error::Result;

const DEFAULT_PORT: u16 = 5555;

fn random_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(char::from)
        .collect();
    format!("{prefix}-{suffix}")
}

fn split_host_port(addr: &str) -> (String, u16) {
    match addr.split_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(DEFAULT_PORT)),
        None => (addr.to_string(), DEFAULT_PORT),
    }
}

#[derive(Debug, Deserialize)]
struct RawServerConfig {
    sweep_dirs: Vec<String>,
    id: Option<String>,
    bind: String,
    hash_db: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub sweep_dirs: Vec<String>,
    pub id: String,
    pub host: String,
    pub port: u16,
    pub hash_db: String,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw: RawServerConfig = serde_yaml::from_reader(File::open(path)?)?;
        let (host, port) = split_host_port(&raw.bind);
        Ok(Self {
            sweep_dirs: raw.sweep_dirs,
            id: raw.id.unwrap_or_else(|| random_id("server")),
            host,
            port,
            hash_db: raw.hash_db,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawClientConfig {
    sweep_dirs: Vec<String>,
    id: Option<String>,
    server: String,
    hash_db: String,
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub sweep_dirs: Vec<String>,
    pub id: String,
    pub host: String,
    pub port: u16,
    pub hash_db: String,
    pub local_mode: bool,
    pub max_delete: u64,
    pub max_scan: u64,
}

impl ScannerConfig {
    pub fn load(path: &Path, local_mode: bool, max_delete: u64, max_scan: u64) -> Result<Self> {
        let raw: RawClientConfig = serde_yaml::from_reader(File::open(path)?)?;
        let (host, port) = split_host_port(&raw.server);
        Ok(Self {
            sweep_dirs: raw.sweep_dirs,
            id: raw.id.unwrap_or_else(|| random_id("client")),
            host,
            port,
            hash_db: raw.hash_db,
            local_mode,
            max_delete,
            max_scan,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ShrinkerConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub erase_mode: bool,
    pub erase_blank: bool,
    pub step_mode: bool,
    pub max_delete: u64,
}

impl ShrinkerConfig {
    /// The shrinker has no config file of its own: it re-reads the scan report it's passed
    /// on `--yaml`, which already carries the `id` and `server` fields a config file would.
    pub fn from_report(id: &str, server: &str, erase_mode: bool, erase_blank: bool, step_mode: bool, max_delete: u64) -> Self {
        let (host, port) = split_host_port(server);
        Self {
            id: id.to_string(),
            host,
            port,
            erase_mode,
            erase_blank,
            step_mode,
            max_delete,
        }
    }
}
