use std::fs::File;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use dupe_sweeper::cache::HashCache;
use dupe_sweeper::config::ScannerConfig;
use dupe_sweeper::scanner::Scanner;

#[derive(Parser, Debug)]
#[command(author, version, about = "Walks sweep directories and finds duplicates against a server", long_about = None)]
struct Cli {
    /// Path to the YAML scanner configuration
    #[arg(long)]
    yaml: PathBuf,

    /// Max number of duplicate copies to record before stopping, 0 = unlimited
    #[arg(long, default_value_t = 0)]
    delete: u64,

    /// Max number of files to scan before stopping, 0 = unlimited
    #[arg(long, default_value_t = 0)]
    scan: u64,

    /// Scanner and server run on the same host
    #[arg(long)]
    local: bool,

    /// Debug mode, show more detail logs
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if args.debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let config = ScannerConfig::load(&args.yaml, args.local, args.delete, args.scan)?;
    let cache = HashCache::open(std::path::Path::new(&config.hash_db))?;

    let scanner = Scanner::new(config, cache);
    let report = scanner.run()?;

    let report_path = format!("sweeper.{}.yaml", timestamp_suffix());
    serde_yaml::to_writer(File::create(&report_path)?, &report)?;
    info!("wrote report to {report_path}");

    Ok(())
}

fn timestamp_suffix() -> String {
    std::env::var("DUPE_SWEEPER_REPORT_SUFFIX").unwrap_or_else(|_| {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs().to_string())
            .unwrap_or_else(|_| "0".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }
}
