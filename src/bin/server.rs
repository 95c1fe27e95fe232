use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use dupe_sweeper::cache::HashCache;
use dupe_sweeper::config::ServerConfig;
use dupe_sweeper::server::Server;
use dupe_sweeper::sizeindex::SizeIndex;

#[derive(Parser, Debug)]
#[command(author, version, about = "Serves chunk-hash lookups for a set of sweep directories", long_about = None)]
struct Cli {
    /// Path to the YAML server configuration
    #[arg(long)]
    yaml: PathBuf,

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

    let config = ServerConfig::load(&args.yaml)?;
    let index = SizeIndex::build(&config.sweep_dirs);
    let cache = HashCache::open(std::path::Path::new(&config.hash_db))?;

    info!("{} indexed {} sweep directories", config.id, config.sweep_dirs.len());

    let mut server = Server::new(config.id.clone(), index, cache);
    server.run(&format!("{}:{}", config.host, config.port))?;

    Ok(())
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
