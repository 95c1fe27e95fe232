use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use log::info;

use dupe_sweeper::config::ShrinkerConfig;
use dupe_sweeper::report::ScanReport;
use dupe_sweeper::shrink::ShrinkPlanner;

#[derive(Parser, Debug)]
#[command(author, version, about = "Deletes duplicate files found by a prior scan", long_about = None)]
struct Cli {
    /// The YAML report produced by the scanner; also carries the shrink roots once edited
    #[arg(long)]
    yaml: PathBuf,

    /// Parse the report and print the directories duplicate files live in, without deleting
    #[arg(long)]
    parse: bool,

    /// Actually delete files; default is dry run
    #[arg(long)]
    erase: bool,

    /// Delete files which are 0 bytes
    #[arg(long)]
    blank: bool,

    /// Delete files without prompting
    #[arg(long)]
    auto: bool,

    /// Max number of files to delete, 0 = unlimited
    #[arg(long, default_value_t = 0)]
    delete: u64,

    /// Debug mode, show more detail logs
    #[arg(long)]
    debug: bool,
}

fn prompt_user(message: &str) -> bool {
    print!("{message}");
    let _ = io::stdout().flush();

    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "yes" | "y")
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if args.debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let report: ScanReport = serde_yaml::from_reader(std::fs::File::open(&args.yaml)?)?;

    if args.parse {
        let config = ShrinkerConfig::from_report(&report.id, &report.server, false, false, false, 0);
        let planner = ShrinkPlanner::new(config, vec![]);
        for (dir, count) in planner.parse_duplicate_directory(&report) {
            println!("[{count:04}] {dir}");
        }
        return Ok(());
    }

    let shrink_roots: Vec<PathBuf> = report
        .sweep_dirs
        .iter()
        .map(Path::new)
        .filter(|p| p.is_absolute() && p.exists())
        .map(Path::to_path_buf)
        .collect();
    if shrink_roots.is_empty() {
        info!("no shrink directories declared, aborting");
        return Ok(());
    }

    let config = ShrinkerConfig::from_report(&report.id, &report.server, args.erase, args.blank, !args.auto, args.delete);
    let mut planner = ShrinkPlanner::new(config, shrink_roots);
    let summary = planner.run(&report, prompt_user)?;

    info!("shrink completed, {} files, freed {} bytes", summary.deleted, summary.freed_bytes);

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
