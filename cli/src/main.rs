use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use findex_engine::{BuildState, Engine, EngineConfig, Query, SortKind, WalkMode};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "findex")]
#[command(about = "Fast file-name search over an NTFS volume", long_about = None)]
struct Cli {
    /// JSON config file (volume letter, index path)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Window geometry, accepted for presentation-layer compatibility;
    /// the core ignores it
    #[arg(long, num_args = 4, value_names = ["X", "Y", "W", "H"], allow_negative_numbers = true)]
    geometry: Option<Vec<i32>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the volume index and persist it
    Refresh {
        /// Use the directory walker even when the MFT route is available
        #[arg(long)]
        fallback: bool,
    },
    /// Query the persisted index
    Search {
        pattern: String,
        /// Match case-sensitively against original names
        #[arg(long)]
        case_sensitive: bool,
        /// Require the pattern at the start of names instead of anywhere
        #[arg(long)]
        exact: bool,
        /// Hide directories
        #[arg(long)]
        files_only: bool,
        /// Hide files
        #[arg(long)]
        dirs_only: bool,
        #[arg(long, value_enum, default_value = "direct")]
        sort: SortArg,
        /// Reverse the sort order
        #[arg(long)]
        reverse: bool,
        /// Maximum rows to print
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Print statistics about the persisted index
    Info,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Direct,
    Name,
    Size,
    Date,
}

impl From<SortArg> for SortKind {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Direct => SortKind::Direct,
            SortArg::Name => SortKind::Name,
            SortArg::Size => SortKind::Size,
            SortArg::Date => SortKind::Date,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct Config {
    volume: char,
    index_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            volume: 'C',
            index_file: PathBuf::from("findex.idx"),
        }
    }
}

impl Config {
    fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from("findex.json");
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Cannot parse config {}", path.display()))
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    if let Some(geometry) = &cli.geometry {
        log::debug!("Ignoring window geometry {geometry:?}");
    }
    let config = Config::load(cli.config.as_deref())?;

    let engine = Engine::new(EngineConfig {
        volume: config.volume,
        index_path: config.index_file.clone(),
        walk_root: None,
    });

    match cli.command {
        Commands::Refresh { fallback } => {
            let mode = if fallback {
                WalkMode::Directory
            } else {
                WalkMode::Auto
            };
            engine.refresh_index(mode)?;

            loop {
                match engine.state() {
                    BuildState::Ready | BuildState::Idle => break,
                    _ => {
                        print!("\rIndexing... {:5.1}%", engine.progress() * 100.0);
                        std::io::stdout().flush().ok();
                        std::thread::sleep(Duration::from_millis(200));
                    }
                }
            }
            engine.wait_for_build();
            println!();

            if let Some(error) = engine.last_error() {
                bail!("Index build failed: {error}");
            }
            let elapsed = engine.last_build_time().unwrap_or_default();
            println!(
                "Indexed {} entries in {:.3} s ({})",
                engine.index().len(),
                elapsed.as_secs_f64(),
                config.index_file.display()
            );
        }

        Commands::Search {
            pattern,
            case_sensitive,
            exact,
            files_only,
            dirs_only,
            sort,
            reverse,
            limit,
        } => {
            engine.load_index(&config.index_file)?;
            if engine.index().is_empty() {
                bail!(
                    "No index at {}; run `findex refresh` first",
                    config.index_file.display()
                );
            }

            engine.submit_query(Query {
                pattern,
                case_sensitive,
                allow_substrings: !exact,
                include_files: !dirs_only,
                include_dirs: !files_only,
                sort: sort.into(),
                reverse,
            });
            engine.wait_for_search();

            let results = engine.take_results();
            for &id in results.ids.iter().take(limit) {
                let entry = match engine.entry(id) {
                    Some(entry) => entry,
                    None => continue,
                };
                println!(
                    "{:>10}  {:16}  {}",
                    format_size(entry.size),
                    format_mtime(entry.mtime_minutes),
                    engine.full_path(id)
                );
            }
            if results.ids.len() > limit {
                println!("... and {} more", results.ids.len() - limit);
            }
            println!(
                "{} files found in {:.3} ms",
                results.ids.len(),
                results.elapsed.as_secs_f64() * 1_000.0
            );
        }

        Commands::Info => {
            engine.load_index(&config.index_file)?;
            let index = engine.index();
            let dirs = index
                .entries
                .iter()
                .filter(|e| e.is_dir())
                .count();
            println!("Index file:  {}", config.index_file.display());
            println!("Entries:     {}", index.len());
            println!("Directories: {dirs}");
            println!("Files:       {}", index.len() - dirs);
            println!("Name arena:  {} bytes", index.names.len());
            if let Some(root) = index.entry(0) {
                println!(
                    "Volume:      {} ({} used)",
                    index.name_of(0),
                    format_size(root.size)
                );
            }
        }
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.1} GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.1} MB", bytes as f64 / 1_000_000.0)
    } else {
        format!("{:.1} KB", bytes as f64 / 1_000.0)
    }
}

/// Minutes since the FILETIME epoch, rendered as a local-naive date.
fn format_mtime(minutes: u32) -> String {
    const UNIX_TO_FILETIME_SECS: i64 = 11_644_473_600;
    let unix_secs = minutes as i64 * 60 - UNIX_TO_FILETIME_SECS;
    match chrono::DateTime::from_timestamp(unix_secs, 0) {
        Some(when) if unix_secs > 0 => when.format("%Y-%m-%d %H:%M").to_string(),
        _ => "-".to_string(),
    }
}
