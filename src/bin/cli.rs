//! Photomonths CLI
//!
//! Works directly on a SQLite library:
//! - Create a library and add, remove or retime assets
//! - List months, page through a month, count a month
//! - Print a default config file

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use photomonths::config::{generate_default_config, Config};
use photomonths::index::MonthIndex;
use photomonths::service::QueryService;
use photomonths::source::{IngestAdapter, MediaType, RawAsset, SqliteLibrary};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "photomonths-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and edit a Photomonths library")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: searched in the usual locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Library database, overriding the config
    #[arg(short, long, global = true)]
    pub library: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Kind {
    Photo,
    Video,
}

impl From<Kind> for MediaType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Photo => MediaType::Photo,
            Kind::Video => MediaType::Video,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an empty library
    Init,

    /// Add or replace an asset
    Add {
        /// Asset id
        id: String,
        /// Capture time: ISO 8601, YYYY-MM-DD or Unix milliseconds
        #[arg(short, long)]
        taken: Option<String>,
        /// Time added to the library, Unix seconds
        #[arg(short, long)]
        added: Option<i64>,
        #[arg(short, long, value_enum, default_value = "photo")]
        kind: Kind,
        #[arg(long)]
        filename: Option<String>,
    },

    /// Remove an asset
    Remove { id: String },

    /// Change an asset's capture time
    Retime {
        id: String,
        /// New capture time: ISO 8601, YYYY-MM-DD or Unix milliseconds
        taken: String,
    },

    /// List months present in the library
    Months,

    /// Page through a month, newest first
    Photos {
        /// Month key, YYYY-MM
        month: String,
        #[arg(short, long, default_value = "0")]
        offset: i64,
        #[arg(short = 'n', long, default_value = "60")]
        limit: i64,
    },

    /// Count a month's assets
    Count {
        /// Month key, YYYY-MM
        month: String,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "photomonths=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::from_env(),
    };
    config.validate()?;

    let path = cli.library.clone().unwrap_or_else(|| config.library.path());

    match cli.command {
        Commands::Init => {
            let library = open_library(&path)?;
            println!("Library ready at {} ({} assets)", path.display(), library.len().await?);
        }

        Commands::Add {
            id,
            taken,
            added,
            kind,
            filename,
        } => {
            let mut asset = RawAsset {
                id: id.clone(),
                media_type: kind.into(),
                date_taken: taken.as_deref().map(parse_time).transpose()?,
                date_added: added,
                filename,
            };
            if asset.effective_timestamp().is_none() {
                asset.date_added = Some(Utc::now().timestamp());
            }
            let when = asset.effective_timestamp().unwrap_or_default();
            open_library(&path)?.insert_asset(asset).await?;
            println!("Added {} at {}", id, format_time(when));
        }

        Commands::Remove { id } => {
            if open_library(&path)?.delete_asset(&id).await? {
                println!("Removed {}", id);
            } else {
                bail!("no asset with id {}", id);
            }
        }

        Commands::Retime { id, taken } => {
            let when = parse_time(&taken)?;
            if open_library(&path)?.set_date_taken(&id, when).await? {
                println!("Moved {} to {}", id, format_time(when));
            } else {
                bail!("no asset with id {}", id);
            }
        }

        Commands::Months => {
            let months = service(open_library(&path)?, &config)?.list_months().await?;
            if cli.format == OutputFormat::Json {
                print_json(&months)?;
            } else if months.is_empty() {
                println!("The library has no dated assets.");
            } else {
                println!("{:<10} {}", "Key", "Month");
                println!("{}", "-".repeat(30));
                for month in months {
                    println!("{:<10} {}", month.month_key, month.display_name);
                }
            }
        }

        Commands::Photos {
            month,
            offset,
            limit,
        } => {
            let page = service(open_library(&path)?, &config)?
                .fetch_month_photos(&month, offset, limit)
                .await?;
            if cli.format == OutputFormat::Json {
                print_json(&page)?;
            } else {
                for (i, id) in page.ids.iter().enumerate() {
                    println!("{:>6}  {}", page.offset as usize + i, id);
                }
                if page.has_more {
                    println!("(more after offset {})", page.offset as usize + page.ids.len());
                }
            }
        }

        Commands::Count { month } => {
            let count = service(open_library(&path)?, &config)?.fetch_month_count(&month).await?;
            if cli.format == OutputFormat::Json {
                print_json(&count)?;
            } else {
                println!(
                    "{}: {} assets ({} photos, {} videos)",
                    count.month, count.total, count.photos, count.videos
                );
            }
        }

        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(out) => {
                    std::fs::write(&out, content)
                        .with_context(|| format!("writing {}", out.display()))?;
                    println!("Wrote default config to {}", out.display());
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}

fn open_library(path: &Path) -> anyhow::Result<Arc<SqliteLibrary>> {
    let library = SqliteLibrary::open(path)
        .with_context(|| format!("opening library {}", path.display()))?;
    Ok(Arc::new(library))
}

fn service(library: Arc<SqliteLibrary>, config: &Config) -> anyhow::Result<QueryService> {
    let adapter = IngestAdapter::new(library, config.library.month_zone()?)
        .with_batch_size(config.index.ingest_batch_size);
    Ok(QueryService::new(
        MonthIndex::new(adapter, config.index_config()),
        config.service_config(),
    ))
}

/// ISO 8601, `YYYY-MM-DD` (midnight UTC) or Unix milliseconds
fn parse_time(s: &str) -> anyhow::Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc().timestamp_millis());
        }
    }
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    bail!("invalid time: {}", s)
}

fn format_time(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
