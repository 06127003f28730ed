use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use semgraph::config::LoggingConfig;
use semgraph::{Config, Engine};

mod cli;

use cli::{OutputFormat, SearchMode};

#[derive(Parser)]
#[command(name = "semgraph")]
#[command(author = "Intent Project Team")]
#[command(version = "0.1.0")]
#[command(about = "Symbol search and code pattern matching over an extracted symbol index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./.semgraph.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search symbols by name
    Search {
        /// Text, regex or free-form query
        text: String,

        /// JSON index file (symbols and relationships)
        #[arg(short, long, default_value = "semgraph-index.json")]
        index: PathBuf,

        /// Matching mode
        #[arg(short = 't', long = "type", value_enum, default_value = "fuzzy")]
        mode: SearchMode,

        /// Restrict to languages (repeatable)
        #[arg(short, long)]
        language: Vec<String>,

        /// Restrict to symbol kinds (repeatable)
        #[arg(short, long)]
        kind: Vec<String>,

        /// Glob over symbol file paths
        #[arg(long)]
        file: Option<String>,

        /// Maximum number of results
        #[arg(short = 'n', long)]
        max: Option<usize>,

        #[arg(long)]
        case_sensitive: bool,

        /// Match across naming conventions (parse_file ~ parseFile)
        #[arg(long)]
        cross_language: bool,

        /// Attach each result's outgoing references
        #[arg(long)]
        refs: bool,

        /// Group results by language
        #[arg(long)]
        by_language: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Find symbols similar to a given symbol
    Similar {
        /// Symbol id
        symbol: String,

        #[arg(short, long, default_value = "semgraph-index.json")]
        index: PathBuf,

        /// Minimum similarity in [0, 1]
        #[arg(long)]
        threshold: Option<f64>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Symbols referenced by a symbol (outgoing edges)
    Refs {
        symbol: String,

        #[arg(short, long, default_value = "semgraph-index.json")]
        index: PathBuf,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Symbols with an edge into a symbol (callers, implementors, ...)
    Callers {
        symbol: String,

        #[arg(short, long, default_value = "semgraph-index.json")]
        index: PathBuf,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Run registered patterns over a source file
    Match {
        /// Source file to scan
        file: PathBuf,

        /// Language (guessed from the extension when omitted)
        #[arg(short, long)]
        language: Option<String>,

        /// Only run these pattern ids (repeatable)
        #[arg(short, long)]
        pattern: Vec<String>,

        /// Only run patterns in these categories (repeatable)
        #[arg(long)]
        category: Vec<String>,

        /// Minimum confidence in [0, 1]
        #[arg(long)]
        min_confidence: Option<f64>,

        /// Extra patterns to register first (JSON array)
        #[arg(long)]
        patterns: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List registered patterns
    Patterns {
        /// Filter by kind (structural, behavioral, semantic, anti-pattern)
        #[arg(short, long)]
        kind: Option<String>,

        #[arg(short, long)]
        language: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate a JSON file of pattern definitions
    Validate {
        /// JSON array of patterns
        file: PathBuf,
    },

    /// Derive a pattern from labelled examples
    Learn {
        /// JSON array of examples ({"code", "positive", "language"})
        file: PathBuf,

        /// Name of the derived pattern
        #[arg(short, long)]
        name: String,

        #[arg(long)]
        category: Option<String>,
    },

    /// Show index and cache statistics
    Stats {
        #[arg(short, long, default_value = "semgraph-index.json")]
        index: PathBuf,

        /// Verbose output
        #[arg(long)]
        detailed: bool,
    },
}

fn init_logging(debug: bool, verbose: bool, logging: &LoggingConfig) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
}

/// Read the JSON index file produced by the extraction stage
fn load_index(engine: &Engine, path: &Path) -> Result<()> {
    engine
        .load_index_file(path)
        .with_context(|| format!("Failed to load index file {}", path.display()))
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path).with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::from_project_dir(".")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    init_logging(cli.debug, cli.verbose, &config.logging);

    info!("semgraph v0.1.0 starting...");

    let engine = Engine::new(config).context("Failed to initialise engine")?;

    match cli.command {
        Commands::Search {
            text,
            index,
            mode,
            language,
            kind,
            file,
            max,
            case_sensitive,
            cross_language,
            refs,
            by_language,
            format,
        } => {
            load_index(&engine, &index)?;
            let query = cli::query::build_query(
                text,
                mode,
                language,
                &kind,
                file,
                max,
                case_sensitive,
                cross_language,
                refs,
            )?;
            if by_language {
                cli::query::search_by_language(&engine, &query, format)?;
            } else {
                cli::query::search(&engine, &query, format)?;
            }
        }

        Commands::Similar {
            symbol,
            index,
            threshold,
            format,
        } => {
            load_index(&engine, &index)?;
            cli::query::similar(&engine, &symbol, threshold, format)?;
        }

        Commands::Refs { symbol, index, format } => {
            load_index(&engine, &index)?;
            cli::query::references(&engine, &symbol, format)?;
        }

        Commands::Callers { symbol, index, format } => {
            load_index(&engine, &index)?;
            cli::query::callers(&engine, &symbol, format)?;
        }

        Commands::Match {
            file,
            language,
            pattern,
            category,
            min_confidence,
            patterns,
            format,
        } => {
            if let Some(path) = patterns {
                cli::patterns::register_file(&engine, &path).await?;
            }
            cli::patterns::match_file(&engine, &file, language, pattern, category, min_confidence, format).await?;
        }

        Commands::Patterns {
            kind,
            language,
            category,
            format,
        } => {
            cli::patterns::list(&engine, kind, language, category, format)?;
        }

        Commands::Validate { file } => {
            cli::patterns::validate_file(&engine, &file).await?;
        }

        Commands::Learn { file, name, category } => {
            cli::patterns::learn(&engine, &file, &name, category).await?;
        }

        Commands::Stats { index, detailed } => {
            load_index(&engine, &index)?;
            cli::stats::show_stats(&engine, detailed)?;
        }
    }

    Ok(())
}
