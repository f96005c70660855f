//! corrindex CLI
//!
//! Command-line driver for the correlation index:
//! - Inspect mapping and target-bucket files
//! - Build an index over a CSV dataset and run a range query
//! - Print the default configuration

use anyhow::Context;
use clap::{Parser, Subcommand};
use corrindex::{
    generate_default_config, ColumnDataset, CombinedCorrelationIndex, Config, LoggingConfig,
    MappedCorrelationIndex, Query, Scalar, TargetBucket, TargetBucketTable,
};
use std::path::{Path, PathBuf};
use tracing::Dispatch;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "corrindex")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Correlation-aware secondary index tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations, then environment)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a mapping and its target buckets and print their summary
    Inspect {
        /// Mapping file
        #[arg(short, long)]
        mapping: PathBuf,
        /// Target-bucket file
        #[arg(short, long)]
        targets: PathBuf,
    },

    /// Build the index over a CSV dataset and run one range query
    Query {
        /// Mapping file
        #[arg(short, long)]
        mapping: PathBuf,
        /// Target-bucket file
        #[arg(short, long)]
        targets: PathBuf,
        /// Headerless numeric CSV in clustered order
        #[arg(short, long)]
        data: PathBuf,
        /// Lower query bound (inclusive)
        #[arg(long, allow_hyphen_values = true)]
        lo: Scalar,
        /// Upper query bound (inclusive)
        #[arg(long, allow_hyphen_values = true)]
        hi: Scalar,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let bootstrap = fmt()
        .with_env_filter(default_filter("info"))
        .with_writer(std::io::stderr)
        .finish();
    let config = load_config(cli.config.as_deref(), bootstrap)?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Inspect { mapping, targets } => inspect(&mapping, &targets, &cli.format),
        Commands::Query {
            mapping,
            targets,
            data,
            lo,
            hi,
        } => query(&config, &mapping, &targets, &data, lo, hi, &cli.format),
        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("writing {:?}", path))?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
            Ok(())
        }
    }
}

/// `RUST_LOG` when set, else `corrindex=<level>`
fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("corrindex={}", level)))
}

/// Load the configuration while `subscriber` collects its log events. The
/// configured subscriber can only be installed once the config is known.
fn load_config(path: Option<&Path>, subscriber: impl Into<Dispatch>) -> anyhow::Result<Config> {
    tracing::dispatcher::with_default(&subscriber.into(), || match path {
        Some(path) => Config::load_with_env(path).with_context(|| format!("loading {:?}", path)),
        None => Ok(Config::load_default()),
    })
}

/// Logs go to stderr so that json output on stdout stays parseable
fn init_logging(logging: &LoggingConfig) {
    let filter = default_filter(&logging.level);
    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn inspect(mapping: &Path, targets: &Path, format: &str) -> anyhow::Result<()> {
    let index = MappedCorrelationIndex::from_files(mapping, targets)?;
    let map_buckets = index.map_buckets().count();
    let span = index.targets().span();

    match format {
        "json" => {
            let summary = serde_json::json!({
                "mapping_file": index.mapping_file(),
                "column": index.column(),
                "map_buckets": map_buckets,
                "target_buckets": index.targets().len(),
                "inlier_associations": index.num_associations(),
                "key_span": span,
                "size_bytes": index.size_bytes(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => {
            println!("Mapping:             {:?}", index.mapping_file());
            println!("Column:              {}", index.column());
            println!("Map buckets:         {}", map_buckets);
            println!("Target buckets:      {}", index.targets().len());
            println!("Inlier associations: {}", index.num_associations());
            println!("Key span:            [{}, {})", span.start, span.end);
            println!("Size:                {} bytes", index.size_bytes());
        }
    }
    Ok(())
}

fn query(
    config: &Config,
    mapping: &Path,
    targets: &Path,
    data: &Path,
    lo: Scalar,
    hi: Scalar,
    format: &str,
) -> anyhow::Result<()> {
    let table = TargetBucketTable::load(targets)?;
    let dataset = ColumnDataset::from_csv(data)?;
    let mut index = CombinedCorrelationIndex::from_files(
        mapping,
        targets,
        config.cost_model,
        config.tracker.scan_batch_rows,
    )?;
    anyhow::ensure!(
        index.column() < dataset.width(),
        "mapped column {} not present in {:?} ({} columns)",
        index.column(),
        data,
        dataset.width()
    );

    let regions: Vec<TargetBucket> = table.iter().collect();
    let summary = index.rebuild(&regions, &table, &dataset)?;

    let keys = index.key_ranges(&Query::between(index.column(), lo, hi));
    let matching = dataset
        .column(index.column())
        .iter()
        .filter(|&&v| v >= lo && v <= hi)
        .count();
    let stats = index.stats();

    match format {
        "json" => {
            let result = serde_json::json!({
                "query": { "column": index.column(), "lo": lo, "hi": hi },
                "ranges": keys.ranges,
                "list": keys.list.len(),
                "candidate_keys": keys.len(),
                "matching_rows": matching,
                "stats": stats,
                "build": summary,
                "size_bytes": index.size_bytes(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Build:            {}", summary);
            println!(
                "Index:            {} inlier / {} outlier associations, {} outlier rows, {} bytes",
                stats.inlier_buckets,
                stats.outlier_buckets,
                stats.outlier_rows,
                index.size_bytes()
            );
            println!();
            println!("Query:            {} <= c{} <= {}", lo, index.column(), hi);
            println!("Key ranges:       {}", keys.ranges.len());
            println!("Listed keys:      {}", keys.list.len());
            println!("Candidate keys:   {}", keys.len());
            println!("Matching rows:    {}", matching);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn capturing(captured: &Captured) -> impl Into<Dispatch> {
        let writer = captured.clone();
        fmt()
            .with_env_filter(EnvFilter::new("corrindex=info"))
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish()
    }

    #[test]
    fn test_default_config_load_is_logged() {
        let captured = Captured::default();
        load_config(None, capturing(&captured)).unwrap();
        assert!(captured.text().contains("config"), "{:?}", captured.text());
    }

    #[test]
    fn test_explicit_config_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cost_model]\nbeta = 3.0").unwrap();

        let config = load_config(Some(file.path()), capturing(&Captured::default())).unwrap();
        assert_eq!(config.cost_model.beta, 3.0);

        let missing = Path::new("/nonexistent/corrindex.toml");
        assert!(load_config(Some(missing), capturing(&Captured::default())).is_err());
    }
}
