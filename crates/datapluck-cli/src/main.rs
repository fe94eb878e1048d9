use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use datapluck_convert::ConverterRegistry;
use datapluck_core::{Model, Value};
use datapluck_extractor::Extractor;
use datapluck_reader::{new_reader, DataSource};
use datapluck_writer::{new_writer, supported_types, OutputConfig, Writer};

const DEFAULT_MAX_OPEN_CONN: usize = 3;
const DEFAULT_MAX_IDLE_CONN: usize = 2;

/// Datapluck - extract referentially consistent fixtures from a database
#[derive(Parser)]
#[command(name = "datapluck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a data-set from a database into fixture files
    Extract {
        /// Path to the schema file describing the data-set
        #[arg(short, long)]
        schema: PathBuf,

        /// Data source name: <driver>://<username>:<password>@<host>:<port>/<database>
        #[arg(short = 'n', long)]
        dsn: String,

        /// Maximum number of concurrently open connections
        #[arg(long, default_value_t = DEFAULT_MAX_OPEN_CONN)]
        max_open_conn: usize,

        /// Maximum number of concurrently idle connections
        #[arg(long, default_value_t = DEFAULT_MAX_IDLE_CONN)]
        max_idle_conn: usize,

        /// Output format type (repeatable)
        #[arg(short = 't', long = "output-type", default_values_t = [String::from("console")])]
        output_types: Vec<String>,

        /// Whether file outputs should be formatted
        #[arg(short, long)]
        formatted_output: bool,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        directory: PathBuf,

        /// Output file name, without extension
        #[arg(long, default_value = "dataset")]
        name: String,

        /// Pre-resolved reference expected by the schema (repeatable):
        /// table.column=value
        #[arg(short = 'r', long = "reference")]
        references: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            schema,
            dsn,
            max_open_conn,
            max_idle_conn,
            output_types,
            formatted_output,
            directory,
            name,
            references,
        } => {
            extract_command(
                &schema,
                &dsn,
                max_open_conn,
                max_idle_conn,
                &output_types,
                formatted_output,
                &directory,
                &name,
                &references,
                cli.verbose,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn extract_command(
    schema: &Path,
    dsn: &str,
    max_open_conn: usize,
    max_idle_conn: usize,
    output_types: &[String],
    formatted_output: bool,
    directory: &Path,
    name: &str,
    references: &[String],
    verbose: bool,
) -> Result<()> {
    let started = Instant::now();

    validate_paths(schema, directory)?;
    let bindings = parse_references(references)?;

    // configuration problems surface before any database I/O
    let writers = build_writers(output_types, formatted_output, directory, name)?;
    let source = DataSource::from_dsn(dsn)?.with_pool(max_open_conn, max_idle_conn);

    if verbose {
        eprintln!(
            "{} {} tables from {}",
            "Extracting".cyan(),
            schema.display(),
            source.hostname
        );
    }

    let registry = ConverterRegistry::with_defaults();
    let mut model =
        Model::from_file(schema, &registry).context("digesting the schema file failed")?;
    model.seed_refs(&bindings);

    let reader = new_reader(&source).await?;
    let extractor = Extractor::new(Arc::clone(&reader), &registry, &model)?;
    extractor.run(&mut model, writers).await?;

    println!(
        "{}\nAssets generated in the directory {}",
        "Extraction is done!".green(),
        directory.display()
    );
    println!("Elapsed time: {:.3}s", started.elapsed().as_secs_f64());

    Ok(())
}

fn validate_paths(schema: &Path, directory: &Path) -> Result<()> {
    if !schema.is_file() {
        bail!("file not found '{}'", schema.display());
    }

    if directory.exists() && !directory.is_dir() {
        bail!("{} is not a directory", directory.display());
    }

    Ok(())
}

fn build_writers(
    output_types: &[String],
    formatted: bool,
    directory: &Path,
    name: &str,
) -> Result<Vec<Box<dyn Writer + Send>>> {
    let mut writers = Vec::with_capacity(output_types.len());

    for kind in output_types {
        if !supported_types().iter().any(|t| t.eq_ignore_ascii_case(kind)) {
            bail!(
                "unsupported output type '{}' (expected one of: {})",
                kind,
                supported_types().join(", ")
            );
        }

        let config = OutputConfig::new(kind.as_str())
            .formatted(formatted)
            .directory(directory)
            .name(name);
        writers.push(new_writer(&config)?);
    }

    Ok(writers)
}

/// Parse `table.column=value` pairs into reference seed bindings
fn parse_references(references: &[String]) -> Result<HashMap<String, Value>> {
    let mut bindings = HashMap::new();

    for reference in references {
        let Some((key, value)) = reference.split_once('=') else {
            bail!("invalid reference '{}'", reference);
        };

        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() || !key.contains('.') {
            bail!("invalid reference '{}'", reference);
        }

        bindings.insert(key.to_string(), Value::Text(value.to_string()));
    }

    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_parse_into_bindings() {
        let refs = vec!["customers.id=34".to_string(), "orders.status = open".to_string()];

        let bindings = parse_references(&refs).unwrap();

        assert_eq!(bindings["customers.id"], Value::Text("34".to_string()));
        assert_eq!(bindings["orders.status"], Value::Text("open".to_string()));
    }

    #[test]
    fn malformed_references_are_rejected() {
        assert!(parse_references(&["no-equals".to_string()]).is_err());
        assert!(parse_references(&["missing_dot=1".to_string()]).is_err());
        assert!(parse_references(&["customers.id=".to_string()]).is_err());
    }

    #[test]
    fn unsupported_output_type_is_rejected_early() {
        let err = match build_writers(
            &["holotape".to_string()],
            false,
            Path::new("."),
            "dataset",
        ) {
            Ok(_) => panic!("expected build_writers to reject unsupported output type"),
            Err(e) => e,
        };

        assert!(err.to_string().contains("unsupported output type"));
    }
}
