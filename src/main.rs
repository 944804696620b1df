//! # fusedb CLI
//!
//! One-shot query driver: register relations, parse, compile, run.
//!
//! ```bash
//! fusedb --table test:col0:i32:test.skdbcol query "SELECT * FROM test WHERE col0 < 10"
//! fusedb --table test:col0:i32:test.skdbcol plan --json "SELECT * FROM test"
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fusedb::{Config, QueryEngine, QueryReport, ScalarType};

#[derive(Parser)]
#[command(name = "fusedb", about = "Compile and run analytical queries")]
struct Cli {
    /// Configuration file (defaults to config.toml / environment)
    #[arg(long)]
    config: Option<String>,

    /// Register a column: `table:column:type:path`. Repeat per column.
    #[arg(long = "table", value_name = "SPEC")]
    tables: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse, compile, and execute a query
    Query { sql: String },

    /// Print the validated plan
    Plan {
        sql: String,
        /// Emit the plan as JSON instead of the tree rendering
        #[arg(long)]
        json: bool,
    },

    /// Print the generated C++ for the source backend
    Emit { sql: String },
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path).context("loading configuration")?,
        None => Config::load().unwrap_or_default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut engine = QueryEngine::with_config(config);
    register_tables(&mut engine, &cli.tables)?;

    match cli.command {
        Command::Query { sql } => {
            let pool = fusedb::storage::BufferPool::new();
            engine.validate_tables(&pool)?;
            match engine.run(&sql)? {
                QueryReport::Executed(timings) => {
                    eprintln!(
                        "emit {:?}  compile {:?}  load {:?}  execute {:?}",
                        timings.emit, timings.compile, timings.load, timings.execute
                    );
                }
                QueryReport::Bitcode(path) => {
                    eprintln!("bitcode written to {}", path.display());
                }
            }
        }
        Command::Plan { sql, json } => {
            let plan = engine.parse(&sql)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print!("{plan}");
            }
        }
        Command::Emit { sql } => {
            let plan = engine.parse(&sql)?;
            print!("{}", engine.emit_source(&plan)?);
        }
    }
    Ok(())
}

/// Parse `table:column:type:path` specs into catalog registrations.
fn register_tables(engine: &mut QueryEngine, specs: &[String]) -> Result<()> {
    use std::collections::BTreeMap;

    let mut tables: BTreeMap<String, Vec<(String, ScalarType, PathBuf)>> = BTreeMap::new();
    for spec in specs {
        let parts: Vec<&str> = spec.splitn(4, ':').collect();
        let [table, column, ty, path] = parts.as_slice() else {
            bail!("bad --table spec `{spec}` (expected table:column:type:path)");
        };
        let ty = parse_type(ty).with_context(|| format!("in --table spec `{spec}`"))?;
        tables
            .entry((*table).to_string())
            .or_default()
            .push(((*column).to_string(), ty, PathBuf::from(*path)));
    }

    for (name, columns) in tables {
        engine.catalog_mut().register_table(&name, columns);
    }
    Ok(())
}

fn parse_type(s: &str) -> Result<ScalarType> {
    Ok(match s {
        "i8" => ScalarType::I8,
        "i16" => ScalarType::I16,
        "i32" => ScalarType::I32,
        "i64" => ScalarType::I64,
        "f64" => ScalarType::F64,
        "text" => ScalarType::Text,
        "date" => ScalarType::Date,
        _ => bail!("unknown column type `{s}`"),
    })
}
